//! Graphics Abstraction Boundary
//!
//! The engine core is API-agnostic: everything it needs from the graphics
//! API is expressed by [`device::DeviceBackend`] and the plain data types
//! in [`types`]. [`software`] provides the in-process reference backend
//! used by the test suite.

pub mod device;
pub mod software;
pub mod states;
pub mod types;

pub use device::{CommandList, CommandQueue, Device, DeviceBackend, Fence, RecordedCommand};
pub use states::ResourceStates;
pub use types::{
    ALL_SUBRESOURCES, BarrierFlags, ClearValue, Format, HeapType, QueueFlags, QueueType,
    ResourceBarrier, ResourceDesc, ResourceDimension, ResourceFlags, ResourceHeapTier,
};
