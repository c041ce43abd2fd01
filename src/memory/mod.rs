//! GPU Memory Management
//!
//! Heap pooling for placed resources, low-level allocators (buddy for
//! heap ranges, TLSF for buffer sub-allocation), typed buffer
//! sub-allocations, and the residency manager that keeps the working set
//! inside the OS memory budget.

pub mod buddy;
pub mod heap;
pub mod residency;
pub mod suballoc;
pub mod tlsf;

pub use heap::{GpuHeap, GpuResourceHeapManager, HeapAllocation, HeapClass};
pub use residency::{GpuResidencyManager, PageableGpuObject, ResidencyPassResults};
pub use suballoc::{
    BufferSubAllocationManager, BufferSubAllocationReservation, ConstantBufferSubAllocation,
    StructuredBufferSubAllocation, TextureCopySubAllocation, UavCounterSubAllocation,
};
