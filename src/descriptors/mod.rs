//! Descriptor Management
//!
//! The process-wide shader-visible descriptor heap (bindless + per-frame
//! partitions) and the staging builder for per-frame descriptor tables.

pub mod heap;
pub mod table;

pub use heap::{
    BindlessSrvSentinel, DescriptorHeapConfig, GpuResourceDescriptorHeap,
    PerFrameDescriptorReservation,
};
pub use table::{DescriptorTableBuilder, PerFrameDescriptorTable};
