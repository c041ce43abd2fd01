//! Descriptor Tables
//!
//! [`DescriptorTableBuilder`] stages descriptors in a CPU-visible heap;
//! [`GpuResourceDescriptorHeap::create_per_frame_descriptor_table`]
//! copies the staged run into the per-frame partition of the
//! shader-visible heap, yielding a [`PerFrameDescriptorTable`] that is
//! valid only for its creation frame.

use crate::errors::Result;
use crate::rhi::device::Device;
use crate::rhi::types::{
    DescriptorContents, DescriptorHeapDesc, DescriptorHeapId, DescriptorHeapType,
};

use super::heap::{GpuResourceDescriptorHeap, PerFrameDescriptorReservation};

// ============================================================================
// DescriptorTableBuilder
// ============================================================================

/// Builds a contiguous descriptor table in a CPU-side staging heap.
pub struct DescriptorTableBuilder {
    device: Device,
    staging_heap: DescriptorHeapId,
    table_size: u32,
}

impl DescriptorTableBuilder {
    /// Creates a builder for a table of `table_size` descriptors.
    pub fn new(device: Device, table_size: u32) -> Result<Self> {
        let staging_heap = device.backend().create_descriptor_heap(&DescriptorHeapDesc {
            heap_type: DescriptorHeapType::CbvSrvUav,
            descriptor_count: table_size,
            shader_visible: false,
        })?;

        Ok(Self {
            device,
            staging_heap,
            table_size,
        })
    }

    /// Number of descriptors in the table.
    #[inline]
    #[must_use]
    pub fn table_size(&self) -> u32 {
        self.table_size
    }

    /// The staging heap holding the built descriptors.
    #[inline]
    #[must_use]
    pub fn staging_heap(&self) -> DescriptorHeapId {
        self.staging_heap
    }

    /// Writes a descriptor at `table_index`.
    pub fn write_descriptor(&self, table_index: u32, contents: DescriptorContents) {
        debug_assert!(table_index < self.table_size, "descriptor table index out of range");
        self.device
            .backend()
            .write_descriptor(self.staging_heap, table_index, contents);
    }
}

// ============================================================================
// PerFrameDescriptorTable
// ============================================================================

/// A descriptor table living in the per-frame partition of the
/// shader-visible heap.
///
/// Valid only during its creation frame: the region it occupies is
/// recycled two frames later. Debug builds assert on late use; release
/// builds leave the behaviour undefined, exactly as the descriptor data
/// itself would be.
#[derive(Clone, Copy, Debug)]
pub struct PerFrameDescriptorTable {
    reservation: PerFrameDescriptorReservation,
}

impl PerFrameDescriptorTable {
    /// First shader-visible heap index of the table.
    #[must_use]
    pub fn heap_index(&self, current_frame: u64) -> u32 {
        self.reservation.heap_index(current_frame)
    }

    /// Number of descriptors in the table.
    #[must_use]
    pub fn descriptor_count(&self) -> u32 {
        self.reservation.count()
    }

    /// The frame this table belongs to.
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.reservation.frame_number()
    }
}

impl GpuResourceDescriptorHeap {
    /// Copies a built table into the per-frame partition for
    /// `frame_number`.
    pub fn create_per_frame_descriptor_table(
        &self,
        builder: &DescriptorTableBuilder,
        frame_number: u64,
    ) -> Result<PerFrameDescriptorTable> {
        let reservation =
            self.reserve_per_frame_descriptors(builder.table_size(), frame_number)?;

        self.copy_descriptors_from(
            builder.staging_heap(),
            0,
            reservation.heap_index(frame_number),
            builder.table_size(),
        );

        Ok(PerFrameDescriptorTable { reservation })
    }
}
