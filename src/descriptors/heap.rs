//! Shader-Visible Descriptor Heap
//!
//! One process-wide shader-visible CBV/SRV/UAV heap, partitioned into:
//!
//! - a **bindless partition**: stable indices handed out through
//!   [`BindlessSrvSentinel`]s and recycled through a free-index queue;
//! - a **per-frame partition**: a rolling region split into two halves.
//!   Even frames allocate from one half, odd frames from the other, so
//!   frame N+1 can allocate while frame N is still executing on the GPU.
//!   Each half is reset when its frame's fence clears.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::errors::{ForgeError, Result};
use crate::rhi::device::Device;
use crate::rhi::types::{DescriptorContents, DescriptorHeapDesc, DescriptorHeapId, DescriptorHeapType};

/// Partition sizes of the shader-visible heap.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorHeapConfig {
    /// Bindless SRV slots.
    pub bindless_partition_size: u32,
    /// Per-frame descriptor slots (split into two halves).
    pub per_frame_partition_size: u32,
}

impl Default for DescriptorHeapConfig {
    fn default() -> Self {
        Self {
            bindless_partition_size: 500_000,
            per_frame_partition_size: 500_000,
        }
    }
}

struct DescriptorHeapCore {
    device: Device,
    heap: DescriptorHeapId,
    config: DescriptorHeapConfig,
    bindless_free_indices: Mutex<VecDeque<u32>>,
    /// Allocation cursors for the two per-frame halves, indexed by frame
    /// parity.
    per_frame_cursors: [AtomicU32; 2],
}

/// Process-wide shader-visible descriptor heap.
///
/// Created once at device initialization and alive for the device's
/// whole lifetime; cloning shares the same heap.
#[derive(Clone)]
pub struct GpuResourceDescriptorHeap {
    core: Arc<DescriptorHeapCore>,
}

impl GpuResourceDescriptorHeap {
    pub fn new(device: Device, config: DescriptorHeapConfig) -> Result<Self> {
        let heap = device.backend().create_descriptor_heap(&DescriptorHeapDesc {
            heap_type: DescriptorHeapType::CbvSrvUav,
            descriptor_count: config.bindless_partition_size + config.per_frame_partition_size,
            shader_visible: true,
        })?;

        // Seeding every free bindless index up front is a long-running
        // loop, but it happens once, concurrently with the rest of device
        // initialization.
        let bindless_free_indices = (0..config.bindless_partition_size).collect();

        Ok(Self {
            core: Arc::new(DescriptorHeapCore {
                device,
                heap,
                config,
                bindless_free_indices: Mutex::new(bindless_free_indices),
                per_frame_cursors: [AtomicU32::new(0), AtomicU32::new(0)],
            }),
        })
    }

    /// The backend heap identity (for binding at record time).
    #[must_use]
    pub fn heap_id(&self) -> DescriptorHeapId {
        self.core.heap
    }

    #[must_use]
    pub fn config(&self) -> DescriptorHeapConfig {
        self.core.config
    }

    // ── Bindless partition ─────────────────────────────────────────────────

    /// Takes a bindless index from the free queue.
    pub fn allocate_bindless_srv(&self) -> Result<BindlessSrvSentinel> {
        let index = self
            .core
            .bindless_free_indices
            .lock()
            .pop_front()
            .ok_or(ForgeError::BindlessSrvsExhausted)?;

        Ok(BindlessSrvSentinel {
            core: Arc::clone(&self.core),
            index,
        })
    }

    /// Number of bindless indices currently free.
    #[must_use]
    pub fn free_bindless_count(&self) -> usize {
        self.core.bindless_free_indices.lock().len()
    }

    // ── Per-frame partition ────────────────────────────────────────────────

    /// Base heap index of the per-frame half used by `frame_number`.
    #[must_use]
    pub fn per_frame_base_index(&self, frame_number: u64) -> u32 {
        let half = self.core.config.per_frame_partition_size / 2;
        self.core.config.bindless_partition_size + half * (frame_number % 2 == 1) as u32
    }

    /// Reserves `count` contiguous per-frame descriptors for
    /// `frame_number`. Fails once the frame's half is exhausted.
    pub fn reserve_per_frame_descriptors(
        &self,
        count: u32,
        frame_number: u64,
    ) -> Result<PerFrameDescriptorReservation> {
        let half = self.core.config.per_frame_partition_size / 2;
        let cursor = &self.core.per_frame_cursors[(frame_number % 2) as usize];

        let start = cursor.fetch_add(count, Ordering::Relaxed);
        if start + count > half {
            return Err(ForgeError::PerFrameDescriptorsExhausted {
                requested: count,
                available: half.saturating_sub(start),
            });
        }

        Ok(PerFrameDescriptorReservation {
            heap_index: self.per_frame_base_index(frame_number) + start,
            count,
            frame_number,
        })
    }

    /// Resets the per-frame half belonging to `frame_number`. Called once
    /// that frame's fence collection has cleared.
    pub fn reset_per_frame_descriptors(&self, frame_number: u64) {
        self.core.per_frame_cursors[(frame_number % 2) as usize].store(0, Ordering::Relaxed);
    }

    /// Writes one descriptor directly into the shader-visible heap.
    pub fn write_descriptor(&self, heap_index: u32, contents: DescriptorContents) {
        self.core
            .device
            .backend()
            .write_descriptor(self.core.heap, heap_index, contents);
    }

    /// Copies `count` descriptors from a staging heap into this heap.
    pub fn copy_descriptors_from(
        &self,
        src_heap: DescriptorHeapId,
        src_start: u32,
        dst_start: u32,
        count: u32,
    ) {
        self.core.device.backend().copy_descriptors(
            self.core.heap,
            dst_start,
            src_heap,
            src_start,
            count,
        );
    }
}

// ============================================================================
// Bindless sentinel
// ============================================================================

/// Owner of one bindless SRV index.
///
/// The index stays stable for the lifetime of the sentinel; when the
/// underlying GPU resource is re-created, the descriptor is re-written at
/// the same index so shader-side indices never change. Dropping the
/// sentinel returns the index to the free queue.
pub struct BindlessSrvSentinel {
    core: Arc<DescriptorHeapCore>,
    index: u32,
}

impl BindlessSrvSentinel {
    /// The stable bindless index, as seen by shaders.
    #[inline]
    #[must_use]
    pub fn bindless_index(&self) -> u32 {
        self.index
    }

    /// (Re-)writes the descriptor at the sentinel's index.
    pub fn write_descriptor(&self, contents: DescriptorContents) {
        self.core
            .device
            .backend()
            .write_descriptor(self.core.heap, self.index, contents);
    }
}

impl Drop for BindlessSrvSentinel {
    fn drop(&mut self) {
        self.core.bindless_free_indices.lock().push_back(self.index);
    }
}

// ============================================================================
// Per-frame reservation
// ============================================================================

/// A contiguous run of per-frame descriptors, valid only for its creation
/// frame.
#[derive(Clone, Copy, Debug)]
pub struct PerFrameDescriptorReservation {
    heap_index: u32,
    count: u32,
    frame_number: u64,
}

impl PerFrameDescriptorReservation {
    /// First heap index of the reservation.
    ///
    /// Debug builds verify the reservation is used during its creation
    /// frame; afterwards the region may already belong to a later frame.
    #[must_use]
    pub fn heap_index(&self, current_frame: u64) -> u32 {
        debug_assert_eq!(
            self.frame_number, current_frame,
            "per-frame descriptor reservation used outside its creation frame"
        );
        self.heap_index
    }

    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};

    fn small_heap() -> GpuResourceDescriptorHeap {
        let backend = Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()));
        let device = Device::new(backend).unwrap();
        GpuResourceDescriptorHeap::new(
            device,
            DescriptorHeapConfig {
                bindless_partition_size: 16,
                per_frame_partition_size: 8,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_bindless_indices_recycle() {
        let heap = small_heap();
        let a = heap.allocate_bindless_srv().unwrap();
        let freed_index = a.bindless_index();
        assert_eq!(heap.free_bindless_count(), 15);

        drop(a);
        assert_eq!(heap.free_bindless_count(), 16);

        // The freed index goes to the back of the queue; drain to find it.
        let all: Vec<_> = (0..16).map(|_| heap.allocate_bindless_srv().unwrap()).collect();
        assert!(all.iter().any(|s| s.bindless_index() == freed_index));
        assert!(heap.allocate_bindless_srv().is_err());
    }

    #[test]
    fn test_per_frame_halves_alternate() {
        let heap = small_heap();
        let even = heap.reserve_per_frame_descriptors(2, 0).unwrap();
        let odd = heap.reserve_per_frame_descriptors(2, 1).unwrap();

        assert_eq!(even.heap_index(0), 16);
        assert_eq!(odd.heap_index(1), 20);

        // Frame 2 reuses the even half after its reset.
        heap.reset_per_frame_descriptors(0);
        let next_even = heap.reserve_per_frame_descriptors(4, 2).unwrap();
        assert_eq!(next_even.heap_index(2), 16);
    }

    #[test]
    fn test_per_frame_exhaustion() {
        let heap = small_heap();
        // Half size is 4.
        assert!(heap.reserve_per_frame_descriptors(4, 0).is_ok());
        assert!(matches!(
            heap.reserve_per_frame_descriptors(1, 0),
            Err(ForgeError::PerFrameDescriptorsExhausted { .. })
        ));
    }
}
