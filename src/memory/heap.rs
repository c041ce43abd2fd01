//! GPU Heap Management
//!
//! Pools of GPU memory heaps from which placed resources are allocated.
//! Each heap owns a buddy allocator over its byte range and is registered
//! as a pageable object so the residency manager can page it in and out
//! as a whole.
//!
//! On resource-heap-tier-1 hardware a heap may only hold one class of
//! resource (buffers, render-target/depth-stencil textures, or all other
//! textures); tier 2 lifts the restriction. [`HeapClass`] encodes the
//! classification and the pool keys its heaps by it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::{ForgeError, Result};
use crate::rhi::device::Device;
use crate::rhi::types::{HeapId, HeapType, PageableId, ResourceDesc, ResourceFlags, ResourceHeapTier};

use super::buddy::{BuddyAllocator, BuddyBlock};
use super::residency::{GpuResidencyManager, PageableGpuObject};

/// Default size of a newly created heap. Requests larger than this get a
/// dedicated heap of the next power of two.
pub const DEFAULT_HEAP_SIZE: u64 = 32 * 1024 * 1024;

// ============================================================================
// Heap classes
// ============================================================================

/// Resource class for heap-tier-1 placement rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapClass {
    Buffers,
    RenderTargetTextures,
    NonRenderTargetTextures,
}

impl HeapClass {
    /// Classifies a resource description.
    #[must_use]
    pub fn of(desc: &ResourceDesc) -> Self {
        if desc.is_buffer() {
            Self::Buffers
        } else if desc
            .flags
            .intersects(ResourceFlags::ALLOW_RENDER_TARGET | ResourceFlags::ALLOW_DEPTH_STENCIL)
        {
            Self::RenderTargetTextures
        } else {
            Self::NonRenderTargetTextures
        }
    }
}

/// Returns `true` if resources of the given classes may share one heap on
/// a device of the given tier.
#[must_use]
pub fn can_classes_share_heap(
    tier: ResourceHeapTier,
    classes: impl IntoIterator<Item = HeapClass>,
) -> bool {
    match tier {
        ResourceHeapTier::Tier2 => true,
        ResourceHeapTier::Tier1 => {
            let mut iter = classes.into_iter();
            let Some(first) = iter.next() else {
                return true;
            };
            iter.all(|class| class == first)
        }
    }
}

// ============================================================================
// GpuHeap
// ============================================================================

/// One GPU memory heap and its sub-allocator.
pub struct GpuHeap {
    id: HeapId,
    size: u64,
    heap_type: HeapType,
    class: HeapClass,
    allocator: Mutex<BuddyAllocator>,
    device: Device,
    resident: AtomicBool,
    needs_residency: AtomicBool,
    deleted: AtomicBool,
}

impl GpuHeap {
    fn create(device: &Device, size: u64, heap_type: HeapType, class: HeapClass) -> Result<Arc<Self>> {
        let id = device.backend().create_heap(size, heap_type)?;
        Ok(Arc::new(Self {
            id,
            size,
            heap_type,
            class,
            allocator: Mutex::new(BuddyAllocator::new(size)),
            device: device.clone(),
            resident: AtomicBool::new(true),
            needs_residency: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }))
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> HeapId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    #[inline]
    #[must_use]
    pub fn class(&self) -> HeapClass {
        self.class
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

impl PageableGpuObject for GpuHeap {
    fn pageable_id(&self) -> PageableId {
        PageableId::Heap(self.id)
    }

    fn is_resident(&self) -> bool {
        self.resident.load(Ordering::Acquire)
    }

    fn set_resident(&self, resident: bool) {
        self.resident.store(resident, Ordering::Release);
    }

    fn needs_residency_this_frame(&self) -> bool {
        self.needs_residency.load(Ordering::Relaxed)
    }

    fn set_needs_residency(&self, needed: bool) {
        self.needs_residency.store(needed, Ordering::Relaxed);
    }

    fn is_deletion_safe(&self) -> bool {
        // A heap is only deletable while no placed resource occupies it.
        !self.is_deleted() && {
            let allocator = self.allocator.lock();
            allocator.free_bytes() == allocator.total_bytes()
        }
    }

    fn delete_gpu_object(&self) {
        if !self.deleted.swap(true, Ordering::AcqRel) {
            self.device.backend().destroy_heap(self.id);
        }
    }

    fn gpu_memory_size(&self) -> u64 {
        self.size
    }

    fn usage_metric(&self) -> f32 {
        // Heaps have no direct usage signal; an empty heap is cold, a
        // heap with live allocations is warm.
        let allocator = self.allocator.lock();
        if allocator.free_bytes() == allocator.total_bytes() {
            0.0
        } else {
            1.0 - (allocator.free_bytes() as f32 / allocator.total_bytes() as f32)
        }
    }
}

// ============================================================================
// HeapAllocation
// ============================================================================

/// A live region inside a [`GpuHeap`]. The region is returned to the
/// heap's allocator on drop.
pub struct HeapAllocation {
    heap: Arc<GpuHeap>,
    block: BuddyBlock,
}

impl HeapAllocation {
    /// The owning heap.
    #[inline]
    #[must_use]
    pub fn heap(&self) -> &Arc<GpuHeap> {
        &self.heap
    }

    /// Byte offset of the region inside the heap.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.block.offset()
    }

    /// Region size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.block.size()
    }
}

impl Drop for HeapAllocation {
    fn drop(&mut self) {
        self.heap.allocator.lock().free(self.block);
    }
}

// ============================================================================
// GpuResourceHeapManager
// ============================================================================

/// Pool of heaps grouped by heap type and class.
pub struct GpuResourceHeapManager {
    device: Device,
    residency: Arc<GpuResidencyManager>,
    default_heap_size: u64,
    pools: Mutex<FxHashMap<(HeapType, HeapClass), Vec<Arc<GpuHeap>>>>,
}

impl GpuResourceHeapManager {
    #[must_use]
    pub fn new(device: Device, residency: Arc<GpuResidencyManager>) -> Self {
        Self::with_default_heap_size(device, residency, DEFAULT_HEAP_SIZE)
    }

    /// Pool with a custom default heap size (tests use small heaps).
    #[must_use]
    pub fn with_default_heap_size(
        device: Device,
        residency: Arc<GpuResidencyManager>,
        default_heap_size: u64,
    ) -> Self {
        Self {
            device,
            residency,
            default_heap_size,
            pools: Mutex::new(FxHashMap::default()),
        }
    }

    /// The device's resource heap tier.
    #[must_use]
    pub fn heap_tier(&self) -> ResourceHeapTier {
        self.device.capabilities().resource_heap_tier
    }

    /// Returns `true` if resources of the given classes may share a heap
    /// on this device.
    #[must_use]
    pub fn can_classes_alias(&self, classes: impl IntoIterator<Item = HeapClass>) -> bool {
        can_classes_share_heap(self.heap_tier(), classes)
    }

    /// Allocates a region for a resource of the given class.
    pub fn allocate(
        &self,
        size: u64,
        heap_type: HeapType,
        class: HeapClass,
    ) -> Result<HeapAllocation> {
        let key = (heap_type, class);
        let mut pools = self.pools.lock();
        let heaps = pools.entry(key).or_default();

        heaps.retain(|heap| !heap.is_deleted());

        for heap in heaps.iter() {
            if let Some(block) = heap.allocator.lock().allocate(size) {
                return Ok(HeapAllocation {
                    heap: Arc::clone(heap),
                    block,
                });
            }
        }

        // No existing heap can serve the request; grow the pool.
        let heap_size = self.default_heap_size.max(size.next_power_of_two());
        let heap = GpuHeap::create(&self.device, heap_size, heap_type, class)?;
        let heap_dyn: Arc<dyn PageableGpuObject> = Arc::clone(&heap) as Arc<dyn PageableGpuObject>;
        let pageable: std::sync::Weak<dyn PageableGpuObject> = Arc::downgrade(&heap_dyn);
        self.residency.register(pageable);
        log::info!(
            "Heap pool: created {heap_size} byte {heap_type:?}/{class:?} heap ({} total)",
            heaps.len() + 1
        );

        let block = heap
            .allocator
            .lock()
            .allocate(size)
            .ok_or_else(|| ForgeError::HeapAllocationFailed {
                size,
                reason: "freshly created heap cannot hold the request".into(),
            })?;

        heaps.push(Arc::clone(&heap));
        Ok(HeapAllocation { heap, block })
    }

    /// Allocates one shared region for a group of aliasable resources.
    ///
    /// The region is sized for the largest member; every member is placed
    /// at the region's base offset.
    pub fn allocate_aliased(
        &self,
        max_member_size: u64,
        heap_type: HeapType,
        classes: impl IntoIterator<Item = HeapClass> + Clone,
    ) -> Result<Arc<HeapAllocation>> {
        debug_assert!(
            self.can_classes_alias(classes.clone()),
            "aliasable group violates the device's heap tier rules"
        );

        // Tier-1 groups are class-uniform, so the first class keys the pool.
        let class = classes
            .into_iter()
            .next()
            .unwrap_or(HeapClass::NonRenderTargetTextures);

        Ok(Arc::new(self.allocate(max_member_size, heap_type, class)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};
    use crate::rhi::types::Format;

    fn test_manager() -> GpuResourceHeapManager {
        let backend = Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()));
        let device = Device::new(backend).unwrap();
        let residency = Arc::new(GpuResidencyManager::new(device.clone()));
        GpuResourceHeapManager::with_default_heap_size(device, residency, 1 << 20)
    }

    #[test]
    fn test_heap_class_rules() {
        let buffer = ResourceDesc::buffer(1024);
        let texture = ResourceDesc::texture_2d(Format::Rgba8Unorm, 64, 64, 1);
        let rt = ResourceDesc {
            flags: ResourceFlags::ALLOW_RENDER_TARGET,
            ..texture.clone()
        };

        assert_eq!(HeapClass::of(&buffer), HeapClass::Buffers);
        assert_eq!(HeapClass::of(&texture), HeapClass::NonRenderTargetTextures);
        assert_eq!(HeapClass::of(&rt), HeapClass::RenderTargetTextures);

        assert!(can_classes_share_heap(
            ResourceHeapTier::Tier2,
            [HeapClass::Buffers, HeapClass::RenderTargetTextures],
        ));
        assert!(!can_classes_share_heap(
            ResourceHeapTier::Tier1,
            [HeapClass::Buffers, HeapClass::RenderTargetTextures],
        ));
        assert!(can_classes_share_heap(
            ResourceHeapTier::Tier1,
            [HeapClass::Buffers, HeapClass::Buffers],
        ));
    }

    #[test]
    fn test_allocations_reuse_heaps() {
        let manager = test_manager();

        let a = manager
            .allocate(128 * 1024, HeapType::Default, HeapClass::Buffers)
            .unwrap();
        let b = manager
            .allocate(128 * 1024, HeapType::Default, HeapClass::Buffers)
            .unwrap();
        assert_eq!(a.heap().id(), b.heap().id());
        assert_ne!(a.offset(), b.offset());

        let heap = Arc::clone(a.heap());
        drop(a);
        drop(b);
        assert!(heap.is_deletion_safe());
    }

    #[test]
    fn test_oversized_request_gets_dedicated_heap() {
        let manager = test_manager();
        let big = manager
            .allocate(3 << 20, HeapType::Default, HeapClass::Buffers)
            .unwrap();
        assert!(big.heap().size() >= 3 << 20);
    }
}
