//! Software Reference Backend
//!
//! An in-process implementation of [`DeviceBackend`] with real memory
//! accounting, residency bookkeeping, and descriptor storage. The test
//! suite runs the whole engine against this backend; a native D3D12
//! backend implements the same trait against the driver instead.
//!
//! The backend is deliberately strict: invalid handles and out-of-range
//! writes panic in debug builds rather than being ignored, so engine bugs
//! surface in tests instead of disappearing into a null driver.

use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::errors::{ForgeError, Result};

use super::device::{DeviceBackend, Fence};
use super::states::ResourceStates;
use super::types::{
    ALL_SUBRESOURCES, ClearValue, CommandAllocatorId, CopyableFootprints, DescriptorContents,
    DescriptorHeapDesc, DescriptorHeapId, DescriptorHeapType, DeviceCapabilities, HeapId, HeapType,
    MemoryBudgetInfo, PageableId, QueueType, RawResourceId, ResourceAllocationInfo,
    ResourceBindingTier, ResourceDesc, ResourceHeapTier, ShaderModel, SubresourceFootprint,
    TEXTURE_ROW_PITCH_ALIGNMENT, TEXTURE_SUBRESOURCE_PLACEMENT_ALIGNMENT,
};

/// Default placed-resource alignment (64 KiB), as in D3D12.
pub const RESOURCE_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

// ============================================================================
// Configuration
// ============================================================================

/// Construction parameters for [`SoftwareDevice`].
#[derive(Clone, Copy, Debug)]
pub struct SoftwareDeviceConfig {
    /// OS budget the process is expected to stay within.
    pub memory_budget: u64,
    /// Hard capacity; `enqueue_make_resident` fails beyond this.
    pub memory_capacity: u64,
    pub resource_heap_tier: ResourceHeapTier,
    pub resource_binding_tier: ResourceBindingTier,
    pub highest_shader_model: ShaderModel,
    pub max_gpu_virtual_address_bytes: u64,
}

impl Default for SoftwareDeviceConfig {
    fn default() -> Self {
        Self {
            memory_budget: 256 * 1024 * 1024,
            memory_capacity: 512 * 1024 * 1024,
            resource_heap_tier: ResourceHeapTier::Tier2,
            resource_binding_tier: ResourceBindingTier::Tier3,
            highest_shader_model: ShaderModel { major: 6, minor: 6 },
            max_gpu_virtual_address_bytes: 1 << 40,
        }
    }
}

// ============================================================================
// Object tables
// ============================================================================

struct SoftwareHeap {
    size: u64,
    #[allow(dead_code)]
    heap_type: HeapType,
    resident: bool,
}

struct SoftwareResource {
    desc: ResourceDesc,
    #[allow(dead_code)]
    heap_type: HeapType,
    #[allow(dead_code)]
    state: ResourceStates,
    /// `Some` for committed resources, which own their memory; placed
    /// resources charge their heap instead.
    committed_size: Option<u64>,
    resident: bool,
    #[allow(dead_code)]
    clear: Option<ClearValue>,
    /// Byte storage for buffers; textures carry no CPU-visible data.
    data: Option<Vec<u8>>,
}

struct SoftwareDescriptorHeap {
    desc: DescriptorHeapDesc,
    slots: rustc_hash::FxHashMap<u32, DescriptorContents>,
}

#[derive(Default)]
struct Tables {
    heaps: SlotMap<HeapId, SoftwareHeap>,
    resources: SlotMap<RawResourceId, SoftwareResource>,
    descriptor_heaps: SlotMap<DescriptorHeapId, SoftwareDescriptorHeap>,
    allocators: SlotMap<CommandAllocatorId, QueueType>,
    current_usage: u64,
}

// ============================================================================
// SoftwareDevice
// ============================================================================

/// The software reference device.
pub struct SoftwareDevice {
    config: SoftwareDeviceConfig,
    tables: Mutex<Tables>,
}

impl SoftwareDevice {
    #[must_use]
    pub fn new(config: SoftwareDeviceConfig) -> Self {
        Self {
            config,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn pageable_size(tables: &Tables, object: PageableId) -> u64 {
        match object {
            PageableId::Heap(heap) => tables.heaps.get(heap).map_or(0, |h| h.size),
            PageableId::Resource(resource) => tables
                .resources
                .get(resource)
                .and_then(|r| r.committed_size)
                .unwrap_or(0),
        }
    }

    fn is_pageable_resident(tables: &Tables, object: PageableId) -> bool {
        match object {
            PageableId::Heap(heap) => tables.heaps.get(heap).is_some_and(|h| h.resident),
            PageableId::Resource(resource) => {
                tables.resources.get(resource).is_some_and(|r| r.resident)
            }
        }
    }

    fn set_pageable_residency(tables: &mut Tables, object: PageableId, resident: bool) {
        match object {
            PageableId::Heap(heap) => {
                if let Some(h) = tables.heaps.get_mut(heap) {
                    h.resident = resident;
                }
            }
            PageableId::Resource(resource) => {
                if let Some(r) = tables.resources.get_mut(resource) {
                    r.resident = resident;
                }
            }
        }
    }

    // ── Test support ───────────────────────────────────────────────────────

    /// Current device-local memory usage in bytes.
    #[must_use]
    pub fn current_usage(&self) -> u64 {
        self.tables.lock().current_usage
    }

    /// Residency status of a pageable object.
    #[must_use]
    pub fn is_resident(&self, object: PageableId) -> bool {
        Self::is_pageable_resident(&self.tables.lock(), object)
    }

    /// The description a resource was created with.
    #[must_use]
    pub fn resource_desc(&self, resource: RawResourceId) -> Option<ResourceDesc> {
        self.tables.lock().resources.get(resource).map(|r| r.desc.clone())
    }

    /// The contents of one descriptor slot, if it has been written.
    #[must_use]
    pub fn descriptor(&self, heap: DescriptorHeapId, index: u32) -> Option<DescriptorContents> {
        self.tables
            .lock()
            .descriptor_heaps
            .get(heap)
            .and_then(|h| h.slots.get(&index).copied())
    }
}

impl DeviceBackend for SoftwareDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            resource_heap_tier: self.config.resource_heap_tier,
            resource_binding_tier: self.config.resource_binding_tier,
            highest_shader_model: self.config.highest_shader_model,
            max_gpu_virtual_address_bytes: self.config.max_gpu_virtual_address_bytes,
        }
    }

    fn memory_budget(&self) -> MemoryBudgetInfo {
        MemoryBudgetInfo {
            budget: self.config.memory_budget,
            current_usage: self.tables.lock().current_usage,
        }
    }

    fn create_heap(&self, size_in_bytes: u64, heap_type: HeapType) -> Result<HeapId> {
        let mut tables = self.tables.lock();
        if tables.current_usage + size_in_bytes > self.config.memory_capacity {
            return Err(ForgeError::OutOfGpuMemory);
        }

        tables.current_usage += size_in_bytes;
        Ok(tables.heaps.insert(SoftwareHeap {
            size: size_in_bytes,
            heap_type,
            resident: true,
        }))
    }

    fn destroy_heap(&self, heap: HeapId) {
        let mut tables = self.tables.lock();
        if let Some(removed) = tables.heaps.remove(heap) {
            if removed.resident {
                tables.current_usage -= removed.size;
            }
        }
    }

    fn create_placed_resource(
        &self,
        heap: HeapId,
        offset: u64,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
        clear: Option<ClearValue>,
    ) -> Result<RawResourceId> {
        let mut tables = self.tables.lock();
        let Some(owning_heap) = tables.heaps.get(heap) else {
            return Err(ForgeError::DeviceError("placed resource targets a destroyed heap".into()));
        };

        let info = self.resource_allocation_info(desc);
        if offset + info.size_in_bytes > owning_heap.size {
            return Err(ForgeError::DeviceError(format!(
                "placed resource range [{}, {}) exceeds heap size {}",
                offset,
                offset + info.size_in_bytes,
                owning_heap.size
            )));
        }

        let data = desc.is_buffer().then(|| vec![0u8; desc.width as usize]);
        Ok(tables.resources.insert(SoftwareResource {
            desc: desc.clone(),
            heap_type: HeapType::Default,
            state: initial_state,
            committed_size: None,
            resident: true,
            clear,
            data,
        }))
    }

    fn create_committed_resource(
        &self,
        heap_type: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
        clear: Option<ClearValue>,
    ) -> Result<RawResourceId> {
        let info = self.resource_allocation_info(desc);

        let mut tables = self.tables.lock();
        if tables.current_usage + info.size_in_bytes > self.config.memory_capacity {
            return Err(ForgeError::OutOfGpuMemory);
        }

        tables.current_usage += info.size_in_bytes;
        let data = desc.is_buffer().then(|| vec![0u8; desc.width as usize]);
        Ok(tables.resources.insert(SoftwareResource {
            desc: desc.clone(),
            heap_type,
            state: initial_state,
            committed_size: Some(info.size_in_bytes),
            resident: true,
            clear,
            data,
        }))
    }

    fn destroy_resource(&self, resource: RawResourceId) {
        let mut tables = self.tables.lock();
        if let Some(removed) = tables.resources.remove(resource) {
            if removed.resident {
                if let Some(size) = removed.committed_size {
                    tables.current_usage -= size;
                }
            }
        }
    }

    fn resource_allocation_info(&self, desc: &ResourceDesc) -> ResourceAllocationInfo {
        let raw_size = if desc.is_buffer() {
            desc.width
        } else {
            let mut total = 0u64;
            for mip in 0..u32::from(desc.mip_levels) {
                let width = (desc.width >> mip).max(1);
                let height = u64::from((desc.height >> mip).max(1));
                total += width * height * u64::from(desc.format.bytes_per_texel());
            }
            total * u64::from(desc.depth_or_array_size)
        };

        ResourceAllocationInfo {
            size_in_bytes: align_up(raw_size.max(1), RESOURCE_PLACEMENT_ALIGNMENT),
            alignment: RESOURCE_PLACEMENT_ALIGNMENT,
        }
    }

    fn copyable_footprints(
        &self,
        desc: &ResourceDesc,
        first_subresource: u32,
        subresource_count: u32,
        base_offset: u64,
    ) -> CopyableFootprints {
        debug_assert!(first_subresource != ALL_SUBRESOURCES);

        let mut footprints = Vec::with_capacity(subresource_count as usize);
        let mut offset = align_up(base_offset, TEXTURE_SUBRESOURCE_PLACEMENT_ALIGNMENT);
        let mip_count = u32::from(desc.mip_levels).max(1);

        for subresource in first_subresource..first_subresource + subresource_count {
            let mip = subresource % mip_count;
            let (row_count, unpadded_row_size) = if desc.is_buffer() {
                (1, desc.width)
            } else {
                let width = (desc.width >> mip).max(1);
                let height = (desc.height >> mip).max(1);
                (height, width * u64::from(desc.format.bytes_per_texel()))
            };

            let row_pitch = align_up(unpadded_row_size, TEXTURE_ROW_PITCH_ALIGNMENT);
            footprints.push(SubresourceFootprint {
                offset,
                row_pitch,
                row_count,
                unpadded_row_size,
            });

            offset = align_up(
                offset + row_pitch * u64::from(row_count),
                TEXTURE_SUBRESOURCE_PLACEMENT_ALIGNMENT,
            );
        }

        CopyableFootprints {
            total_bytes: offset - base_offset,
            footprints,
        }
    }

    fn write_buffer(&self, resource: RawResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let mut tables = self.tables.lock();
        let Some(target) = tables.resources.get_mut(resource) else {
            return Err(ForgeError::DeviceError("write to a destroyed resource".into()));
        };
        let Some(bytes) = target.data.as_mut() else {
            return Err(ForgeError::DeviceError("CPU write to a non-buffer resource".into()));
        };

        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(ForgeError::DeviceError(format!(
                "buffer write range [{start}, {end}) exceeds buffer size {}",
                bytes.len()
            )));
        }

        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, resource: RawResourceId, offset: u64, data: &mut [u8]) -> Result<()> {
        let tables = self.tables.lock();
        let Some(source) = tables.resources.get(resource) else {
            return Err(ForgeError::DeviceError("read from a destroyed resource".into()));
        };
        let Some(bytes) = source.data.as_ref() else {
            return Err(ForgeError::DeviceError("CPU read from a non-buffer resource".into()));
        };

        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(ForgeError::DeviceError(format!(
                "buffer read range [{start}, {end}) exceeds buffer size {}",
                bytes.len()
            )));
        }

        data.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<DescriptorHeapId> {
        Ok(self.tables.lock().descriptor_heaps.insert(SoftwareDescriptorHeap {
            desc: *desc,
            slots: rustc_hash::FxHashMap::default(),
        }))
    }

    fn write_descriptor(&self, heap: DescriptorHeapId, index: u32, contents: DescriptorContents) {
        let mut tables = self.tables.lock();
        let Some(target) = tables.descriptor_heaps.get_mut(heap) else {
            debug_assert!(false, "descriptor write to a destroyed heap");
            return;
        };
        debug_assert!(index < target.desc.descriptor_count, "descriptor index out of range");
        target.slots.insert(index, contents);
    }

    fn copy_descriptors(
        &self,
        dst_heap: DescriptorHeapId,
        dst_start: u32,
        src_heap: DescriptorHeapId,
        src_start: u32,
        count: u32,
    ) {
        let mut tables = self.tables.lock();

        let copied: Vec<Option<DescriptorContents>> = {
            let Some(src) = tables.descriptor_heaps.get(src_heap) else {
                debug_assert!(false, "descriptor copy from a destroyed heap");
                return;
            };
            (0..count)
                .map(|i| src.slots.get(&(src_start + i)).copied())
                .collect()
        };

        let Some(dst) = tables.descriptor_heaps.get_mut(dst_heap) else {
            debug_assert!(false, "descriptor copy to a destroyed heap");
            return;
        };
        debug_assert!(dst_start + count <= dst.desc.descriptor_count);

        for (i, contents) in copied.into_iter().enumerate() {
            let index = dst_start + i as u32;
            match contents {
                Some(contents) => {
                    dst.slots.insert(index, contents);
                }
                None => {
                    dst.slots.remove(&index);
                }
            }
        }
    }

    fn descriptor_handle_increment_size(&self, _heap_type: DescriptorHeapType) -> u32 {
        32
    }

    fn enqueue_make_resident(
        &self,
        objects: &[PageableId],
        fence: &Fence,
        signal_value: u64,
    ) -> Result<()> {
        let mut tables = self.tables.lock();

        let delta: u64 = objects
            .iter()
            .filter(|object| !Self::is_pageable_resident(&tables, **object))
            .map(|object| Self::pageable_size(&tables, *object))
            .sum();

        if tables.current_usage + delta > self.config.memory_capacity {
            return Err(ForgeError::OutOfGpuMemory);
        }

        for object in objects {
            if !Self::is_pageable_resident(&tables, *object) {
                Self::set_pageable_residency(&mut tables, *object, true);
            }
        }
        tables.current_usage += delta;
        drop(tables);

        // The software device completes residency work immediately.
        fence.signal(signal_value);
        Ok(())
    }

    fn evict(&self, objects: &[PageableId]) -> Result<()> {
        let mut tables = self.tables.lock();

        for object in objects {
            if Self::is_pageable_resident(&tables, *object) {
                let size = Self::pageable_size(&tables, *object);
                Self::set_pageable_residency(&mut tables, *object, false);
                tables.current_usage -= size;
            }
        }

        Ok(())
    }

    fn create_command_allocator(&self, queue_type: QueueType) -> CommandAllocatorId {
        self.tables.lock().allocators.insert(queue_type)
    }

    fn reset_command_allocator(&self, allocator: CommandAllocatorId) {
        debug_assert!(
            self.tables.lock().allocators.contains_key(allocator),
            "reset of a destroyed command allocator"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::types::Format;

    #[test]
    fn test_memory_accounting_tracks_heaps_and_eviction() {
        let device = SoftwareDevice::new(SoftwareDeviceConfig {
            memory_budget: 1 << 20,
            memory_capacity: 2 << 20,
            ..SoftwareDeviceConfig::default()
        });

        let heap = device.create_heap(512 * 1024, HeapType::Default).unwrap();
        assert_eq!(device.current_usage(), 512 * 1024);

        device.evict(&[PageableId::Heap(heap)]).unwrap();
        assert_eq!(device.current_usage(), 0);
        assert!(!device.is_resident(PageableId::Heap(heap)));

        let fence = Fence::new(0);
        device
            .enqueue_make_resident(&[PageableId::Heap(heap)], &fence, 1)
            .unwrap();
        assert!(fence.is_complete(1));
        assert_eq!(device.current_usage(), 512 * 1024);
    }

    #[test]
    fn test_make_resident_fails_past_capacity() {
        let device = SoftwareDevice::new(SoftwareDeviceConfig {
            memory_budget: 1 << 20,
            memory_capacity: 1 << 20,
            ..SoftwareDeviceConfig::default()
        });

        let first = device.create_heap(512 * 1024, HeapType::Default).unwrap();
        let second = device.create_heap(256 * 1024, HeapType::Default).unwrap();
        device.evict(&[PageableId::Heap(second)]).unwrap();

        // Another allocation fills the freed space.
        let _third = device.create_heap(512 * 1024, HeapType::Default).unwrap();

        let fence = Fence::new(0);
        let result = device.enqueue_make_resident(&[PageableId::Heap(second)], &fence, 1);
        assert!(matches!(result, Err(ForgeError::OutOfGpuMemory)));
        assert!(!fence.is_complete(1));
        let _ = first;
    }

    #[test]
    fn test_copyable_footprints_alignment() {
        let device = SoftwareDevice::new(SoftwareDeviceConfig::default());
        let desc = ResourceDesc::texture_2d(Format::Rgba8Unorm, 100, 50, 2);

        let footprints = device.copyable_footprints(&desc, 0, 2, 0);
        assert_eq!(footprints.footprints.len(), 2);

        let mip0 = footprints.footprints[0];
        assert_eq!(mip0.unpadded_row_size, 400);
        assert_eq!(mip0.row_pitch, 512);
        assert_eq!(mip0.row_count, 50);

        let mip1 = footprints.footprints[1];
        assert_eq!(mip1.offset % TEXTURE_SUBRESOURCE_PLACEMENT_ALIGNMENT, 0);
        assert_eq!(mip1.unpadded_row_size, 200);
        assert_eq!(mip1.row_pitch, 256);
    }
}
