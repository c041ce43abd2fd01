//! Buffer Resources
//!
//! [`BufferResource`] pairs a buffer [`GpuResource`] with its TLSF
//! sub-allocation manager. Writes performed before the GPU resource
//! exists are queued by the manager and flushed when creation completes.

use std::sync::Arc;

use crate::memory::suballoc::{
    BufferSubAllocationManager, BufferSubAllocationReservation, ConstantBufferSubAllocation,
    StructuredBufferSubAllocation, TextureCopySubAllocation, UavCounterSubAllocation,
};
use crate::errors::Result;
use crate::rhi::device::Device;
use crate::rhi::types::{HeapType, ResourceDesc};

use super::{CreationPreference, GpuResource, GpuResourceCreateInfo, LifetimeType};

/// A buffer resource with sub-allocation support.
pub struct BufferResource {
    resource: Arc<GpuResource>,
    suballocations: BufferSubAllocationManager,
}

impl BufferResource {
    /// Creates the engine-side wrapper; GPU memory is allocated later by
    /// the persistent or transient resource manager.
    #[must_use]
    pub fn new(
        device: Device,
        lifetime: LifetimeType,
        size_in_bytes: u64,
        heap_type: HeapType,
        name: impl Into<String>,
    ) -> Self {
        let resource = GpuResource::new(
            device.clone(),
            lifetime,
            GpuResourceCreateInfo {
                heap_type,
                creation_preference: CreationPreference::Placed,
                ..GpuResourceCreateInfo::new(ResourceDesc::buffer(size_in_bytes), name)
            },
        );

        let suballocations =
            BufferSubAllocationManager::new(device, heap_type, size_in_bytes);

        // Flush queued sub-allocation writes whenever the backend buffer
        // is (re-)created.
        {
            let suballocations = suballocations.clone();
            resource.add_post_init_hook(move |raw| suballocations.on_resource_created(raw));
        }

        Self {
            resource,
            suballocations,
        }
    }

    /// The underlying resource (for pass dependencies).
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &Arc<GpuResource> {
        &self.resource
    }

    /// The sub-allocation manager.
    #[inline]
    #[must_use]
    pub fn suballocations(&self) -> &BufferSubAllocationManager {
        &self.suballocations
    }

    /// Reserves an untyped byte range.
    pub fn reserve(&self, size: u64, alignment: u64) -> Result<BufferSubAllocationReservation> {
        self.suballocations.reserve(size, alignment)
    }

    /// Reserves a 256-byte-aligned constant-buffer slot for one `T`.
    pub fn reserve_constant_buffer<T: bytemuck::Pod>(
        &self,
    ) -> Result<ConstantBufferSubAllocation<T>> {
        ConstantBufferSubAllocation::new(&self.suballocations)
    }

    /// Reserves an element-aligned structured-buffer range.
    pub fn reserve_structured_buffer<T: bytemuck::Pod>(
        &self,
        len: u64,
    ) -> Result<StructuredBufferSubAllocation<T>> {
        StructuredBufferSubAllocation::new(&self.suballocations, len)
    }

    /// Reserves a 4096-byte-aligned UAV counter slot.
    pub fn reserve_uav_counter(&self) -> Result<UavCounterSubAllocation> {
        UavCounterSubAllocation::new(&self.suballocations)
    }

    /// Reserves texture upload/readback staging space with D3D12
    /// placement alignment.
    pub fn reserve_texture_copy(
        &self,
        texture_desc: &ResourceDesc,
        first_subresource: u32,
        subresource_count: u32,
    ) -> Result<TextureCopySubAllocation> {
        TextureCopySubAllocation::new(
            &self.suballocations,
            self.resource.device(),
            texture_desc,
            first_subresource,
            subresource_count,
        )
    }
}
