//! Buffer Sub-Allocation
//!
//! Carves typed sub-allocations out of one buffer resource with a TLSF
//! allocator: constant buffers (256 B aligned), structured buffers
//! (element aligned), UAV counters (4096 B aligned), and texture
//! copy regions (rows padded to 256 B, subresource bases to 512 B).
//!
//! The owning buffer's GPU resource may not exist yet when the first
//! writes arrive (transient buffers are created during frame
//! compilation). Writes issued before creation are queued in CPU memory
//! and flushed in a single pass when
//! [`BufferSubAllocationManager::on_resource_created`] runs.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{ForgeError, Result};
use crate::rhi::device::Device;
use crate::rhi::types::{
    CONSTANT_BUFFER_ALIGNMENT, CopyableFootprints, HeapType, RawResourceId, ResourceDesc,
    TEXTURE_SUBRESOURCE_PLACEMENT_ALIGNMENT, UAV_COUNTER_ALIGNMENT,
};

use super::tlsf::{TlsfAllocator, TlsfBlock};

enum Backing {
    /// The GPU resource does not exist yet; writes are buffered.
    Pending { queued_writes: Vec<QueuedWrite> },
    /// The GPU resource is live.
    Created { raw: RawResourceId },
}

struct QueuedWrite {
    offset: u64,
    data: Vec<u8>,
}

struct SubAllocInner {
    device: Device,
    heap_type: HeapType,
    allocator: Mutex<TlsfAllocator>,
    backing: Mutex<Backing>,
}

// ============================================================================
// Manager
// ============================================================================

/// TLSF-backed sub-allocation manager for one buffer resource.
///
/// Cloning yields another handle to the same manager; reservations keep
/// it alive until they are dropped.
#[derive(Clone)]
pub struct BufferSubAllocationManager {
    inner: Arc<SubAllocInner>,
}

impl BufferSubAllocationManager {
    #[must_use]
    pub fn new(device: Device, heap_type: HeapType, size_in_bytes: u64) -> Self {
        Self {
            inner: Arc::new(SubAllocInner {
                device,
                heap_type,
                allocator: Mutex::new(TlsfAllocator::new(size_in_bytes)),
                backing: Mutex::new(Backing::Pending {
                    queued_writes: Vec::new(),
                }),
            }),
        }
    }

    /// Heap type of the owning buffer.
    #[must_use]
    pub fn heap_type(&self) -> HeapType {
        self.inner.heap_type
    }

    /// Raw reservation of `size` bytes at `alignment`.
    pub fn reserve(&self, size: u64, alignment: u64) -> Result<BufferSubAllocationReservation> {
        let block = self
            .inner
            .allocator
            .lock()
            .allocate(size, alignment)
            .ok_or(ForgeError::SubAllocationFailed { size, alignment })?;

        Ok(BufferSubAllocationReservation {
            inner: Arc::clone(&self.inner),
            block,
            size,
        })
    }

    /// Connects the manager to its created GPU resource and flushes every
    /// queued write in one pass over the mapped buffer.
    pub fn on_resource_created(&self, raw: RawResourceId) -> Result<()> {
        let mut backing = self.inner.backing.lock();

        let queued = match &mut *backing {
            Backing::Pending { queued_writes } => std::mem::take(queued_writes),
            Backing::Created { .. } => {
                debug_assert!(false, "buffer resource created twice");
                Vec::new()
            }
        };
        *backing = Backing::Created { raw };

        // Queued writes only exist for upload-heap buffers; default-heap
        // buffers are filled through copy passes instead.
        if self.inner.heap_type == HeapType::Upload {
            for write in &queued {
                self.inner
                    .device
                    .backend()
                    .write_buffer(raw, write.offset, &write.data)?;
            }
            if !queued.is_empty() {
                log::debug!(
                    "Flushed {} queued sub-allocation write(s) to the created buffer",
                    queued.len()
                );
            }
        }

        Ok(())
    }

    /// The created GPU resource, if any.
    #[must_use]
    pub fn raw_resource(&self) -> Option<RawResourceId> {
        match &*self.inner.backing.lock() {
            Backing::Created { raw } => Some(*raw),
            Backing::Pending { .. } => None,
        }
    }

    fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        debug_assert_eq!(
            self.inner.heap_type,
            HeapType::Upload,
            "direct CPU writes require an upload-heap buffer"
        );

        let mut backing = self.inner.backing.lock();
        match &mut *backing {
            Backing::Created { raw } => {
                let raw = *raw;
                drop(backing);
                self.inner.device.backend().write_buffer(raw, offset, data)
            }
            Backing::Pending { queued_writes } => {
                queued_writes.push(QueuedWrite {
                    offset,
                    data: data.to_vec(),
                });
                Ok(())
            }
        }
    }

    fn read_bytes(&self, offset: u64, data: &mut [u8]) -> Result<()> {
        let backing = self.inner.backing.lock();
        match &*backing {
            Backing::Created { raw } => {
                let raw = *raw;
                drop(backing);
                self.inner.device.backend().read_buffer(raw, offset, data)
            }
            Backing::Pending { .. } => Err(ForgeError::DeviceError(
                "read from a buffer whose GPU resource has not been created".into(),
            )),
        }
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// A byte range reserved inside the owning buffer. The range returns to
/// the TLSF allocator on drop.
pub struct BufferSubAllocationReservation {
    inner: Arc<SubAllocInner>,
    block: TlsfBlock,
    size: u64,
}

impl BufferSubAllocationReservation {
    /// Byte offset inside the owning buffer.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.block.offset()
    }

    /// Reserved size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    fn manager(&self) -> BufferSubAllocationManager {
        BufferSubAllocationManager {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for BufferSubAllocationReservation {
    fn drop(&mut self) {
        self.inner.allocator.lock().free(self.block);
    }
}

// ============================================================================
// Typed sub-allocations
// ============================================================================

/// A 256-byte-aligned constant-buffer range holding one `T`.
pub struct ConstantBufferSubAllocation<T: bytemuck::Pod> {
    reservation: BufferSubAllocationReservation,
    _marker: std::marker::PhantomData<T>,
}

impl<T: bytemuck::Pod> ConstantBufferSubAllocation<T> {
    pub fn new(manager: &BufferSubAllocationManager) -> Result<Self> {
        let size = (std::mem::size_of::<T>() as u64).next_multiple_of(CONSTANT_BUFFER_ALIGNMENT);
        Ok(Self {
            reservation: manager.reserve(size, CONSTANT_BUFFER_ALIGNMENT)?,
            _marker: std::marker::PhantomData,
        })
    }

    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.reservation.offset()
    }

    pub fn write(&self, value: &T) -> Result<()> {
        self.reservation
            .manager()
            .write_bytes(self.reservation.offset(), bytemuck::bytes_of(value))
    }
}

/// An element-aligned structured-buffer range holding `len` elements.
pub struct StructuredBufferSubAllocation<T: bytemuck::Pod> {
    reservation: BufferSubAllocationReservation,
    len: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: bytemuck::Pod> StructuredBufferSubAllocation<T> {
    pub fn new(manager: &BufferSubAllocationManager, len: u64) -> Result<Self> {
        let element_size = std::mem::size_of::<T>() as u64;
        debug_assert!(element_size > 0);
        Ok(Self {
            reservation: manager.reserve(element_size * len, element_size.next_power_of_two())?,
            len,
            _marker: std::marker::PhantomData,
        })
    }

    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.reservation.offset()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes elements starting at element index `first`.
    pub fn write_elements(&self, first: u64, elements: &[T]) -> Result<()> {
        debug_assert!(first + elements.len() as u64 <= self.len, "structured-buffer write out of bounds");
        let element_size = std::mem::size_of::<T>() as u64;
        self.reservation.manager().write_bytes(
            self.reservation.offset() + first * element_size,
            bytemuck::cast_slice(elements),
        )
    }

    /// Reads elements back (readback-heap buffers).
    pub fn read_elements(&self, first: u64, out: &mut [T]) -> Result<()> {
        debug_assert!(first + out.len() as u64 <= self.len);
        let element_size = std::mem::size_of::<T>() as u64;
        self.reservation.manager().read_bytes(
            self.reservation.offset() + first * element_size,
            bytemuck::cast_slice_mut(out),
        )
    }
}

/// A 4096-byte-aligned UAV counter slot.
pub struct UavCounterSubAllocation {
    reservation: BufferSubAllocationReservation,
}

impl UavCounterSubAllocation {
    pub fn new(manager: &BufferSubAllocationManager) -> Result<Self> {
        Ok(Self {
            reservation: manager.reserve(
                std::mem::size_of::<u32>() as u64,
                UAV_COUNTER_ALIGNMENT,
            )?,
        })
    }

    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.reservation.offset()
    }

    /// Resets the counter value (upload-heap staging only).
    pub fn write_counter(&self, value: u32) -> Result<()> {
        self.reservation
            .manager()
            .write_bytes(self.reservation.offset(), bytemuck::bytes_of(&value))
    }
}

/// A texture upload/readback staging range with per-subresource
/// placement footprints.
pub struct TextureCopySubAllocation {
    reservation: BufferSubAllocationReservation,
    footprints: CopyableFootprints,
}

impl TextureCopySubAllocation {
    /// Reserves staging space for `subresource_count` subresources of the
    /// described texture, starting at `first_subresource`.
    pub fn new(
        manager: &BufferSubAllocationManager,
        device: &Device,
        desc: &ResourceDesc,
        first_subresource: u32,
        subresource_count: u32,
    ) -> Result<Self> {
        let footprints =
            device
                .backend()
                .copyable_footprints(desc, first_subresource, subresource_count, 0);
        let reservation = manager.reserve(
            footprints.total_bytes,
            TEXTURE_SUBRESOURCE_PLACEMENT_ALIGNMENT,
        )?;

        Ok(Self {
            reservation,
            footprints,
        })
    }

    #[inline]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.reservation.offset()
    }

    /// The placement footprints, relative to [`offset`](Self::offset).
    #[must_use]
    pub fn footprints(&self) -> &CopyableFootprints {
        &self.footprints
    }

    /// Writes one subresource's texel rows, padding each row out to the
    /// footprint's row pitch.
    pub fn write_subresource(&self, footprint_index: usize, texel_rows: &[u8]) -> Result<()> {
        let footprint = self.footprints.footprints[footprint_index];
        let row_size = footprint.unpadded_row_size as usize;
        debug_assert_eq!(
            texel_rows.len(),
            row_size * footprint.row_count as usize,
            "texel data does not match the subresource footprint"
        );

        let manager = self.reservation.manager();
        let base = self.reservation.offset() + footprint.offset;
        for row in 0..footprint.row_count as usize {
            manager.write_bytes(
                base + row as u64 * footprint.row_pitch,
                &texel_rows[row * row_size..(row + 1) * row_size],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};
    use crate::rhi::types::Format;

    fn upload_manager(size: u64) -> (Device, BufferSubAllocationManager) {
        let backend = Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()));
        let device = Device::new(backend).unwrap();
        let manager = BufferSubAllocationManager::new(device.clone(), HeapType::Upload, size);
        (device, manager)
    }

    #[test]
    fn test_constant_buffer_alignment() {
        let (_device, manager) = upload_manager(64 * 1024);
        let a = ConstantBufferSubAllocation::<[f32; 4]>::new(&manager).unwrap();
        let b = ConstantBufferSubAllocation::<[f32; 4]>::new(&manager).unwrap();
        assert_eq!(a.offset() % CONSTANT_BUFFER_ALIGNMENT, 0);
        assert_eq!(b.offset() % CONSTANT_BUFFER_ALIGNMENT, 0);
        assert_ne!(a.offset(), b.offset());
    }

    #[test]
    fn test_uav_counter_alignment() {
        let (_device, manager) = upload_manager(64 * 1024);
        let counter = UavCounterSubAllocation::new(&manager).unwrap();
        assert_eq!(counter.offset() % UAV_COUNTER_ALIGNMENT, 0);
    }

    #[test]
    fn test_queued_writes_flush_on_creation() {
        let (device, manager) = upload_manager(4096);
        let cb = ConstantBufferSubAllocation::<[u32; 4]>::new(&manager).unwrap();

        // Written before the GPU resource exists: queued on the CPU.
        cb.write(&[1, 2, 3, 4]).unwrap();

        let raw = device
            .backend()
            .create_committed_resource(
                HeapType::Upload,
                &ResourceDesc::buffer(4096),
                crate::rhi::states::ResourceStates::GENERIC_READ,
                None,
            )
            .unwrap();
        manager.on_resource_created(raw).unwrap();

        let mut readback = [0u32; 4];
        device
            .backend()
            .read_buffer(raw, cb.offset(), bytemuck::cast_slice_mut(&mut readback))
            .unwrap();
        assert_eq!(readback, [1, 2, 3, 4]);
    }

    #[test]
    fn test_texture_copy_footprints() {
        let (device, manager) = upload_manager(1 << 20);
        let desc = ResourceDesc::texture_2d(Format::Rgba8Unorm, 100, 4, 1);
        let staging = TextureCopySubAllocation::new(&manager, &device, &desc, 0, 1).unwrap();

        assert_eq!(staging.offset() % TEXTURE_SUBRESOURCE_PLACEMENT_ALIGNMENT, 0);
        let footprint = staging.footprints().footprints[0];
        assert_eq!(footprint.row_pitch % 256, 0);
        assert_eq!(footprint.unpadded_row_size, 400);
    }

    #[test]
    fn test_exhaustion() {
        let (_device, manager) = upload_manager(512);
        let _a = manager.reserve(512, 16).unwrap();
        assert!(matches!(
            manager.reserve(16, 16),
            Err(ForgeError::SubAllocationFailed { .. })
        ));
    }
}
