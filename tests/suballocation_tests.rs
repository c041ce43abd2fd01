//! Buffer Sub-Allocation Tests
//!
//! Tests for:
//! - Queued writes before the GPU buffer exists, flushed on creation
//!   through the persistent allocation path
//! - Typed sub-allocation alignments (CBV 256 B, UAV counter 4096 B,
//!   texture copy rows 256 B / bases 512 B)
//! - Structured-buffer element addressing
//! - Reservation recycling through the TLSF allocator

use std::sync::Arc;

use forge::memory::heap::GpuResourceHeapManager;
use forge::memory::residency::GpuResidencyManager;
use forge::resource::{BufferResource, LifetimeType, PersistentGpuResourceManager};
use forge::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};
use forge::rhi::types::{Format, HeapType, ResourceDesc};
use forge::rhi::Device;

fn setup() -> (Device, Arc<PersistentGpuResourceManager>) {
    let device =
        Device::new(Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()))).unwrap();
    let residency = Arc::new(GpuResidencyManager::new(device.clone()));
    let heap_manager = Arc::new(GpuResourceHeapManager::with_default_heap_size(
        device.clone(),
        Arc::clone(&residency),
        1 << 20,
    ));
    let persistent = Arc::new(PersistentGpuResourceManager::new(heap_manager, residency));
    (device, persistent)
}

#[test]
fn writes_before_creation_flush_when_the_buffer_is_allocated() {
    let (device, persistent) = setup();
    let staging = BufferResource::new(
        device.clone(),
        LifetimeType::Persistent,
        64 * 1024,
        HeapType::Upload,
        "frame_staging",
    );

    let cb = staging.reserve_constant_buffer::<[u32; 4]>().unwrap();
    // No GPU resource exists yet; this write lands in CPU-side storage.
    cb.write(&[11, 22, 33, 44]).unwrap();
    assert!(staging.resource().raw_resource().is_none());

    persistent.allocate(staging.resource()).unwrap();
    let raw = staging.resource().raw_resource().unwrap();

    let mut readback = [0u32; 4];
    device
        .backend()
        .read_buffer(raw, cb.offset(), bytemuck::cast_slice_mut(&mut readback))
        .unwrap();
    assert_eq!(readback, [11, 22, 33, 44]);
}

#[test]
fn typed_sub_allocations_respect_their_alignments() {
    let (device, persistent) = setup();
    let staging = BufferResource::new(
        device,
        LifetimeType::Persistent,
        256 * 1024,
        HeapType::Upload,
        "aligned_staging",
    );
    persistent.allocate(staging.resource()).unwrap();

    // A deliberately odd-sized reservation first, to knock offsets off
    // their natural alignment.
    let _skew = staging.reserve(48, 16).unwrap();

    let cb = staging.reserve_constant_buffer::<[f32; 3]>().unwrap();
    assert_eq!(cb.offset() % 256, 0);

    let counter = staging.reserve_uav_counter().unwrap();
    assert_eq!(counter.offset() % 4096, 0);

    let texture_desc = ResourceDesc::texture_2d(Format::Rgba8Unorm, 100, 30, 2);
    let copy = staging.reserve_texture_copy(&texture_desc, 0, 2).unwrap();
    assert_eq!(copy.offset() % 512, 0);
    for footprint in &copy.footprints().footprints {
        assert_eq!(footprint.row_pitch % 256, 0);
        assert_eq!(footprint.offset % 512, 0);
    }
}

#[test]
fn structured_buffer_round_trip() {
    let (device, persistent) = setup();
    let staging = BufferResource::new(
        device,
        LifetimeType::Persistent,
        64 * 1024,
        HeapType::Upload,
        "instances",
    );
    persistent.allocate(staging.resource()).unwrap();

    let instances = staging.reserve_structured_buffer::<[f32; 4]>(8).unwrap();
    instances
        .write_elements(2, &[[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]])
        .unwrap();

    let mut out = [[0.0f32; 4]; 2];
    instances.read_elements(2, &mut out).unwrap();
    assert_eq!(out, [[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]);
}

#[test]
fn dropped_reservations_free_their_ranges() {
    let (device, _persistent) = setup();
    let staging = BufferResource::new(
        device,
        LifetimeType::Persistent,
        4096,
        HeapType::Upload,
        "tiny",
    );

    let first = staging.reserve(4096, 16).unwrap();
    assert!(staging.reserve(4096, 16).is_err(), "buffer is full");

    drop(first);
    assert!(staging.reserve(4096, 16).is_ok(), "freed range is reusable");
}

#[test]
fn texture_copy_write_pads_rows_to_pitch() {
    let (device, persistent) = setup();
    let staging = BufferResource::new(
        device.clone(),
        LifetimeType::Persistent,
        1 << 20,
        HeapType::Upload,
        "texture_upload",
    );
    persistent.allocate(staging.resource()).unwrap();

    // 100 texels × 4 B = 400 B rows, padded to a 512 B pitch.
    let texture_desc = ResourceDesc::texture_2d(Format::Rgba8Unorm, 100, 4, 1);
    let copy = staging.reserve_texture_copy(&texture_desc, 0, 1).unwrap();

    let texel_rows: Vec<u8> = (0..400u32 * 4).map(|i| (i % 251) as u8).collect();
    copy.write_subresource(0, &texel_rows).unwrap();

    let footprint = copy.footprints().footprints[0];
    let raw = staging.resource().raw_resource().unwrap();

    // Row 3 starts at three row pitches, not three row sizes.
    let mut third_row = vec![0u8; 400];
    device
        .backend()
        .read_buffer(
            raw,
            copy.offset() + footprint.offset + 3 * footprint.row_pitch,
            &mut third_row,
        )
        .unwrap();
    assert_eq!(third_row.as_slice(), &texel_rows[3 * 400..4 * 400]);
}
