//! Alias Tracker Tests
//!
//! Tests for:
//! - Lifetime-interval grouping: disjoint transients share memory,
//!   overlapping ones do not
//! - cannot-alias-before/after-use constraints (upload/readback rules)
//! - Heap-tier-1 class separation vs. tier-2 mixing
//! - Aliased group allocation through the transient resource manager

use std::sync::Arc;

use forge::alias::TransientResourceAliasTracker;
use forge::memory::heap::GpuResourceHeapManager;
use forge::memory::residency::GpuResidencyManager;
use forge::resource::{
    GpuResource, GpuResourceCreateInfo, LifetimeType, ResourceId, TransientGpuResourceManager,
};
use forge::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};
use forge::rhi::types::{Format, HeapType, ResourceDesc, ResourceFlags, ResourceHeapTier};
use forge::rhi::Device;

fn device_with_tier(tier: ResourceHeapTier) -> Device {
    Device::new(Arc::new(SoftwareDevice::new(SoftwareDeviceConfig {
        resource_heap_tier: tier,
        ..SoftwareDeviceConfig::default()
    })))
    .unwrap()
}

fn heap_manager(device: &Device) -> Arc<GpuResourceHeapManager> {
    let residency = Arc::new(GpuResidencyManager::new(device.clone()));
    Arc::new(GpuResourceHeapManager::with_default_heap_size(
        device.clone(),
        residency,
        16 << 20,
    ))
}

/// 2048×1024 RGBA8 ≈ 8 MiB, 1024×1024 ≈ 4 MiB.
fn transient_texture(device: &Device, width: u64, height: u32, name: &str) -> Arc<GpuResource> {
    GpuResource::new(
        device.clone(),
        LifetimeType::Transient,
        GpuResourceCreateInfo::new(
            ResourceDesc::texture_2d(Format::Rgba8Unorm, width, height, 1),
            name,
        ),
    )
}

fn group_ids(tracker: &TransientResourceAliasTracker) -> Vec<Vec<ResourceId>> {
    tracker
        .aliasable_groups()
        .iter()
        .map(|group| group.resources.iter().map(|r| r.id()).collect())
        .collect()
}

// ============================================================================
// Lifetime grouping (Scenario D)
// ============================================================================

#[test]
fn disjoint_lifetimes_share_a_group() {
    let device = device_with_tier(ResourceHeapTier::Tier2);
    let mut tracker = TransientResourceAliasTracker::new(heap_manager(&device));

    let x = transient_texture(&device, 2048, 1024, "x_8mib"); // bundles 0..=2
    let y = transient_texture(&device, 1024, 1024, "y_4mib"); // bundles 3..=5
    let z = transient_texture(&device, 1024, 1024, "z_4mib"); // bundles 1..=4

    for bundle in 0..=2 {
        tracker.add_transient_dependency(bundle, &x);
    }
    for bundle in 3..=5 {
        tracker.add_transient_dependency(bundle, &y);
    }
    for bundle in 1..=4 {
        tracker.add_transient_dependency(bundle, &z);
    }

    tracker.calculate_aliasable_groups();

    // X and Y pack together ([0,2] and [3,5] are disjoint); Z overlaps
    // both and lands in its own group.
    let groups = group_ids(&tracker);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0], vec![x.id(), y.id()]);
    assert_eq!(groups[1], vec![z.id()]);

    assert!(tracker.is_aliased(x.id()));
    assert!(tracker.is_aliased(y.id()));
    assert!(!tracker.is_aliased(z.id()));
}

#[test]
fn group_lifetimes_are_pairwise_disjoint() {
    let device = device_with_tier(ResourceHeapTier::Tier2);
    let mut tracker = TransientResourceAliasTracker::new(heap_manager(&device));

    // A pile of lifetimes with assorted overlaps.
    let spans = [(0u32, 3u32), (4, 6), (2, 5), (7, 9), (1, 1), (8, 10)];
    let resources: Vec<Arc<GpuResource>> = spans
        .iter()
        .enumerate()
        .map(|(i, _)| transient_texture(&device, 512, 512, &format!("t{i}")))
        .collect();

    for (resource, (first, last)) in resources.iter().zip(spans) {
        tracker.add_transient_dependency(first, resource);
        tracker.add_transient_dependency(last, resource);
    }

    tracker.calculate_aliasable_groups();

    for group in tracker.aliasable_groups() {
        let lifetimes: Vec<_> = group
            .resources
            .iter()
            .map(|resource| tracker.lifetime(resource.id()).unwrap().clone())
            .collect();

        for (index, lifetime) in lifetimes.iter().enumerate() {
            for other in &lifetimes[index + 1..] {
                assert!(
                    !lifetime.overlaps(other),
                    "group members '{}' and '{}' overlap",
                    lifetime.resource.name(),
                    other.resource.name(),
                );
            }
        }
    }
}

// ============================================================================
// Alias-before/after-use constraints
// ============================================================================

#[test]
fn upload_heap_transients_never_alias_before_use() {
    let device = device_with_tier(ResourceHeapTier::Tier2);
    let mut tracker = TransientResourceAliasTracker::new(heap_manager(&device));

    let make_upload = |name: &str| {
        GpuResource::new(
            device.clone(),
            LifetimeType::Transient,
            GpuResourceCreateInfo {
                heap_type: HeapType::Upload,
                ..GpuResourceCreateInfo::new(ResourceDesc::buffer(1 << 20), name)
            },
        )
    };

    let early = make_upload("early_staging");
    let late = make_upload("late_staging");
    assert!(!late.can_alias_before_use());

    tracker.add_transient_dependency(0, &early);
    tracker.add_transient_dependency(1, &early);
    tracker.add_transient_dependency(2, &late);
    tracker.add_transient_dependency(3, &late);

    tracker.calculate_aliasable_groups();

    // Disjoint lifetimes, but `late`'s CPU writes may land before the
    // GPU is done with `early`; the group split protects them.
    assert_eq!(tracker.aliasable_groups().len(), 2);
    assert!(!tracker.is_aliased(early.id()));
    assert!(!tracker.is_aliased(late.id()));
}

// ============================================================================
// Heap tier rules (Property 5)
// ============================================================================

#[test]
fn tier_1_never_mixes_resource_classes() {
    let device = device_with_tier(ResourceHeapTier::Tier1);
    let mut tracker = TransientResourceAliasTracker::new(heap_manager(&device));

    let buffer = GpuResource::new(
        device.clone(),
        LifetimeType::Transient,
        GpuResourceCreateInfo::new(ResourceDesc::buffer(4 << 20), "scratch_buffer"),
    );
    let texture = transient_texture(&device, 1024, 1024, "scratch_texture");
    let render_target = GpuResource::new(
        device.clone(),
        LifetimeType::Transient,
        GpuResourceCreateInfo::new(
            ResourceDesc {
                flags: ResourceFlags::ALLOW_RENDER_TARGET,
                ..ResourceDesc::texture_2d(Format::Rgba8Unorm, 1024, 1024, 1)
            },
            "scratch_rt",
        ),
    );

    // All three have disjoint lifetimes.
    tracker.add_transient_dependency(0, &buffer);
    tracker.add_transient_dependency(1, &texture);
    tracker.add_transient_dependency(2, &render_target);

    tracker.calculate_aliasable_groups();
    assert_eq!(tracker.aliasable_groups().len(), 3, "tier 1 forbids class mixing");
}

#[test]
fn tier_2_mixes_resource_classes_freely() {
    let device = device_with_tier(ResourceHeapTier::Tier2);
    let mut tracker = TransientResourceAliasTracker::new(heap_manager(&device));

    let buffer = GpuResource::new(
        device.clone(),
        LifetimeType::Transient,
        GpuResourceCreateInfo::new(ResourceDesc::buffer(4 << 20), "scratch_buffer"),
    );
    let texture = transient_texture(&device, 1024, 1024, "scratch_texture");

    tracker.add_transient_dependency(0, &buffer);
    tracker.add_transient_dependency(1, &texture);

    tracker.calculate_aliasable_groups();
    assert_eq!(tracker.aliasable_groups().len(), 1);
}

// ============================================================================
// Aliased allocation
// ============================================================================

#[test]
fn aliased_group_shares_one_heap_region() {
    let device = device_with_tier(ResourceHeapTier::Tier2);
    let heap_manager = heap_manager(&device);
    let transients = TransientGpuResourceManager::new(Arc::clone(&heap_manager));

    let a = transient_texture(&device, 2048, 1024, "a");
    let b = transient_texture(&device, 1024, 1024, "b");

    transients
        .allocate_aliased_group(&[Arc::clone(&a), Arc::clone(&b)])
        .unwrap();

    let alloc_a = a.heap_allocation().unwrap();
    let alloc_b = b.heap_allocation().unwrap();
    assert_eq!(alloc_a.heap().id(), alloc_b.heap().id());
    assert_eq!(alloc_a.offset(), alloc_b.offset());

    // The region fits the larger member.
    assert!(alloc_a.size() >= 8 << 20);
}
