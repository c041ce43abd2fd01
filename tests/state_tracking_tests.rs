//! State Tracking Tests
//!
//! Tests for:
//! - Read-combine minimality: one barrier for a run of read-only uses
//! - Split barriers: BEGIN_ONLY/END_ONLY across idle passes
//! - Implicit promotion and decay for buffers and copy-queue use
//! - Cross-queue sync points covering shared resources
//! - UAV hazard barriers between consecutive unordered-access uses

use std::sync::Arc;

use forge::graph::bundle::RenderPassBundle;
use forge::graph::module::create_execution_modules;
use forge::graph::pass::{ComputeQueue, CopyQueue, DirectQueue, RenderPass, RenderPassId};
use forge::graph::sync_point::create_sync_point_for_bundle;
use forge::resource::{GpuResource, GpuResourceCreateInfo, LifetimeType};
use forge::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};
use forge::rhi::states::ResourceStates;
use forge::rhi::types::{BarrierFlags, Format, QueueType, ResourceDesc, ResourceFlags};
use forge::rhi::Device;
use forge::state::{GpuResourceEventKind, GpuResourceEventManager, GpuResourceUsageAnalyzer};

fn test_device() -> Device {
    Device::new(Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()))).unwrap()
}

fn transient_texture(device: &Device, name: &str) -> Arc<GpuResource> {
    GpuResource::new(
        device.clone(),
        LifetimeType::Transient,
        GpuResourceCreateInfo::new(ResourceDesc::texture_2d(Format::Rgba8Unorm, 64, 64, 1), name),
    )
}

fn default_buffer(device: &Device, name: &str) -> Arc<GpuResource> {
    GpuResource::new(
        device.clone(),
        LifetimeType::Persistent,
        GpuResourceCreateInfo::new(ResourceDesc::buffer(4096), name),
    )
}

fn transitions_for_pass(
    events: &GpuResourceEventManager,
    pass: RenderPassId,
) -> Vec<(ResourceStates, ResourceStates, BarrierFlags)> {
    events
        .events_for_pass(pass)
        .iter()
        .filter_map(|event| match event.kind {
            GpuResourceEventKind::Transition {
                before,
                after,
                flags,
                ..
            } => Some((before, after, flags)),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Read-combine minimality (Scenario A)
// ============================================================================

#[test]
fn single_queue_read_states_combine_into_one_barrier() {
    let device = test_device();
    let resource = transient_texture(&device, "scene_color");

    let mut p1 = RenderPass::<DirectQueue>::new("p1");
    p1.add_resource_dependency(&resource, ResourceStates::PIXEL_SHADER_RESOURCE);
    let p1_id = p1.id();

    let p2 = RenderPass::<DirectQueue>::new("p2");
    let p2_id = p2.id();

    let mut p3 = RenderPass::<DirectQueue>::new("p3");
    p3.add_resource_dependency(&resource, ResourceStates::NON_PIXEL_SHADER_RESOURCE);
    let p3_id = p3.id();

    let mut bundle = RenderPassBundle::new();
    bundle.add_render_pass(p1);
    bundle.add_render_pass(p2);
    bundle.add_render_pass(p3);
    bundle.set_id(0);

    let modules = create_execution_modules(vec![bundle]);
    assert_eq!(modules.len(), 1);

    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&resource)).traverse_frame(&modules);

    // Exactly one barrier, at P1, for the combined read mask.
    let combined =
        ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE;
    assert_eq!(
        transitions_for_pass(&events, p1_id),
        vec![(ResourceStates::COMMON, combined, BarrierFlags::None)]
    );
    assert!(events.events_for_pass(p2_id).is_empty());
    assert!(events.events_for_pass(p3_id).is_empty());
    assert_eq!(events.event_count(), 1);

    // The authoritative state carries the combined mask forward.
    assert_eq!(resource.subresource_state(0), combined);
}

#[test]
fn no_barrier_when_initial_state_already_contains_read_mask() {
    let device = test_device();
    let resource = transient_texture(&device, "prefiltered");
    resource.set_subresource_state(
        ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE,
        0,
    );

    let mut p1 = RenderPass::<DirectQueue>::new("p1");
    p1.add_resource_dependency(&resource, ResourceStates::PIXEL_SHADER_RESOURCE);

    let mut p2 = RenderPass::<DirectQueue>::new("p2");
    p2.add_resource_dependency(&resource, ResourceStates::NON_PIXEL_SHADER_RESOURCE);

    let mut bundle = RenderPassBundle::new();
    bundle.add_render_pass(p1);
    bundle.add_render_pass(p2);
    bundle.set_id(0);

    let modules = create_execution_modules(vec![bundle]);
    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&resource)).traverse_frame(&modules);

    assert_eq!(events.event_count(), 0, "initial state already satisfies both passes");
}

// ============================================================================
// Split barriers (Scenario F, property 2)
// ============================================================================

#[test]
fn split_barrier_spans_idle_passes() {
    let device = test_device();
    let resource = GpuResource::new(
        device.clone(),
        LifetimeType::Transient,
        GpuResourceCreateInfo::new(
            ResourceDesc {
                flags: ResourceFlags::ALLOW_RENDER_TARGET,
                ..ResourceDesc::texture_2d(Format::Rgba8Unorm, 128, 128, 1)
            },
            "shadow_target",
        ),
    );
    // Focus on the split logic: pretend the first-use initialization
    // already happened in an earlier frame.
    resource.mark_special_initialization_completed();
    assert_eq!(resource.subresource_state(0), ResourceStates::RENDER_TARGET);

    let mut p1 = RenderPass::<DirectQueue>::new("render");
    p1.add_resource_dependency(&resource, ResourceStates::RENDER_TARGET);
    let p1_id = p1.id();

    let p2 = RenderPass::<DirectQueue>::new("unrelated_a");
    let p2_id = p2.id();
    let p3 = RenderPass::<DirectQueue>::new("unrelated_b");
    let p3_id = p3.id();

    let mut p4 = RenderPass::<DirectQueue>::new("sample");
    p4.add_resource_dependency(&resource, ResourceStates::PIXEL_SHADER_RESOURCE);
    let p4_id = p4.id();

    let mut bundle = RenderPassBundle::new();
    bundle.add_render_pass(p1);
    bundle.add_render_pass(p2);
    bundle.add_render_pass(p3);
    bundle.add_render_pass(p4);
    bundle.set_id(0);

    let modules = create_execution_modules(vec![bundle]);
    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&resource)).traverse_frame(&modules);

    // BEGIN_ONLY lands on the first idle pass after the render, END_ONLY
    // on the consuming pass; no pass carries a non-split barrier for the
    // same transition.
    assert!(events.events_for_pass(p1_id).is_empty());
    assert_eq!(
        transitions_for_pass(&events, p2_id),
        vec![(
            ResourceStates::RENDER_TARGET,
            ResourceStates::PIXEL_SHADER_RESOURCE,
            BarrierFlags::BeginOnly,
        )]
    );
    assert!(events.events_for_pass(p3_id).is_empty());
    assert_eq!(
        transitions_for_pass(&events, p4_id),
        vec![(
            ResourceStates::RENDER_TARGET,
            ResourceStates::PIXEL_SHADER_RESOURCE,
            BarrierFlags::EndOnly,
        )]
    );
}

#[test]
fn no_split_barrier_without_a_gap() {
    let device = test_device();
    let resource = transient_texture(&device, "bloom_chain");
    resource.set_subresource_state(ResourceStates::UNORDERED_ACCESS, 0);

    let mut p1 = RenderPass::<DirectQueue>::new("write");
    p1.add_resource_dependency(&resource, ResourceStates::UNORDERED_ACCESS);

    let mut p2 = RenderPass::<DirectQueue>::new("read");
    p2.add_resource_dependency(&resource, ResourceStates::PIXEL_SHADER_RESOURCE);
    let p2_id = p2.id();

    let mut bundle = RenderPassBundle::new();
    bundle.add_render_pass(p1);
    bundle.add_render_pass(p2);
    bundle.set_id(0);

    let modules = create_execution_modules(vec![bundle]);
    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&resource)).traverse_frame(&modules);

    assert_eq!(
        transitions_for_pass(&events, p2_id),
        vec![(
            ResourceStates::UNORDERED_ACCESS,
            ResourceStates::PIXEL_SHADER_RESOURCE,
            BarrierFlags::None,
        )]
    );
}

// ============================================================================
// Implicit promotion & decay (Scenario C, property 3)
// ============================================================================

#[test]
fn copy_queue_use_decays_and_next_frame_promotes() {
    let device = test_device();
    let buffer = default_buffer(&device, "mesh_staging_target");

    // Frame 1: copy-queue write.
    let mut copy_pass = RenderPass::<CopyQueue>::new("upload");
    copy_pass.add_resource_dependency(&buffer, ResourceStates::COPY_DEST);
    let copy_id = copy_pass.id();

    let mut bundle = RenderPassBundle::new();
    bundle.add_render_pass(copy_pass);
    bundle.set_id(0);

    let modules = create_execution_modules(vec![bundle]);
    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&buffer)).traverse_frame(&modules);

    assert_eq!(
        transitions_for_pass(&events, copy_id),
        vec![(ResourceStates::COMMON, ResourceStates::COPY_DEST, BarrierFlags::None)]
    );

    // Copy-queue use decays at the module boundary.
    assert_eq!(buffer.subresource_state(0), ResourceStates::COMMON);

    // Frame 2: a vertex-buffer read needs no barrier at all.
    let mut vb_pass = RenderPass::<DirectQueue>::new("draw");
    vb_pass.add_resource_dependency(&buffer, ResourceStates::VERTEX_AND_CONSTANT_BUFFER);

    let mut bundle = RenderPassBundle::new();
    bundle.add_render_pass(vb_pass);
    bundle.set_id(0);

    let modules = create_execution_modules(vec![bundle]);
    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&buffer)).traverse_frame(&modules);

    assert_eq!(events.event_count(), 0, "implicit promotion replaces the barrier");
}

#[test]
fn explicit_common_transition_after_decay_is_dropped() {
    let device = test_device();
    let buffer = default_buffer(&device, "readback_source");

    let mut copy_pass = RenderPass::<CopyQueue>::new("gather");
    copy_pass.add_resource_dependency(&buffer, ResourceStates::COPY_DEST);

    let mut common_pass = RenderPass::<DirectQueue>::new("return_to_common");
    common_pass.add_resource_dependency(&buffer, ResourceStates::COMMON);
    let common_id = common_pass.id();

    let mut copy_bundle = RenderPassBundle::new();
    copy_bundle.add_render_pass(copy_pass);
    copy_bundle.set_id(0);

    let mut direct_bundle = RenderPassBundle::new();
    direct_bundle.add_render_pass(common_pass);
    direct_bundle.set_id(1);

    let modules = create_execution_modules(vec![copy_bundle, direct_bundle]);
    assert_eq!(modules.len(), 2);

    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&buffer)).traverse_frame(&modules);

    // The module boundary already decayed the buffer to COMMON; the
    // explicit transition is redundant and must not be emitted.
    assert!(events.events_for_pass(common_id).is_empty());
}

// ============================================================================
// Cross-queue sync points (Scenario B)
// ============================================================================

#[test]
fn sync_point_transitions_shared_resource_once() {
    let device = test_device();
    let resource = transient_texture(&device, "gbuffer_normals");

    let mut direct_pass = RenderPass::<DirectQueue>::new("sample_px");
    direct_pass.add_resource_dependency(&resource, ResourceStates::PIXEL_SHADER_RESOURCE);
    let direct_id = direct_pass.id();

    let mut compute_pass = RenderPass::<ComputeQueue>::new("sample_cs");
    compute_pass.add_resource_dependency(&resource, ResourceStates::NON_PIXEL_SHADER_RESOURCE);
    let compute_id = compute_pass.id();

    let mut shared_bundle = RenderPassBundle::new();
    shared_bundle.add_render_pass(direct_pass);
    shared_bundle.add_render_pass(compute_pass);

    let sync_bundle =
        create_sync_point_for_bundle(&shared_bundle).expect("cross-queue use requires a sync point");
    assert!(sync_bundle.is_sync_point());
    let sync_pass_id = sync_bundle.passes(QueueType::Direct)[0].id();

    let mut bundles = vec![sync_bundle, shared_bundle];
    for (index, bundle) in bundles.iter_mut().enumerate() {
        bundle.set_id(index as u32);
    }

    let modules = create_execution_modules(bundles);
    assert_eq!(modules.len(), 2, "sync points are never merged into other modules");

    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&resource)).traverse_frame(&modules);

    let combined =
        ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE;
    assert_eq!(
        transitions_for_pass(&events, sync_pass_id),
        vec![(ResourceStates::COMMON, combined, BarrierFlags::None)]
    );
    assert!(events.events_for_pass(direct_id).is_empty());
    assert!(events.events_for_pass(compute_id).is_empty());

    // A non-simultaneous-access texture does not decay after the sync
    // module; the combined state carries across the frame boundary.
    assert_eq!(resource.subresource_state(0), combined);
}

#[test]
fn buffers_skip_sync_point_entries() {
    let device = test_device();
    let buffer = default_buffer(&device, "instance_data");

    let mut direct_pass = RenderPass::<DirectQueue>::new("draw");
    direct_pass.add_resource_dependency(&buffer, ResourceStates::VERTEX_AND_CONSTANT_BUFFER);

    let mut compute_pass = RenderPass::<ComputeQueue>::new("cull");
    compute_pass.add_resource_dependency(&buffer, ResourceStates::NON_PIXEL_SHADER_RESOURCE);

    let mut bundle = RenderPassBundle::new();
    bundle.add_render_pass(direct_pass);
    bundle.add_render_pass(compute_pass);

    // The buffer decays implicitly; no sync point is required at all.
    assert!(create_sync_point_for_bundle(&bundle).is_none());
}

// ============================================================================
// UAV hazards
// ============================================================================

#[test]
fn consecutive_unordered_access_uses_get_a_uav_barrier() {
    let device = test_device();
    let resource = transient_texture(&device, "particle_grid");

    let mut first = RenderPass::<ComputeQueue>::new("scatter");
    first.add_resource_dependency(&resource, ResourceStates::UNORDERED_ACCESS);
    let first_id = first.id();

    let mut second = RenderPass::<ComputeQueue>::new("gather");
    second.add_resource_dependency(&resource, ResourceStates::UNORDERED_ACCESS);
    let second_id = second.id();

    let mut bundle = RenderPassBundle::new();
    bundle.add_render_pass(first);
    bundle.add_render_pass(second);
    bundle.set_id(0);

    let modules = create_execution_modules(vec![bundle]);
    let events = GpuResourceUsageAnalyzer::new(Arc::clone(&resource)).traverse_frame(&modules);

    assert_eq!(
        transitions_for_pass(&events, first_id),
        vec![(ResourceStates::COMMON, ResourceStates::UNORDERED_ACCESS, BarrierFlags::None)]
    );

    let second_events = events.events_for_pass(second_id);
    assert_eq!(second_events.len(), 1);
    assert!(matches!(second_events[0].kind, GpuResourceEventKind::UavBarrier));
}
