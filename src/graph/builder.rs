//! Frame Graph Builder
//!
//! Each render module fills one builder per frame: transient resources,
//! render-pass bundles, and blackboard entries. The frame graph then
//! injects sync points, assigns globally ordered bundle IDs, and hands
//! the bundles to the compiler.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::alias::TransientResourceAliasTracker;
use crate::resource::{GpuResource, GpuResourceCreateInfo, LifetimeType, ResourceId};
use crate::rhi::device::Device;
use crate::rhi::types::{Format, HeapType, ResourceDesc};

use super::blackboard::Blackboard;
use super::bundle::RenderPassBundle;
use super::pass::{GpuQueue, RenderPass};
use super::sync_point::create_sync_point_for_bundle;

/// Per-module frame assembly state.
pub struct FrameGraphBuilder {
    device: Device,
    blackboard: Arc<Blackboard>,
    bundles: Vec<RenderPassBundle>,
    transient_resources: Vec<Arc<GpuResource>>,
    dependency_cache: FxHashMap<ResourceId, Arc<GpuResource>>,
}

impl FrameGraphBuilder {
    #[must_use]
    pub fn new(device: Device, blackboard: Arc<Blackboard>) -> Self {
        Self {
            device,
            blackboard,
            bundles: Vec::new(),
            transient_resources: Vec::new(),
            dependency_cache: FxHashMap::default(),
        }
    }

    /// The frame's shared blackboard.
    #[must_use]
    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    // ── Transient resources ────────────────────────────────────────────────

    /// Creates a transient resource owned by the frame graph for this
    /// frame. Its memory is allocated during compilation, aliased with
    /// other transients where lifetimes permit.
    pub fn create_transient_resource(&mut self, info: GpuResourceCreateInfo) -> Arc<GpuResource> {
        let resource = GpuResource::new(self.device.clone(), LifetimeType::Transient, info);
        self.transient_resources.push(Arc::clone(&resource));
        resource
    }

    /// Convenience constructor for a transient 2D texture.
    pub fn create_transient_texture_2d(
        &mut self,
        format: Format,
        width: u64,
        height: u32,
        name: impl Into<String>,
    ) -> Arc<GpuResource> {
        self.create_transient_resource(GpuResourceCreateInfo::new(
            ResourceDesc::texture_2d(format, width, height, 1),
            name,
        ))
    }

    /// Convenience constructor for a transient default-heap buffer.
    pub fn create_transient_buffer(
        &mut self,
        size_in_bytes: u64,
        heap_type: HeapType,
        name: impl Into<String>,
    ) -> Arc<GpuResource> {
        self.create_transient_resource(GpuResourceCreateInfo {
            heap_type,
            ..GpuResourceCreateInfo::new(ResourceDesc::buffer(size_in_bytes), name)
        })
    }

    /// Number of transients created so far.
    #[must_use]
    pub fn transient_resource_count(&self) -> usize {
        self.transient_resources.len()
    }

    pub fn extract_transient_resources(&mut self) -> Vec<Arc<GpuResource>> {
        std::mem::take(&mut self.transient_resources)
    }

    // ── Bundles ────────────────────────────────────────────────────────────

    /// Adds a bundle of passes evaluated as a unit.
    pub fn add_render_pass_bundle(&mut self, bundle: RenderPassBundle) {
        self.bundles.push(bundle);
    }

    /// Adds a single pass as its own bundle.
    pub fn add_render_pass<Q: GpuQueue>(&mut self, pass: RenderPass<Q>) {
        let mut bundle = RenderPassBundle::new();
        bundle.add_render_pass(pass);
        self.bundles.push(bundle);
    }

    #[must_use]
    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    /// Merges another builder's bundles and transients after this
    /// builder's own.
    pub fn merge(&mut self, mut other: FrameGraphBuilder) {
        self.bundles.append(&mut other.bundles);
        self.transient_resources
            .append(&mut other.transient_resources);
    }

    // ── Compilation support ────────────────────────────────────────────────

    /// Injects a sync-point bundle ahead of every bundle that shares
    /// resources across queues. Runs before ID assignment so sync points
    /// participate in the global bundle order.
    pub fn create_sync_points(&mut self) {
        let mut index = 0;
        while index < self.bundles.len() {
            if let Some(mut sync_point) = create_sync_point_for_bundle(&self.bundles[index]) {
                sync_point.mark_as_sync_point();
                self.bundles.insert(index, sync_point);
                index += 1;
            }
            index += 1;
        }
    }

    /// Assigns consecutive bundle IDs starting at `base_id`; returns the
    /// number of bundles.
    pub fn assign_bundle_ids(&mut self, base_id: u32) -> u32 {
        for (offset, bundle) in self.bundles.iter_mut().enumerate() {
            bundle.set_id(base_id + offset as u32);
        }
        self.bundles.len() as u32
    }

    /// Feeds every transient dependency into the alias tracker, keyed by
    /// bundle ID.
    pub fn update_alias_tracker(&self, tracker: &mut TransientResourceAliasTracker) {
        for bundle in &self.bundles {
            for dependency in bundle.resource_dependencies() {
                if dependency.resource.lifetime() == LifetimeType::Transient {
                    tracker.add_transient_dependency(bundle.id(), &dependency.resource);
                }
            }
        }
    }

    /// Marks every dependency as used by `frame_number` and caches the
    /// unique resource set.
    pub fn update_resource_usage(&mut self, frame_number: u64) {
        for bundle in &self.bundles {
            for dependency in bundle.resource_dependencies() {
                dependency.resource.mark_used_for_frame(frame_number);
                self.dependency_cache
                    .entry(dependency.resource.id())
                    .or_insert_with(|| Arc::clone(&dependency.resource));
            }
        }
    }

    pub(crate) fn extract_dependency_cache(&mut self) -> FxHashMap<ResourceId, Arc<GpuResource>> {
        std::mem::take(&mut self.dependency_cache)
    }

    pub fn take_bundles(&mut self) -> Vec<RenderPassBundle> {
        std::mem::take(&mut self.bundles)
    }
}
