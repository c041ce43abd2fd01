//! Sync Point Construction
//!
//! A resource referenced by more than one queue inside one bundle, or by
//! the copy queue at all, needs its state settled before the bundle's
//! modules execute. The factory inspects a bundle's dependencies per
//! subresource and, when needed, builds a **sync point**: an injected
//! direct-queue pass whose only job is to transition every cross-queue
//! shared subresource to the union of its required states.
//!
//! Rules:
//!
//! - A subresource used on both the direct and compute queues within one
//!   bundle must be used read-only everywhere (debug assertion); the
//!   combined mask is then itself a valid read state.
//! - An explicit transition to `COMMON` on a shared subresource is
//!   forbidden: implicit promotion afterwards would make its actual
//!   state untrackable across the queues.
//! - Buffers and simultaneous-access textures decay to `COMMON` at the
//!   module boundary anyway and are skipped.
//! - Whether a resource may simultaneously be used on the copy queue and
//!   the direct/compute queues is unclear in the D3D12 documentation; it
//!   is forbidden here outright, so copy-queue use only requires a sync
//!   point to reach the `COMMON`-adjacent copy states.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::resource::{GpuResource, ResourceId};
use crate::rhi::states::ResourceStates;
use crate::rhi::types::{ALL_SUBRESOURCES, QueueFlags, QueueType};

use super::bundle::RenderPassBundle;
use super::pass::{DirectQueue, RenderPass, RenderPassNode};

/// Name given to injected sync-point passes.
pub const SYNC_POINT_RENDER_PASS_NAME: &str = "[Forge Internal Sync Point]";

/// PIX marker color of sync-point passes (opaque red).
pub const SYNC_POINT_PIX_EVENT_COLOR: u32 = 0xFF_FF_00_00;

#[derive(Clone, Copy, Default)]
struct SharedSubResourceInfo {
    used_queues: QueueFlags,
    combined_state: ResourceStates,
    uses_explicit_common_transition: bool,
}

/// Cross-queue usage of one resource within one bundle.
struct CrossQueueResourceTracker {
    resource: Arc<GpuResource>,
    subresources: Vec<SharedSubResourceInfo>,
}

impl CrossQueueResourceTracker {
    fn new(resource: Arc<GpuResource>) -> Self {
        let subresources = vec![SharedSubResourceInfo::default(); resource.subresource_count() as usize];
        Self {
            resource,
            subresources,
        }
    }

    fn add_usage(&mut self, queue: QueueType, state: ResourceStates, subresource: u32) {
        let explicit_common = state.is_common();

        let mut apply = |info: &mut SharedSubResourceInfo| {
            info.used_queues |= queue.into();
            info.combined_state |= state;
            info.uses_explicit_common_transition |= explicit_common;
        };

        if subresource == ALL_SUBRESOURCES {
            self.subresources.iter_mut().for_each(&mut apply);
        } else {
            apply(&mut self.subresources[subresource as usize]);
        }
    }

    fn assert_usage_validity(&self) {
        for info in &self.subresources {
            if info.used_queues.count() > 1 {
                debug_assert!(
                    info.combined_state.is_valid_read_state(),
                    "subresources of '{}' used simultaneously on the direct and compute queues \
                     must be used in read-only states",
                    self.resource.name(),
                );

                // (ANY_READ_STATE | COMMON) == ANY_READ_STATE, so the
                // combined mask alone cannot reveal a COMMON transition;
                // it is tracked separately.
                debug_assert!(
                    !info.uses_explicit_common_transition,
                    "explicit COMMON transitions on cross-queue shared subresources of '{}' \
                     would make implicit promotion untrackable",
                    self.resource.name(),
                );
            }
        }
    }

    /// Appends the sync-point dependencies this resource needs.
    fn add_sync_point_dependencies(&self, pass: &mut RenderPass<DirectQueue>) {
        for (index, info) in self.subresources.iter().enumerate() {
            let shared_across_compute = info
                .used_queues
                .contains(QueueFlags::DIRECT | QueueFlags::COMPUTE);
            let used_on_copy = info.used_queues.contains(QueueFlags::COPY);

            if shared_across_compute || used_on_copy {
                pass.add_subresource_dependency(
                    &self.resource,
                    info.combined_state,
                    index as u32,
                );
            }
        }
    }
}

/// Builds the sync point for one bundle, if it needs one.
#[derive(Default)]
pub struct FrameGraphSyncPointFactory {
    trackers: FxHashMap<ResourceId, CrossQueueResourceTracker>,
}

impl FrameGraphSyncPointFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates one pass's dependencies.
    pub fn add_resource_dependencies_for_pass(&mut self, pass: &RenderPassNode) {
        for dependency in pass.dependencies() {
            self.trackers
                .entry(dependency.resource.id())
                .or_insert_with(|| CrossQueueResourceTracker::new(Arc::clone(&dependency.resource)))
                .add_usage(pass.queue(), dependency.required_state, dependency.subresource);
        }
    }

    /// Produces the sync-point bundle, or `None` when every shared
    /// resource decays implicitly.
    #[must_use]
    pub fn create_sync_point(self) -> Option<RenderPassBundle> {
        if self.trackers.is_empty() {
            return None;
        }

        if cfg!(debug_assertions) {
            for tracker in self.trackers.values() {
                tracker.assert_usage_validity();
            }
        }

        let mut sync_point_pass = RenderPass::<DirectQueue>::new(SYNC_POINT_RENDER_PASS_NAME);
        sync_point_pass.set_pix_color(SYNC_POINT_PIX_EVENT_COLOR);

        // Deterministic dependency order keeps compiled frames stable
        // across runs.
        let mut trackers: Vec<&CrossQueueResourceTracker> = self.trackers.values().collect();
        trackers.sort_by_key(|tracker| tracker.resource.id());

        for tracker in trackers {
            // Always-decaying resources reach COMMON at the module
            // boundary on their own; a sync-point entry would only add a
            // redundant barrier.
            if !tracker.resource.always_decays() {
                tracker.add_sync_point_dependencies(&mut sync_point_pass);
            }
        }

        if sync_point_pass.dependency_count() == 0 {
            return None;
        }

        let mut bundle = RenderPassBundle::new();
        bundle.add_render_pass(sync_point_pass);
        bundle.mark_as_sync_point();
        Some(bundle)
    }
}

/// Computes the sync point for `bundle`, or `None` for the common case
/// of a direct-only bundle.
#[must_use]
pub fn create_sync_point_for_bundle(bundle: &RenderPassBundle) -> Option<RenderPassBundle> {
    // Fast path: nothing to synchronize without compute or copy passes.
    if bundle.passes(QueueType::Compute).is_empty() && bundle.passes(QueueType::Copy).is_empty() {
        return None;
    }

    let mut factory = FrameGraphSyncPointFactory::new();
    for queue in QueueType::ALL {
        for pass in bundle.passes(queue) {
            factory.add_resource_dependencies_for_pass(pass);
        }
    }

    factory.create_sync_point()
}
