//! Frame Graph Compilation
//!
//! Lowers the frame's ordered bundle list into execution modules and
//! runs per-resource state analysis over them, in parallel, producing
//! the frame-wide event manager. The result is a
//! [`FrameGraphExecutionContext`], which later drives per-module command
//! recording and ordered submission.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::alias::TransientResourceAliasTracker;
use crate::jobs::JobSystem;
use crate::resource::{GpuResource, ResourceId};
use crate::rhi::types::{HeapType, QueueType};
use crate::state::events::{GpuResourceEvent, GpuResourceEventKind, GpuResourceEventManager};
use crate::state::usage_analyzer::GpuResourceUsageAnalyzer;

use super::bundle::RenderPassBundle;
use super::fence_collection::FrameGraphFenceCollection;
use super::module::{create_execution_modules, GpuExecutionModule};
use super::pass::RenderPassId;
use super::record::record_module_commands;
use super::submit::GpuCommandManager;

/// A compiled frame, ready for recording and submission.
pub struct FrameGraphExecutionContext {
    modules: Arc<Vec<GpuExecutionModule>>,
    event_manager: Arc<GpuResourceEventManager>,
}

impl FrameGraphExecutionContext {
    /// The compiled execution modules, in submission order.
    #[must_use]
    pub fn modules(&self) -> &[GpuExecutionModule] {
        &self.modules
    }

    /// The frame-wide event manager.
    #[must_use]
    pub fn event_manager(&self) -> &GpuResourceEventManager {
        &self.event_manager
    }

    /// Spawns one record job per module and announces the frame to the
    /// submission thread. Returns immediately; the frame's fence
    /// collection tracks completion.
    pub fn submit_frame_graph(
        self,
        command_manager: &Arc<GpuCommandManager>,
        fence_collection: &Arc<FrameGraphFenceCollection>,
        frame_number: u64,
        jobs: &JobSystem,
    ) {
        let (sink, present_requested) =
            command_manager.begin_frame_submission(frame_number, fence_collection, self.modules.len());

        if self.modules.is_empty() {
            return;
        }

        let mut record_group = jobs.create_group();
        record_group.reserve(self.modules.len());

        for module_index in 0..self.modules.len() {
            let modules = Arc::clone(&self.modules);
            let events = Arc::clone(&self.event_manager);
            let vault = Arc::clone(command_manager.context_vault());
            let present_requested = Arc::clone(&present_requested);
            let point = sink.point(modules[module_index].module_id());

            record_group.add_job(move || {
                let module = &modules[module_index];
                let group = record_module_commands(
                    module,
                    &events,
                    &vault,
                    &present_requested,
                    frame_number,
                );
                point.set_group(group);
            });
        }

        // Recording proceeds in the background; the submission thread
        // drains the sink in module order as groups arrive.
        let _notifier = record_group.execute_jobs_async();
    }
}

/// Compiles the frame's bundles: module packing, then parallel
/// per-resource state analysis.
#[must_use]
pub fn compile_frame_graph(
    bundles: Vec<RenderPassBundle>,
    alias_tracker: &TransientResourceAliasTracker,
    jobs: &JobSystem,
) -> FrameGraphExecutionContext {
    let modules = Arc::new(create_execution_modules(bundles));

    // Resource analysis is restricted to default-heap resources:
    // upload/readback resources never leave their initial state.
    let mut tracked_resources: FxHashMap<ResourceId, Arc<GpuResource>> = FxHashMap::default();
    let mut first_use_passes: FxHashMap<ResourceId, RenderPassId> = FxHashMap::default();

    for module in modules.iter() {
        for queue in QueueType::ALL {
            for pass in module.passes(queue) {
                for dependency in pass.dependencies() {
                    first_use_passes
                        .entry(dependency.resource.id())
                        .or_insert_with(|| pass.id());

                    if dependency.resource.heap_type() == HeapType::Default {
                        tracked_resources
                            .entry(dependency.resource.id())
                            .or_insert_with(|| Arc::clone(&dependency.resource));
                    }
                }
            }
        }
    }

    let mut event_manager = analyze_resources(&modules, tracked_resources, jobs);

    // Every member of a multi-resource alias group needs an aliasing
    // barrier ahead of its first use, before any transition or
    // initialization of the same pass.
    for (resource_id, first_use) in &first_use_passes {
        if !alias_tracker.is_aliased(*resource_id) {
            continue;
        }
        if let Some(lifetime) = alias_tracker.lifetime(*resource_id) {
            event_manager.add_event_front(
                *first_use,
                GpuResourceEvent {
                    resource: Arc::clone(&lifetime.resource),
                    kind: GpuResourceEventKind::Aliasing,
                },
            );
        }
    }

    FrameGraphExecutionContext {
        modules,
        event_manager: Arc::new(event_manager),
    }
}

/// Runs the per-resource analyzers across the worker pool and merges
/// their event managers.
fn analyze_resources(
    modules: &Arc<Vec<GpuExecutionModule>>,
    resources: FxHashMap<ResourceId, Arc<GpuResource>>,
    jobs: &JobSystem,
) -> GpuResourceEventManager {
    let mut event_manager = GpuResourceEventManager::new();
    if resources.is_empty() || modules.is_empty() {
        return event_manager;
    }

    let resources: Vec<Arc<GpuResource>> = resources.into_values().collect();
    let job_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(4)
        .min(resources.len());
    let chunk_size = resources.len().div_ceil(job_count);

    let partial_managers: Arc<Mutex<Vec<GpuResourceEventManager>>> =
        Arc::new(Mutex::new(Vec::with_capacity(job_count)));

    let mut analysis_group = jobs.create_group();
    analysis_group.reserve(job_count);

    for chunk in resources.chunks(chunk_size) {
        let chunk: Vec<Arc<GpuResource>> = chunk.to_vec();
        let modules = Arc::clone(modules);
        let partial_managers = Arc::clone(&partial_managers);

        analysis_group.add_job(move || {
            let mut local = GpuResourceEventManager::new();
            for resource in chunk {
                let analyzer = GpuResourceUsageAnalyzer::new(resource);
                local.merge(analyzer.traverse_frame(&modules));
            }
            partial_managers.lock().push(local);
        });
    }

    analysis_group.execute_jobs();

    for partial in partial_managers.lock().drain(..) {
        event_manager.merge(partial);
    }

    event_manager
}
