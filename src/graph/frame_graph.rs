//! Frame Graph
//!
//! [`FrameGraph`] drives one frame slot end to end:
//!
//! 1. wait for the slot's previous frame, then reset per-frame state
//!    (descriptors, blackboard, transients, fences);
//! 2. collect a [`FrameGraphBuilder`] from every enabled render module,
//!    on worker jobs;
//! 3. inject sync points and assign globally ordered bundle IDs;
//! 4. feed the alias tracker and compute aliasable groups;
//! 5. allocate GPU memory and run the residency pass *concurrently* with
//!    compilation (module packing + state analysis);
//! 6. hand the compiled frame to the recording and submission machinery.
//!
//! A small ring of frame graphs ([`FrameGraphManager`]) keeps several
//! frames in flight; slot `i` serves the frames where
//! `frame_number % ring_size == i`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::alias::TransientResourceAliasTracker;
use crate::descriptors::GpuResourceDescriptorHeap;
use crate::errors::{ForgeError, Result};
use crate::jobs::JobSystem;
use crate::memory::residency::GpuResidencyManager;
use crate::resource::{
    CreationPreference, GpuResource, LifetimeType, PersistentGpuResourceManager, ResourceId,
    TransientGpuResourceManager,
};
use crate::rhi::device::{Device, Fence};
use crate::settings::RenderSettings;

use rustc_hash::FxHashMap;

use super::blackboard::Blackboard;
use super::builder::FrameGraphBuilder;
use super::compiler::compile_frame_graph;
use super::fence_collection::FrameGraphFenceCollection;
use super::submit::GpuCommandManager;

/// Number of frames the engine keeps in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// A render module contributes one builder of passes per frame.
pub trait RenderModule: Send {
    /// Module name, for logs and debugging.
    fn name(&self) -> &str;

    /// Disabled modules are skipped entirely for the frame.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Fills the module's builder for the current frame.
    fn build_frame_graph(&mut self, builder: &mut FrameGraphBuilder);
}

/// Shared subsystem handles a frame graph works against.
#[derive(Clone)]
pub struct FrameGraphContext {
    pub device: Device,
    pub jobs: JobSystem,
    pub residency: Arc<GpuResidencyManager>,
    pub persistent_resources: Arc<PersistentGpuResourceManager>,
    pub descriptor_heap: GpuResourceDescriptorHeap,
    pub command_manager: Arc<GpuCommandManager>,
}

/// One frame slot.
pub struct FrameGraph {
    context: FrameGraphContext,
    blackboard: Arc<Blackboard>,
    transient_resources: Arc<TransientGpuResourceManager>,
    fence_collection: Arc<FrameGraphFenceCollection>,
    /// Frame number this slot last tracked; its per-frame descriptor
    /// half is reset on reuse.
    previous_frame_number: Option<u64>,
}

impl FrameGraph {
    #[must_use]
    pub fn new(context: FrameGraphContext, transients: Arc<TransientGpuResourceManager>) -> Self {
        Self {
            context,
            blackboard: Arc::new(Blackboard::new()),
            transient_resources: transients,
            fence_collection: Arc::new(FrameGraphFenceCollection::new()),
            previous_frame_number: None,
        }
    }

    /// The slot's blackboard.
    #[must_use]
    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.blackboard
    }

    /// The slot's fence collection.
    #[must_use]
    pub fn fence_collection(&self) -> &Arc<FrameGraphFenceCollection> {
        &self.fence_collection
    }

    /// Generates, compiles, and submits one frame.
    pub fn process_frame(
        &mut self,
        frame_number: u64,
        render_modules: &[Arc<Mutex<dyn RenderModule>>],
    ) -> Result<()> {
        self.reset_frame_graph(frame_number)?;

        // ── Builder collection ─────────────────────────────────────────
        let mut builders = self.create_frame_graph_builders(render_modules);

        // ── Sync points + globally ordered bundle IDs ──────────────────
        let mut next_bundle_id = 0u32;
        for builder in &mut builders {
            builder.create_sync_points();
            next_bundle_id += builder.assign_bundle_ids(next_bundle_id);
        }

        // ── Resource usage + transient ownership ───────────────────────
        let mut dependency_set: FxHashMap<ResourceId, Arc<GpuResource>> = FxHashMap::default();
        for builder in &mut builders {
            builder.update_resource_usage(frame_number);
            dependency_set.extend(builder.extract_dependency_cache());
            self.transient_resources
                .add_transient_resources(builder.extract_transient_resources());
        }

        // ── Transient aliasing ─────────────────────────────────────────
        let mut alias_tracker = TransientResourceAliasTracker::new(Arc::clone(
            self.transient_resources.heap_manager(),
        ));
        for builder in &builders {
            builder.update_alias_tracker(&mut alias_tracker);
        }
        alias_tracker.calculate_aliasable_groups();
        let alias_tracker = Arc::new(alias_tracker);

        // ── Memory allocation + residency, concurrent with compilation ─
        let allocation = self.begin_resource_allocation(&dependency_set, &alias_tracker);

        let bundles: Vec<_> = builders
            .iter_mut()
            .flat_map(FrameGraphBuilder::take_bundles)
            .collect();
        let execution_context = compile_frame_graph(bundles, &alias_tracker, &self.context.jobs);

        // Allocation runs on the pool; steal work while it finishes.
        while !allocation.finished.load(Ordering::Acquire) {
            if !self.context.jobs.try_execute_job() {
                std::thread::yield_now();
            }
        }

        let mut results = allocation.results.lock();
        if let Some(error) = results.error.take() {
            return Err(error);
        }
        if let Some(fence) = results.make_resident_fence.take() {
            self.fence_collection.set_make_resident_fence(fence);
        }
        drop(results);

        // ── Record + submit ────────────────────────────────────────────
        execution_context.submit_frame_graph(
            &self.context.command_manager,
            &self.fence_collection,
            frame_number,
            &self.context.jobs,
        );

        Ok(())
    }

    /// Waits for the slot's previous frame and clears per-frame state.
    fn reset_frame_graph(&mut self, frame_number: u64) -> Result<()> {
        // The slot's previous frame owns this blackboard, these
        // transient resources, and one per-frame descriptor half; none
        // may be touched until the GPU is done with it.
        self.fence_collection.wait_for_frame_completion()?;

        if let Some(previous) = self.previous_frame_number.take() {
            self.context
                .descriptor_heap
                .reset_per_frame_descriptors(previous);
        }
        self.previous_frame_number = Some(frame_number);

        self.blackboard.clear();
        self.transient_resources.delete_transient_resources();
        self.fence_collection.reset();
        self.context.residency.clear_residency_requests();

        Ok(())
    }

    /// Runs every enabled module's builder callback on a worker job and
    /// collects the builders in module order.
    fn create_frame_graph_builders(
        &self,
        render_modules: &[Arc<Mutex<dyn RenderModule>>],
    ) -> Vec<FrameGraphBuilder> {
        let slots: Vec<Arc<Mutex<Option<FrameGraphBuilder>>>> = render_modules
            .iter()
            .map(|_| Arc::new(Mutex::new(None)))
            .collect();

        let mut builder_group = self.context.jobs.create_group();
        builder_group.reserve(render_modules.len());

        for (module, slot) in render_modules.iter().zip(&slots) {
            if !module.lock().is_enabled() {
                continue;
            }

            let module = Arc::clone(module);
            let slot = Arc::clone(slot);
            let device = self.context.device.clone();
            let blackboard = Arc::clone(&self.blackboard);

            builder_group.add_job(move || {
                let mut builder = FrameGraphBuilder::new(device, blackboard);
                module.lock().build_frame_graph(&mut builder);
                *slot.lock() = Some(builder);
            });
        }

        builder_group.execute_jobs();

        slots
            .into_iter()
            .filter_map(|slot| slot.lock().take())
            .collect()
    }

    /// Kicks off persistent + transient allocation and the residency
    /// pass on the pool.
    fn begin_resource_allocation(
        &self,
        dependency_set: &FxHashMap<ResourceId, Arc<GpuResource>>,
        alias_tracker: &Arc<TransientResourceAliasTracker>,
    ) -> AllocationTask {
        let task = AllocationTask {
            results: Arc::new(Mutex::new(AllocationResults::default())),
            finished: Arc::new(AtomicBool::new(false)),
        };

        let uncreated_persistent: Vec<Arc<GpuResource>> = dependency_set
            .values()
            .filter(|resource| {
                resource.lifetime() == LifetimeType::Persistent && !resource.is_created()
            })
            .cloned()
            .collect();

        let jobs = self.context.jobs.clone();
        let persistent_manager = Arc::clone(&self.context.persistent_resources);
        let transient_manager = Arc::clone(&self.transient_resources);
        let residency = Arc::clone(&self.context.residency);
        let alias_tracker = Arc::clone(alias_tracker);
        let results = Arc::clone(&task.results);
        let finished = Arc::clone(&task.finished);

        self.context.jobs.submit(move || {
            let outcome = allocate_frame_resources(
                &jobs,
                &persistent_manager,
                &transient_manager,
                &residency,
                &alias_tracker,
                &uncreated_persistent,
            );

            {
                let mut results = results.lock();
                match outcome {
                    Ok(fence) => results.make_resident_fence = fence,
                    Err(error) => results.error = Some(error),
                }
            }
            finished.store(true, Ordering::Release);
        });

        task
    }
}

#[derive(Default)]
struct AllocationResults {
    error: Option<ForgeError>,
    make_resident_fence: Option<Fence>,
}

struct AllocationTask {
    results: Arc<Mutex<AllocationResults>>,
    finished: Arc<AtomicBool>,
}

/// Persistent + transient allocation followed by the residency pass.
fn allocate_frame_resources(
    jobs: &JobSystem,
    persistent_manager: &Arc<PersistentGpuResourceManager>,
    transient_manager: &TransientGpuResourceManager,
    residency: &GpuResidencyManager,
    alias_tracker: &TransientResourceAliasTracker,
    uncreated_persistent: &[Arc<GpuResource>],
) -> Result<Option<Fence>> {
    // Committed creation takes no shared engine locks, so each committed
    // resource becomes its own job; placed allocation contends on the
    // heap pool and runs on this thread instead.
    let committed: Vec<Arc<GpuResource>> = uncreated_persistent
        .iter()
        .filter(|resource| resource.creation_preference() == CreationPreference::Committed)
        .cloned()
        .collect();

    let committed_errors: Arc<Mutex<Vec<ForgeError>>> = Arc::new(Mutex::new(Vec::new()));
    let committed_notifier = if committed.is_empty() {
        None
    } else {
        let mut group = jobs.create_group();
        group.reserve(committed.len());
        for resource in committed {
            let errors = Arc::clone(&committed_errors);
            let manager = Arc::clone(persistent_manager);
            group.add_job(move || {
                if let Err(error) = manager.allocate(&resource) {
                    errors.lock().push(error);
                }
            });
        }
        Some(group.execute_jobs_async())
    };

    let mut first_error: Option<ForgeError> = None;

    for resource in uncreated_persistent
        .iter()
        .filter(|resource| resource.creation_preference() == CreationPreference::Placed)
    {
        if let Err(error) = persistent_manager.allocate(resource) {
            first_error = Some(error);
            break;
        }
    }

    if first_error.is_none() {
        for group in alias_tracker.aliasable_groups() {
            if group.resources.is_empty() {
                continue;
            }
            if let Err(error) = transient_manager.allocate_aliased_group(&group.resources) {
                first_error = Some(error);
                break;
            }
        }
    }

    if let Some(notifier) = committed_notifier {
        notifier.wait(jobs);
    }
    if first_error.is_none() {
        first_error = committed_errors.lock().pop();
    }

    if let Some(error) = first_error {
        return Err(error);
    }

    let residency_results = residency.execute_residency_pass()?;
    Ok(residency_results.make_resident_fence)
}

// ============================================================================
// FrameGraphManager
// ============================================================================

/// Ring of frame graphs, one per frame in flight.
pub struct FrameGraphManager {
    frame_graphs: Vec<FrameGraph>,
    frame_number: u64,
    settings: RenderSettings,
    last_frame_start: Option<std::time::Instant>,
}

impl FrameGraphManager {
    #[must_use]
    pub fn new(context: &FrameGraphContext, heap_manager: Arc<crate::memory::heap::GpuResourceHeapManager>, settings: RenderSettings) -> Self {
        let frame_graphs = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| {
                FrameGraph::new(
                    context.clone(),
                    Arc::new(TransientGpuResourceManager::new(Arc::clone(&heap_manager))),
                )
            })
            .collect();

        Self {
            frame_graphs,
            frame_number: 0,
            settings,
            last_frame_start: None,
        }
    }

    /// The frame number the next call to
    /// [`process_frame`](Self::process_frame) will use.
    #[must_use]
    pub fn current_frame_number(&self) -> u64 {
        self.frame_number
    }

    /// The slot that serves `frame_number`.
    #[must_use]
    pub fn frame_graph_for(&self, frame_number: u64) -> &FrameGraph {
        &self.frame_graphs[(frame_number as usize) % MAX_FRAMES_IN_FLIGHT]
    }

    /// Processes one frame across the ring, honouring the frame-rate
    /// limit at the frame boundary.
    pub fn process_frame(
        &mut self,
        render_modules: &[Arc<Mutex<dyn RenderModule>>],
    ) -> Result<()> {
        if let (Some(min_frame_time), Some(last_start)) =
            (self.settings.min_frame_time(), self.last_frame_start)
        {
            let elapsed = last_start.elapsed();
            if elapsed < min_frame_time {
                std::thread::sleep(min_frame_time - elapsed);
            }
        }
        self.last_frame_start = Some(std::time::Instant::now());

        let frame_number = self.frame_number;
        let slot = (frame_number as usize) % MAX_FRAMES_IN_FLIGHT;
        self.frame_graphs[slot].process_frame(frame_number, render_modules)?;

        self.frame_number += 1;
        Ok(())
    }

    /// Blocks until every in-flight frame has completed on the GPU.
    pub fn wait_for_idle(&self) -> Result<()> {
        for frame_graph in &self.frame_graphs {
            frame_graph.fence_collection().wait_for_frame_completion()?;
        }
        Ok(())
    }
}
