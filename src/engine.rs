//! Engine Assembly
//!
//! [`ForgeEngine`] wires the process-wide subsystems together in
//! dependency order — device, job system, residency, heap pool,
//! descriptor heap, presentation, command manager, PSO cache — and owns
//! the frame-graph ring. Everything is constructed in
//! [`ForgeEngine::new`] and torn down in [`ForgeEngine::shutdown`];
//! nothing is lazily initialized.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptors::{DescriptorHeapConfig, GpuResourceDescriptorHeap};
use crate::errors::Result;
use crate::graph::{FrameGraphContext, FrameGraphManager, GpuCommandManager, RenderModule};
use crate::jobs::JobSystem;
use crate::memory::heap::GpuResourceHeapManager;
use crate::memory::residency::GpuResidencyManager;
use crate::pso::PsoLibrary;
use crate::present::PresentationManager;
use crate::resource::PersistentGpuResourceManager;
use crate::rhi::device::{Device, DeviceBackend};
use crate::settings::RenderSettings;

/// Construction parameters for [`ForgeEngine`].
pub struct ForgeEngineDesc {
    pub settings: RenderSettings,
    pub descriptor_heap: DescriptorHeapConfig,
    /// Default size of pooled GPU heaps.
    pub default_heap_size: u64,
    /// Base name of the PSO library cache file.
    pub pso_cache_name: String,
}

impl Default for ForgeEngineDesc {
    fn default() -> Self {
        Self {
            settings: RenderSettings::default(),
            descriptor_heap: DescriptorHeapConfig::default(),
            default_heap_size: crate::memory::heap::DEFAULT_HEAP_SIZE,
            pso_cache_name: "forge_pso_cache".into(),
        }
    }
}

/// The assembled engine.
pub struct ForgeEngine {
    device: Device,
    jobs: JobSystem,
    residency: Arc<GpuResidencyManager>,
    heap_manager: Arc<GpuResourceHeapManager>,
    persistent_resources: Arc<PersistentGpuResourceManager>,
    descriptor_heap: GpuResourceDescriptorHeap,
    presentation: Arc<PresentationManager>,
    command_manager: Arc<GpuCommandManager>,
    pso_library: Arc<PsoLibrary>,
    frame_graphs: FrameGraphManager,
}

impl ForgeEngine {
    /// Builds the engine on top of a device backend.
    ///
    /// Fails if the device misses the minimum feature requirements
    /// (Shader Model 6.0, Resource Binding Tier 2).
    pub fn new(backend: Arc<dyn DeviceBackend>, desc: ForgeEngineDesc) -> Result<Self> {
        let device = Device::new(backend)?;
        let jobs = JobSystem::new();

        let residency = Arc::new(GpuResidencyManager::new(device.clone()));
        let heap_manager = Arc::new(GpuResourceHeapManager::with_default_heap_size(
            device.clone(),
            Arc::clone(&residency),
            desc.default_heap_size,
        ));
        let persistent_resources = Arc::new(PersistentGpuResourceManager::new(
            Arc::clone(&heap_manager),
            Arc::clone(&residency),
        ));
        let descriptor_heap = GpuResourceDescriptorHeap::new(device.clone(), desc.descriptor_heap)?;
        let presentation = Arc::new(PresentationManager::new(jobs.clone()));
        let command_manager = GpuCommandManager::new(device.clone(), Arc::clone(&presentation));

        let cache_root = std::env::current_dir().unwrap_or_else(|_| ".".into());
        let pso_library = PsoLibrary::load(&cache_root, &desc.pso_cache_name);

        let context = FrameGraphContext {
            device: device.clone(),
            jobs: jobs.clone(),
            residency: Arc::clone(&residency),
            persistent_resources: Arc::clone(&persistent_resources),
            descriptor_heap: descriptor_heap.clone(),
            command_manager: Arc::clone(&command_manager),
        };
        let frame_graphs = FrameGraphManager::new(&context, Arc::clone(&heap_manager), desc.settings);

        Ok(Self {
            device,
            jobs,
            residency,
            heap_manager,
            persistent_resources,
            descriptor_heap,
            presentation,
            command_manager,
            pso_library,
            frame_graphs,
        })
    }

    // ── Frame driving ──────────────────────────────────────────────────────

    /// Generates, compiles, and submits the next frame.
    pub fn process_frame(
        &mut self,
        render_modules: &[Arc<Mutex<dyn RenderModule>>],
    ) -> Result<()> {
        self.frame_graphs.process_frame(render_modules)
    }

    /// Blocks until every in-flight frame has completed.
    pub fn wait_for_idle(&self) -> Result<()> {
        self.frame_graphs.wait_for_idle()
    }

    /// Drains in-flight frames, flushes the PSO cache, and stops the
    /// worker pool.
    pub fn shutdown(self) -> Result<()> {
        let result = self.wait_for_idle();
        self.pso_library.begin_async_rewrite(&self.jobs);
        self.jobs.shutdown();
        result
    }

    // ── Subsystem access ───────────────────────────────────────────────────

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[must_use]
    pub fn jobs(&self) -> &JobSystem {
        &self.jobs
    }

    #[must_use]
    pub fn residency(&self) -> &Arc<GpuResidencyManager> {
        &self.residency
    }

    #[must_use]
    pub fn heap_manager(&self) -> &Arc<GpuResourceHeapManager> {
        &self.heap_manager
    }

    #[must_use]
    pub fn persistent_resources(&self) -> &Arc<PersistentGpuResourceManager> {
        &self.persistent_resources
    }

    #[must_use]
    pub fn descriptor_heap(&self) -> &GpuResourceDescriptorHeap {
        &self.descriptor_heap
    }

    #[must_use]
    pub fn presentation(&self) -> &Arc<PresentationManager> {
        &self.presentation
    }

    #[must_use]
    pub fn command_manager(&self) -> &Arc<GpuCommandManager> {
        &self.command_manager
    }

    #[must_use]
    pub fn pso_library(&self) -> &Arc<PsoLibrary> {
        &self.pso_library
    }

    #[must_use]
    pub fn frame_graphs(&self) -> &FrameGraphManager {
        &self.frame_graphs
    }
}
