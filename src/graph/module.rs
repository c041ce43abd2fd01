//! GPU Execution Modules
//!
//! An execution module is the unit of submission: one
//! `ExecuteCommandLists` call per queue class it uses. The packer merges
//! adjacent single-queue bundles of the same class into one module to
//! amortize submission overhead; multi-queue bundles and sync points
//! always get a module of their own, since merging them would let
//! implicit state decay erase the transitions they carry.

use crate::rhi::types::{QueueFlags, QueueType};

use super::bundle::RenderPassBundle;
use super::pass::RenderPassNode;

/// Upper bound on passes per module.
///
/// A bundle larger than this still becomes a (single) module of its own;
/// the cap only stops further bundles from being merged in. The value is
/// a tunable found by experimentation, not a contract.
pub const MAX_RENDER_PASSES_PER_EXECUTION_MODULE: usize = 200;

/// A contiguous run of bundles sharing one submission.
pub struct GpuExecutionModule {
    module_id: u32,
    bundles: Vec<RenderPassBundle>,
}

impl Default for GpuExecutionModule {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuExecutionModule {
    #[must_use]
    pub fn new() -> Self {
        Self {
            module_id: u32::MAX,
            bundles: Vec::new(),
        }
    }

    /// Submission-order index, assigned just before submission.
    #[inline]
    #[must_use]
    pub fn module_id(&self) -> u32 {
        self.module_id
    }

    pub(crate) fn set_module_id(&mut self, id: u32) {
        self.module_id = id;
    }

    #[must_use]
    pub fn bundles(&self) -> &[RenderPassBundle] {
        &self.bundles
    }

    /// Total pass count across all bundles and queues.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.bundles.iter().map(RenderPassBundle::pass_count).sum()
    }

    /// Union of the queue classes used by the contained bundles.
    #[must_use]
    pub fn used_queues(&self) -> QueueFlags {
        self.bundles
            .iter()
            .fold(QueueFlags::empty(), |flags, bundle| {
                flags | bundle.used_queues()
            })
    }

    /// The passes of one queue class, in bundle order.
    pub fn passes(&self, queue: QueueType) -> impl Iterator<Item = &RenderPassNode> {
        self.bundles.iter().flat_map(move |bundle| bundle.passes(queue))
    }

    /// Bundle IDs covered by this module, `(first, last)` inclusive.
    #[must_use]
    pub fn bundle_id_range(&self) -> Option<(u32, u32)> {
        let first = self.bundles.first()?.id();
        let last = self.bundles.last()?.id();
        Some((first, last))
    }

    fn can_merge_bundle(&self, bundle: &RenderPassBundle) -> bool {
        if self.bundles.is_empty() {
            return true;
        }

        // A sync point merged into a run of direct bundles could have its
        // transitions made redundant by implicit state decay at the
        // module boundary that no longer exists.
        if bundle.is_sync_point() {
            return false;
        }

        // Only runs of same-class single-queue bundles are merged; any
        // multi-queue bundle carries cross-queue resource constraints
        // that require its own ExecuteCommandLists boundary.
        if self.used_queues() != bundle.used_queues() || bundle.used_queues().count() != 1 {
            return false;
        }

        self.pass_count() + bundle.pass_count() <= MAX_RENDER_PASSES_PER_EXECUTION_MODULE
    }

    fn add_bundle(&mut self, bundle: RenderPassBundle) {
        self.bundles.push(bundle);
    }
}

/// Greedily packs bundles, in ID order, into execution modules.
#[must_use]
pub fn create_execution_modules(
    bundles: impl IntoIterator<Item = RenderPassBundle>,
) -> Vec<GpuExecutionModule> {
    let mut modules: Vec<GpuExecutionModule> = Vec::new();
    let mut current = GpuExecutionModule::new();

    for bundle in bundles {
        if !current.can_merge_bundle(&bundle) {
            modules.push(current);
            current = GpuExecutionModule::new();
        }
        current.add_bundle(bundle);
    }

    if current.pass_count() > 0 {
        modules.push(current);
    }

    for (index, module) in modules.iter_mut().enumerate() {
        module.set_module_id(index as u32);
    }

    modules
}
