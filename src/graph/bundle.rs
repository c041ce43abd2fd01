//! Render Pass Bundles
//!
//! A bundle is one group of render passes evaluated as a unit, holding a
//! pass list per queue class. The builder assigns every bundle a
//! globally ordered ID; those IDs are the time axis of transient
//! lifetime tracking. Injected synchronization bundles are marked so the
//! module packer never merges them away.

use crate::rhi::types::{QueueFlags, QueueType};

use super::pass::{GpuQueue, RenderPass, RenderPassNode, ResourceDependency};

/// One group of render passes with a globally ordered ID.
pub struct RenderPassBundle {
    id: u32,
    direct_passes: Vec<RenderPassNode>,
    compute_passes: Vec<RenderPassNode>,
    copy_passes: Vec<RenderPassNode>,
    is_sync_point: bool,
}

impl Default for RenderPassBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPassBundle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: u32::MAX,
            direct_passes: Vec::new(),
            compute_passes: Vec::new(),
            copy_passes: Vec::new(),
            is_sync_point: false,
        }
    }

    /// Adds a typed pass to its queue's list.
    pub fn add_render_pass<Q: GpuQueue>(&mut self, pass: RenderPass<Q>) -> &mut Self {
        self.add_pass_node(pass.into_node());
        self
    }

    pub(crate) fn add_pass_node(&mut self, node: RenderPassNode) {
        match node.queue() {
            QueueType::Direct => self.direct_passes.push(node),
            QueueType::Compute => self.compute_passes.push(node),
            QueueType::Copy => self.copy_passes.push(node),
        }
    }

    /// The bundle's globally ordered ID. Assigned by the frame graph;
    /// unassigned bundles report `u32::MAX`.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    /// The passes of one queue class, in declaration order.
    #[must_use]
    pub fn passes(&self, queue: QueueType) -> &[RenderPassNode] {
        match queue {
            QueueType::Direct => &self.direct_passes,
            QueueType::Compute => &self.compute_passes,
            QueueType::Copy => &self.copy_passes,
        }
    }

    /// Total pass count across all queues.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.direct_passes.len() + self.compute_passes.len() + self.copy_passes.len()
    }

    /// The queue classes this bundle records on.
    #[must_use]
    pub fn used_queues(&self) -> QueueFlags {
        let mut flags = QueueFlags::empty();
        if !self.direct_passes.is_empty() {
            flags |= QueueFlags::DIRECT;
        }
        if !self.compute_passes.is_empty() {
            flags |= QueueFlags::COMPUTE;
        }
        if !self.copy_passes.is_empty() {
            flags |= QueueFlags::COPY;
        }
        flags
    }

    /// `true` for injected cross-queue synchronization bundles.
    #[inline]
    #[must_use]
    pub fn is_sync_point(&self) -> bool {
        self.is_sync_point
    }

    pub(crate) fn mark_as_sync_point(&mut self) {
        self.is_sync_point = true;
    }

    /// Every resource dependency of every pass, in queue-major order.
    pub fn resource_dependencies(&self) -> impl Iterator<Item = &ResourceDependency> {
        QueueType::ALL
            .into_iter()
            .flat_map(|queue| self.passes(queue))
            .flat_map(RenderPassNode::dependencies)
    }
}
