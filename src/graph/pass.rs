//! Render Passes
//!
//! A render pass is the unit of recorded GPU work: a queue class, a
//! name, an ordered list of resource dependencies, and a record
//! callback. Passes are immutable once their bundle is submitted to the
//! frame graph; the compiler reads the dependency lists, the record
//! phase consumes the callbacks.
//!
//! The typed wrapper [`RenderPass<Q>`] restricts the callback signature
//! to the context of its queue class; internally everything is stored as
//! an erased [`RenderPassNode`].

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::resource::GpuResource;
use crate::rhi::states::ResourceStates;
use crate::rhi::types::{ALL_SUBRESOURCES, QueueType};

use super::record::{ComputeContext, CopyContext, DirectContext, RecordContext};

static NEXT_RENDER_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique render pass identity; the key of the event manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderPassId(u64);

impl RenderPassId {
    fn next() -> Self {
        Self(NEXT_RENDER_PASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Constructs an ID from a raw value (tests only).
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// One declared resource dependency of a pass.
#[derive(Clone)]
pub struct ResourceDependency {
    pub resource: Arc<GpuResource>,
    pub required_state: ResourceStates,
    /// A subresource index, or [`ALL_SUBRESOURCES`].
    pub subresource: u32,
}

pub(crate) type RecordCallback = Box<dyn for<'a> FnOnce(RecordContext<'a>) + Send + 'static>;

/// Queue-erased render pass storage.
pub struct RenderPassNode {
    id: RenderPassId,
    queue: QueueType,
    name: String,
    pix_color: u32,
    dependencies: SmallVec<[ResourceDependency; 8]>,
    callback: Mutex<Option<RecordCallback>>,
}

impl RenderPassNode {
    #[must_use]
    pub fn new(queue: QueueType) -> Self {
        Self {
            id: RenderPassId::next(),
            queue,
            name: String::new(),
            pix_color: 0,
            dependencies: SmallVec::new(),
            callback: Mutex::new(None),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> RenderPassId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[inline]
    #[must_use]
    pub fn pix_color(&self) -> u32 {
        self.pix_color
    }

    pub fn set_pix_color(&mut self, color: u32) {
        self.pix_color = color;
    }

    #[must_use]
    pub fn dependencies(&self) -> &[ResourceDependency] {
        &self.dependencies
    }

    pub fn add_resource_dependency(
        &mut self,
        resource: &Arc<GpuResource>,
        required_state: ResourceStates,
        subresource: u32,
    ) {
        debug_assert!(
            subresource == ALL_SUBRESOURCES || subresource < resource.subresource_count(),
            "subresource index out of range"
        );
        self.dependencies.push(ResourceDependency {
            resource: Arc::clone(resource),
            required_state,
            subresource,
        });
    }

    /// `true` if the pass declared a dependency covering `subresource`
    /// of `resource` with at least the given access.
    #[must_use]
    pub fn has_dependency(&self, resource: &GpuResource, required_state: ResourceStates) -> bool {
        self.dependencies.iter().any(|dependency| {
            dependency.resource.id() == resource.id()
                && (required_state.is_common()
                    || dependency.required_state.contains(required_state))
        })
    }

    pub(crate) fn set_callback(&mut self, callback: RecordCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Takes the record callback; each pass records exactly once.
    pub(crate) fn take_callback(&self) -> Option<RecordCallback> {
        self.callback.lock().take()
    }
}

// ============================================================================
// Queue markers
// ============================================================================

mod sealed {
    pub trait Sealed {}
}

/// Marker trait of the three queue classes.
pub trait GpuQueue: sealed::Sealed + 'static {
    const QUEUE_TYPE: QueueType;
}

/// Graphics queue marker.
pub enum DirectQueue {}
/// Async compute queue marker.
pub enum ComputeQueue {}
/// Copy queue marker.
pub enum CopyQueue {}

impl sealed::Sealed for DirectQueue {}
impl sealed::Sealed for ComputeQueue {}
impl sealed::Sealed for CopyQueue {}

impl GpuQueue for DirectQueue {
    const QUEUE_TYPE: QueueType = QueueType::Direct;
}
impl GpuQueue for ComputeQueue {
    const QUEUE_TYPE: QueueType = QueueType::Compute;
}
impl GpuQueue for CopyQueue {
    const QUEUE_TYPE: QueueType = QueueType::Copy;
}

// ============================================================================
// Typed render pass
// ============================================================================

/// A render pass targeting queue class `Q`.
pub struct RenderPass<Q: GpuQueue> {
    node: RenderPassNode,
    _queue: PhantomData<Q>,
}

impl<Q: GpuQueue> RenderPass<Q> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut node = RenderPassNode::new(Q::QUEUE_TYPE);
        node.set_name(name);
        Self {
            node,
            _queue: PhantomData,
        }
    }

    #[must_use]
    pub fn id(&self) -> RenderPassId {
        self.node.id()
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.node.set_name(name);
        self
    }

    pub fn set_pix_color(&mut self, color: u32) -> &mut Self {
        self.node.set_pix_color(color);
        self
    }

    /// Declares a dependency on every subresource of `resource`.
    pub fn add_resource_dependency(
        &mut self,
        resource: &Arc<GpuResource>,
        required_state: ResourceStates,
    ) -> &mut Self {
        self.node
            .add_resource_dependency(resource, required_state, ALL_SUBRESOURCES);
        self
    }

    /// Declares a dependency on one subresource of `resource`.
    pub fn add_subresource_dependency(
        &mut self,
        resource: &Arc<GpuResource>,
        required_state: ResourceStates,
        subresource: u32,
    ) -> &mut Self {
        self.node
            .add_resource_dependency(resource, required_state, subresource);
        self
    }

    /// Number of declared dependencies.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.node.dependencies().len()
    }

    pub(crate) fn into_node(self) -> RenderPassNode {
        self.node
    }
}

impl RenderPass<DirectQueue> {
    /// Sets the callback that records the pass's commands.
    pub fn set_record_callback(
        &mut self,
        callback: impl FnOnce(&mut DirectContext<'_>) + Send + 'static,
    ) -> &mut Self {
        self.node.set_callback(Box::new(move |raw: RecordContext<'_>| {
            let mut context = DirectContext::new(raw);
            callback(&mut context);
        }));
        self
    }
}

impl RenderPass<ComputeQueue> {
    /// Sets the callback that records the pass's commands.
    pub fn set_record_callback(
        &mut self,
        callback: impl FnOnce(&mut ComputeContext<'_>) + Send + 'static,
    ) -> &mut Self {
        self.node.set_callback(Box::new(move |raw: RecordContext<'_>| {
            let mut context = ComputeContext::new(raw);
            callback(&mut context);
        }));
        self
    }
}

impl RenderPass<CopyQueue> {
    /// Sets the callback that records the pass's commands.
    pub fn set_record_callback(
        &mut self,
        callback: impl FnOnce(&mut CopyContext<'_>) + Send + 'static,
    ) -> &mut Self {
        self.node.set_callback(Box::new(move |raw: RecordContext<'_>| {
            let mut context = CopyContext::new(raw);
            callback(&mut context);
        }));
        self
    }
}
