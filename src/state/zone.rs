//! Resource State Zones
//!
//! A zone is one pass's relationship to one subresource: either the
//! state the pass requires it in, or *null* when the pass does not
//! reference it. Null zones matter: they are the candidate begin points
//! for split barriers.

use crate::graph::pass::RenderPassId;
use crate::rhi::states::ResourceStates;
use crate::rhi::types::QueueType;

/// Identity of a pass inside the compiled frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassRef {
    pub id: RenderPassId,
    pub queue: QueueType,
}

/// One pass's slot in a subresource's frame-long state timeline.
#[derive(Clone, Debug)]
pub struct ResourceStateZone {
    /// `None` for passes that do not reference the subresource.
    pub required_state: Option<ResourceStates>,
    /// The pass whose recording this zone precedes.
    pub pass: PassRef,
    /// Index of the execution module containing the pass.
    pub module_index: usize,
    /// Set on the first non-null zone of a segment when implicit
    /// promotion out of `COMMON` can satisfy the required state.
    pub is_implicit_transition: bool,
}

impl ResourceStateZone {
    /// A zone for a pass that references the subresource.
    #[must_use]
    pub fn new(
        required_state: ResourceStates,
        pass: PassRef,
        module_index: usize,
    ) -> Self {
        Self {
            required_state: Some(required_state),
            pass,
            module_index,
            is_implicit_transition: false,
        }
    }

    /// A null zone for a pass that does not reference the subresource.
    #[must_use]
    pub fn null(pass: PassRef, module_index: usize) -> Self {
        Self {
            required_state: None,
            pass,
            module_index,
            is_implicit_transition: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.required_state.is_none()
    }
}
