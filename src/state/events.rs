//! GPU Resource Events
//!
//! The output of state analysis: per-pass lists of events (transition
//! barriers, UAV barriers, aliasing barriers, special initialization)
//! that the record context replays immediately before each pass's
//! recorded commands.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::graph::pass::RenderPassId;
use crate::resource::{GpuResource, SpecialInitializationMethod};
use crate::rhi::states::ResourceStates;
use crate::rhi::types::BarrierFlags;

/// What must happen to a resource before a pass records.
#[derive(Clone, Debug)]
pub enum GpuResourceEventKind {
    /// A state transition barrier, possibly one half of a split barrier.
    Transition {
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
        flags: BarrierFlags,
    },
    /// UAV write hazard between two consecutive unordered-access uses.
    UavBarrier,
    /// The resource becomes the active occupant of its aliased heap
    /// region.
    Aliasing,
    /// First-use initialization of an RT/DS texture.
    SpecialInitialization(SpecialInitializationMethod),
}

/// One event against one resource.
#[derive(Clone)]
pub struct GpuResourceEvent {
    pub resource: Arc<GpuResource>,
    pub kind: GpuResourceEventKind,
}

impl std::fmt::Debug for GpuResourceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuResourceEvent")
            .field("resource", &self.resource.name())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Ordered per-pass event lists.
#[derive(Default)]
pub struct GpuResourceEventManager {
    events: FxHashMap<RenderPassId, Vec<GpuResourceEvent>>,
}

impl GpuResourceEventManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to a pass's list.
    pub fn add_event(&mut self, pass: RenderPassId, event: GpuResourceEvent) {
        self.events.entry(pass).or_default().push(event);
    }

    /// Prepends an event to a pass's list (aliasing barriers must precede
    /// the transitions and initialization of the same pass).
    pub fn add_event_front(&mut self, pass: RenderPassId, event: GpuResourceEvent) {
        self.events.entry(pass).or_default().insert(0, event);
    }

    /// Moves every event of `other` into this manager, preserving
    /// per-pass order.
    pub fn merge(&mut self, other: GpuResourceEventManager) {
        for (pass, mut events) in other.events {
            self.events.entry(pass).or_default().append(&mut events);
        }
    }

    /// The events of one pass, in emission order.
    #[must_use]
    pub fn events_for_pass(&self, pass: RenderPassId) -> &[GpuResourceEvent] {
        self.events.get(&pass).map_or(&[], Vec::as_slice)
    }

    /// Total number of events across all passes.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    /// Iterates `(pass, events)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (RenderPassId, &[GpuResourceEvent])> {
        self.events
            .iter()
            .map(|(pass, events)| (*pass, events.as_slice()))
    }
}
