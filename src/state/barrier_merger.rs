//! Barrier Merger
//!
//! Walks one subresource's optimized zone timeline and emits the actual
//! barrier events. For every state change it picks, in order of
//! preference:
//!
//! 1. **no barrier** — the before-state already contains the after-state
//!    (for non-`COMMON` targets), the states are equal, or the zone is an
//!    implicit promotion;
//! 2. **split barrier** — some earlier candidate pass's queue can legally
//!    record the transition: `BEGIN_ONLY` there, `END_ONLY` at the
//!    requiring pass, hiding the barrier latency in the gap;
//! 3. **immediate barrier** at the requiring pass.
//!
//! Candidate begin passes are the null zones since the subresource's last
//! use: one slot per queue class, earliest pass wins, and nothing past a
//! direct-queue candidate is kept (the direct queue can record any
//! transition). Consecutive unordered-access uses with no intervening
//! transition get a UAV barrier instead.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::resource::GpuResource;
use crate::rhi::states::{can_queue_perform_transition, ResourceStates};
use crate::rhi::types::{BarrierFlags, QueueType};

use super::events::{GpuResourceEvent, GpuResourceEventKind, GpuResourceEventManager};
use super::zone::{PassRef, ResourceStateZone};

/// Per-subresource barrier emission state.
pub struct SubResourceBarrierMerger {
    resource: Arc<GpuResource>,
    subresource: u32,
    before_state: ResourceStates,
    /// Candidate begin passes for the next transition, at most one per
    /// queue class, in arrival order.
    candidate_begin_passes: SmallVec<[PassRef; 3]>,
    last_use_was_unordered_access: bool,
    /// RT/DS textures may not host split-barrier begins before their
    /// first-use initialization has run.
    awaiting_special_initialization: bool,
}

impl SubResourceBarrierMerger {
    #[must_use]
    pub fn new(resource: Arc<GpuResource>, subresource: u32, start_state: ResourceStates) -> Self {
        let awaiting_special_initialization = resource.requires_special_initialization();
        Self {
            resource,
            subresource,
            before_state: start_state,
            candidate_begin_passes: SmallVec::new(),
            last_use_was_unordered_access: false,
            awaiting_special_initialization,
        }
    }

    /// Feeds the next zone of the timeline.
    pub fn process_zone(&mut self, zone: &ResourceStateZone, events: &mut GpuResourceEventManager) {
        let Some(required) = zone.required_state else {
            self.add_candidate_begin_pass(zone.pass);
            return;
        };

        if self.transition_needed(required) {
            if zone.is_implicit_transition {
                // Implicit promotion out of COMMON: state changes, no
                // barrier is recorded.
                debug_assert!(self.before_state.is_common());
                self.before_state = required;
            } else {
                self.emit_transition(required, zone.pass, events);
            }
        } else if required.contains(ResourceStates::UNORDERED_ACCESS)
            && self.last_use_was_unordered_access
        {
            events.add_event(
                zone.pass.id,
                GpuResourceEvent {
                    resource: Arc::clone(&self.resource),
                    kind: GpuResourceEventKind::UavBarrier,
                },
            );
        }

        self.last_use_was_unordered_access = required.contains(ResourceStates::UNORDERED_ACCESS);
        self.awaiting_special_initialization = false;

        // Candidates must lie strictly after the subresource's last use;
        // everything collected so far is now stale.
        self.candidate_begin_passes.clear();
    }

    /// Implicit decay at an `ExecuteCommandLists` boundary.
    pub fn on_state_decay(&mut self) {
        self.before_state = ResourceStates::COMMON;
        self.candidate_begin_passes.clear();
        self.last_use_was_unordered_access = false;
    }

    /// Ends the walk, writing the final state back to the resource.
    pub fn finalize(self) {
        // Upload/readback resources are never tracked, so the write-back
        // is always legal.
        self.resource
            .set_subresource_state(self.before_state, self.subresource);
    }

    /// The state the subresource will be in after all processed zones.
    #[must_use]
    pub fn current_state(&self) -> ResourceStates {
        self.before_state
    }

    fn transition_needed(&self, required: ResourceStates) -> bool {
        if self.before_state.is_common() || required.is_common() {
            self.before_state != required
        } else {
            !self.before_state.contains(required)
        }
    }

    fn emit_transition(
        &mut self,
        after: ResourceStates,
        end_pass: PassRef,
        events: &mut GpuResourceEventManager,
    ) {
        let before = self.before_state;

        let begin_pass = self
            .candidate_begin_passes
            .iter()
            .copied()
            .find(|candidate| can_queue_perform_transition(candidate.queue, before, after));

        if let Some(begin_pass) = begin_pass {
            events.add_event(
                begin_pass.id,
                GpuResourceEvent {
                    resource: Arc::clone(&self.resource),
                    kind: GpuResourceEventKind::Transition {
                        subresource: self.subresource,
                        before,
                        after,
                        flags: BarrierFlags::BeginOnly,
                    },
                },
            );
        }

        events.add_event(
            end_pass.id,
            GpuResourceEvent {
                resource: Arc::clone(&self.resource),
                kind: GpuResourceEventKind::Transition {
                    subresource: self.subresource,
                    before,
                    after,
                    flags: if begin_pass.is_some() {
                        BarrierFlags::EndOnly
                    } else {
                        BarrierFlags::None
                    },
                },
            },
        );

        self.before_state = after;
    }

    fn add_candidate_begin_pass(&mut self, pass: PassRef) {
        // Split begins are illegal before the first-use initialization of
        // an RT/DS texture.
        if self.awaiting_special_initialization {
            return;
        }

        // A direct-queue candidate can record any transition; later
        // candidates could never be preferred over it.
        if self
            .candidate_begin_passes
            .iter()
            .any(|existing| existing.queue == QueueType::Direct || existing.queue == pass.queue)
        {
            return;
        }

        self.candidate_begin_passes.push(pass);
    }
}
