//! Resource State Zone Optimizer
//!
//! A two-state machine that folds runs of read-only zones into a single
//! combined-read zone, deleting the folded zones and the null zones
//! between them. One barrier to the combined read mask then replaces a
//! chain of read-to-read transitions.
//!
//! States:
//!
//! - **Ignore** — skips null zones and non-read zones.
//! - **ReadCombine** — holds the current accumulator zone. Null zones
//!   become provisional deletions; a following read-only zone whose
//!   combined mask is still a valid read state (and legal on the
//!   accumulator's queue) is merged into the accumulator, committing the
//!   provisional deletions.
//!
//! A state decay ends any combination in progress: the first read zone
//! after a decay starts a fresh accumulator, keeping read masks minimal
//! (a zone reachable by implicit promotion costs nothing on its own).

use rustc_hash::FxHashSet;

use crate::rhi::states::{
    can_queue_handle_state, is_implicit_transition_possible, ResourceStates,
};
use crate::rhi::types::ResourceDesc;

use super::zone::ResourceStateZone;

/// Position of a zone: (segment index, zone index).
type ZonePos = (usize, usize);

enum OptimizerState {
    Ignore,
    ReadCombine {
        accumulator: ZonePos,
        pending_nulls: Vec<ZonePos>,
    },
}

/// Runs the optimizer over a subresource's segmented zone timeline,
/// returning the positions of zones to delete.
pub(crate) fn optimize_zones(
    segments: &mut [Vec<ResourceStateZone>],
    desc: &ResourceDesc,
) -> FxHashSet<ZonePos> {
    let mut state = OptimizerState::Ignore;
    let mut to_delete: FxHashSet<ZonePos> = FxHashSet::default();

    for segment_index in 0..segments.len() {
        for zone_index in 0..segments[segment_index].len() {
            let pos = (segment_index, zone_index);
            state = process_zone(state, pos, segments, desc, &mut to_delete);
        }

        // Segment boundary = state decay: never combine across it.
        state = OptimizerState::Ignore;
    }

    to_delete
}

fn process_zone(
    state: OptimizerState,
    pos: ZonePos,
    segments: &mut [Vec<ResourceStateZone>],
    desc: &ResourceDesc,
    to_delete: &mut FxHashSet<ZonePos>,
) -> OptimizerState {
    let zone_state = segments[pos.0][pos.1].required_state;

    match state {
        OptimizerState::Ignore => match zone_state {
            Some(required) if is_combinable_read(required) => OptimizerState::ReadCombine {
                accumulator: pos,
                pending_nulls: Vec::new(),
            },
            _ => OptimizerState::Ignore,
        },

        OptimizerState::ReadCombine {
            accumulator,
            mut pending_nulls,
        } => {
            let Some(required) = zone_state else {
                pending_nulls.push(pos);
                return OptimizerState::ReadCombine {
                    accumulator,
                    pending_nulls,
                };
            };

            let accumulated = segments[accumulator.0][accumulator.1]
                .required_state
                .expect("accumulator zone is never null");
            let proposed = accumulated | required;

            let is_read = is_combinable_read(required) && proposed.is_valid_read_state();
            let queue_can_handle =
                can_queue_handle_state(segments[accumulator.0][accumulator.1].pass.queue, proposed);

            if is_read && queue_can_handle {
                let zone_is_implicit = segments[pos.0][pos.1].is_implicit_transition;
                let accumulator_is_implicit =
                    segments[accumulator.0][accumulator.1].is_implicit_transition;

                // An implicitly promoted zone costs nothing on its own;
                // folding it into the accumulator would only widen the
                // read mask. Likewise, widening an implicitly promoted
                // accumulator past what promotion can reach would turn a
                // free transition into a real barrier.
                if zone_is_implicit
                    || (accumulator_is_implicit
                        && !is_implicit_transition_possible(desc, proposed))
                {
                    return OptimizerState::ReadCombine {
                        accumulator: pos,
                        pending_nulls: Vec::new(),
                    };
                }

                // Merge: the accumulator absorbs this zone's read state
                // and everything between them goes away.
                to_delete.extend(pending_nulls.drain(..));
                to_delete.insert(pos);
                segments[accumulator.0][accumulator.1].required_state = Some(proposed);

                OptimizerState::ReadCombine {
                    accumulator,
                    pending_nulls,
                }
            } else if is_combinable_read(required) {
                // Incompatible with the current accumulator; start over
                // from this zone.
                OptimizerState::ReadCombine {
                    accumulator: pos,
                    pending_nulls: Vec::new(),
                }
            } else {
                OptimizerState::Ignore
            }
        }
    }
}

/// A zone is a candidate for read combining when it is a non-`COMMON`
/// valid read state.
fn is_combinable_read(state: ResourceStates) -> bool {
    !state.is_common() && state.is_valid_read_state()
}
