//! Per-Resource Usage Analysis
//!
//! Walks every execution module of the compiled frame for one resource
//! and produces its [`GpuResourceEventManager`]: zones are gathered per
//! subresource, implicit state decay is applied at module boundaries,
//! the read-combine optimizer folds the timelines, and the barrier
//! merger turns each remaining state change into events.
//!
//! Only default-heap resources are analyzed; upload- and readback-heap
//! resources never leave their initial state, and transitioning them
//! anyway would fault the device.
//!
//! # Decay at module boundaries
//!
//! A resource decays to `COMMON` after an `ExecuteCommandLists` call
//! when any of the following holds:
//!
//! 1. it is a buffer or a simultaneous-access texture;
//! 2. it was used on the copy queue in that module;
//! 3. it entered the module in `COMMON` and implicit promotion could
//!    reach every state it was used in, so no explicit transition can
//!    have occurred.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::graph::module::GpuExecutionModule;
use crate::resource::GpuResource;
use crate::rhi::ALL_SUBRESOURCES;
use crate::rhi::states::{is_implicit_transition_possible, ResourceStates};
use crate::rhi::types::{HeapType, QueueType};

use super::barrier_merger::SubResourceBarrierMerger;
use super::events::{GpuResourceEvent, GpuResourceEventKind, GpuResourceEventManager};
use super::zone::{PassRef, ResourceStateZone};
use super::zone_map::ResourceStateZoneMap;

/// Zones of one queue within one module, per subresource.
struct QueueUsageInfo {
    /// `zones[subresource]` has one entry per pass of the queue.
    zones: Vec<Vec<ResourceStateZone>>,
    contains_non_null: bool,
}

impl QueueUsageInfo {
    fn is_empty(&self) -> bool {
        self.zones.first().is_none_or(Vec::is_empty)
    }
}

/// Analyzer for one resource across the whole frame.
pub struct GpuResourceUsageAnalyzer {
    resource: Arc<GpuResource>,
}

impl GpuResourceUsageAnalyzer {
    #[must_use]
    pub fn new(resource: Arc<GpuResource>) -> Self {
        debug_assert_eq!(
            resource.heap_type(),
            HeapType::Default,
            "state tracking of upload/readback-heap resources would transition them out of \
             their permanent state and fault the device"
        );
        Self { resource }
    }

    /// Traverses the frame and returns the resource's event manager.
    #[must_use]
    pub fn traverse_frame(&self, modules: &[GpuExecutionModule]) -> GpuResourceEventManager {
        let subresource_count = self.resource.subresource_count() as usize;

        let mut maps: Vec<ResourceStateZoneMap> = (0..subresource_count)
            .map(|s| ResourceStateZoneMap::new(self.resource.subresource_state(s as u32)))
            .collect();
        let mut entry_states: Vec<ResourceStates> = (0..subresource_count)
            .map(|s| self.resource.subresource_state(s as u32))
            .collect();

        let mut first_use_pass: Option<PassRef> = None;

        for (module_index, module) in modules.iter().enumerate() {
            self.track_module(
                module,
                module_index,
                &mut maps,
                &mut entry_states,
                &mut first_use_pass,
            );
        }

        let mut events = GpuResourceEventManager::new();

        // RT/DS textures get their first-use initialization (discard or
        // clear) ahead of the first pass that references them.
        if self.resource.requires_special_initialization() {
            if let Some(first_use) = first_use_pass {
                events.add_event(
                    first_use.id,
                    GpuResourceEvent {
                        resource: Arc::clone(&self.resource),
                        kind: GpuResourceEventKind::SpecialInitialization(
                            self.resource.special_initialization_method(),
                        ),
                    },
                );
            }
        }

        for (subresource, mut map) in maps.into_iter().enumerate() {
            map.optimize(self.resource.desc());

            let mut merger = SubResourceBarrierMerger::new(
                Arc::clone(&self.resource),
                subresource as u32,
                map.start_state(),
            );

            let segments = map.segments();
            for (segment_index, segment) in segments.iter().enumerate() {
                for zone in segment {
                    merger.process_zone(zone, &mut events);
                }
                if segment_index + 1 < segments.len() {
                    merger.on_state_decay();
                }
            }

            merger.finalize();
        }

        if self.resource.requires_special_initialization() && first_use_pass.is_some() {
            self.resource.mark_special_initialization_completed();
        }

        events
    }

    fn track_module(
        &self,
        module: &GpuExecutionModule,
        module_index: usize,
        maps: &mut [ResourceStateZoneMap],
        entry_states: &mut [ResourceStates],
        first_use_pass: &mut Option<PassRef>,
    ) {
        let subresource_count = maps.len();

        let usage: [QueueUsageInfo; 3] = [
            self.queue_usage(module, QueueType::Direct, module_index, subresource_count),
            self.queue_usage(module, QueueType::Compute, module_index, subresource_count),
            self.queue_usage(module, QueueType::Copy, module_index, subresource_count),
        ];
        let [direct, compute, copy] = &usage;

        debug_assert!(
            !copy.contains_non_null
                || (!direct.contains_non_null && !compute.contains_non_null),
            "a resource may not be used on the copy queue and the direct/compute queue(s) \
             within one ExecuteCommandLists call"
        );

        if first_use_pass.is_none() {
            *first_use_pass = usage.iter().find_map(|info| {
                info.zones
                    .iter()
                    .flatten()
                    .find(|zone| !zone.is_null())
                    .map(|zone| zone.pass)
            });
        }

        // Resource-wide OR of every required state in this module; used
        // by the decay rules below.
        let mut combined_states = ResourceStates::COMMON;
        for info in &usage {
            for zone in info.zones.iter().flatten() {
                if let Some(required) = zone.required_state {
                    combined_states |= required;
                }
            }
        }

        let used_in_multiple_queues = direct.contains_non_null && compute.contains_non_null;

        // The zones feeding the maps. When the resource crosses queues
        // inside this module, the injected sync point (compiled in its
        // own module) already covers the transition; the most capable
        // used queue contributes its zones so later split barriers have
        // somewhere to begin.
        let source = if used_in_multiple_queues {
            usage.iter().find(|info| !info.is_empty())
        } else {
            usage
                .iter()
                .find(|info| info.contains_non_null)
                .or_else(|| usage.iter().find(|info| !info.is_empty()))
        };

        if let Some(source) = source {
            for (subresource, zones) in source.zones.iter().enumerate() {
                maps[subresource].add_zones(zones.iter().cloned());
            }
        }

        // Rule 1 and 2: unconditional decay.
        if self.resource.always_decays() || copy.contains_non_null {
            for map in maps.iter_mut() {
                map.add_state_decay_barrier();
            }
            entry_states.fill(ResourceStates::COMMON);
            return;
        }

        // Rule 3: only implicit promotions can have happened, so the
        // promoted read states decay back at the module boundary.
        let entered_in_common = entry_states.iter().all(|state| state.is_common());
        let decay_possible = entered_in_common
            && !combined_states.is_common()
            && is_implicit_transition_possible(self.resource.desc(), combined_states);

        if decay_possible {
            for map in maps.iter_mut() {
                map.add_state_decay_barrier();
            }
            entry_states.fill(ResourceStates::COMMON);
            return;
        }

        // No decay: carry each subresource's final state into the next
        // module.
        if used_in_multiple_queues {
            for (subresource, entry) in entry_states.iter_mut().enumerate() {
                let mut cross_queue_state = ResourceStates::COMMON;
                for info in &usage {
                    for zone in &info.zones[subresource] {
                        if let Some(required) = zone.required_state {
                            cross_queue_state |= required;
                        }
                    }
                }
                if !cross_queue_state.is_common() {
                    *entry = cross_queue_state;
                }
            }
        } else if let Some(source) = source {
            for (subresource, entry) in entry_states.iter_mut().enumerate() {
                let mut tracked = *entry;
                for zone in &source.zones[subresource] {
                    let Some(required) = zone.required_state else {
                        continue;
                    };
                    if !required.is_common()
                        && (tracked | required).is_valid_read_state()
                    {
                        tracked |= required;
                    } else {
                        tracked = required;
                    }
                }
                *entry = tracked;
            }
        }
    }

    fn queue_usage(
        &self,
        module: &GpuExecutionModule,
        queue: QueueType,
        module_index: usize,
        subresource_count: usize,
    ) -> QueueUsageInfo {
        let mut zones: Vec<Vec<ResourceStateZone>> = vec![Vec::new(); subresource_count];
        let mut contains_non_null = false;

        for pass in module.passes(queue) {
            let pass_ref = PassRef {
                id: pass.id(),
                queue,
            };

            // A pass may reference several subresources of one resource
            // with different states; each subresource gets its own view
            // of the pass.
            let mut required: SmallVec<[Option<ResourceStates>; 4]> =
                smallvec::smallvec![None; subresource_count];

            for dependency in pass.dependencies() {
                if dependency.resource.id() != self.resource.id() {
                    continue;
                }

                if dependency.subresource == ALL_SUBRESOURCES {
                    for slot in required.iter_mut() {
                        *slot = Some(slot.unwrap_or(ResourceStates::COMMON) | dependency.required_state);
                    }
                } else {
                    let slot = &mut required[dependency.subresource as usize];
                    *slot = Some(slot.unwrap_or(ResourceStates::COMMON) | dependency.required_state);
                }
            }

            for (subresource, slot) in required.iter().enumerate() {
                match slot {
                    Some(state) => {
                        contains_non_null = true;
                        zones[subresource].push(ResourceStateZone::new(
                            *state,
                            pass_ref,
                            module_index,
                        ));
                    }
                    None => {
                        zones[subresource].push(ResourceStateZone::null(pass_ref, module_index));
                    }
                }
            }
        }

        QueueUsageInfo {
            zones,
            contains_non_null,
        }
    }
}
