//! Transient Resource Aliasing
//!
//! Transient resources live for a bounded span of the frame, measured in
//! bundle IDs. Two transients whose `[first, last]` bundle intervals do
//! not intersect can occupy the same heap memory. The tracker records
//! every transient's lifetime while the builders run, then packs the
//! resources into aliasable groups.
//!
//! The packing is a heuristic — no polynomial exact algorithm is known —
//! but sorting by size descending and greedily absorbing every
//! non-overlapping resource the heap tier permits produces good results
//! in practice.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::memory::heap::{GpuResourceHeapManager, HeapClass};
use crate::resource::{GpuResource, LifetimeType, ResourceId};

/// Lifetime record of one transient resource.
#[derive(Clone)]
pub struct TransientResourceLifetime {
    pub resource: Arc<GpuResource>,
    /// Allocation size the resource will occupy in its heap.
    pub size_in_bytes: u64,
    pub first_bundle: u32,
    pub last_bundle: u32,
}

impl TransientResourceLifetime {
    /// `true` if the two lifetimes intersect.
    #[must_use]
    pub fn overlaps(&self, other: &TransientResourceLifetime) -> bool {
        debug_assert_ne!(
            self.resource.id(),
            other.resource.id(),
            "a transient resource cannot overlap itself"
        );

        (self.first_bundle <= other.first_bundle && other.first_bundle <= self.last_bundle)
            || (other.first_bundle <= self.first_bundle && self.first_bundle <= other.last_bundle)
    }
}

/// A set of transients which will share one heap region.
pub struct AliasableResourceGroup {
    pub resources: Vec<Arc<GpuResource>>,
}

impl AliasableResourceGroup {
    /// `true` when the group actually aliases memory (more than one
    /// member).
    #[must_use]
    pub fn is_aliased(&self) -> bool {
        self.resources.len() > 1
    }
}

/// Per-frame lifetime tracker and group packer.
pub struct TransientResourceAliasTracker {
    heap_manager: Arc<GpuResourceHeapManager>,
    lifetimes: FxHashMap<ResourceId, TransientResourceLifetime>,
    groups: Vec<AliasableResourceGroup>,
    /// Resources that belong to a group with more than one member; their
    /// first use needs an aliasing barrier.
    aliased_resources: FxHashMap<ResourceId, ()>,
}

impl TransientResourceAliasTracker {
    #[must_use]
    pub fn new(heap_manager: Arc<GpuResourceHeapManager>) -> Self {
        Self {
            heap_manager,
            lifetimes: FxHashMap::default(),
            groups: Vec::new(),
            aliased_resources: FxHashMap::default(),
        }
    }

    /// Records that `bundle_id` references the transient `resource`.
    pub fn add_transient_dependency(&mut self, bundle_id: u32, resource: &Arc<GpuResource>) {
        debug_assert_eq!(
            resource.lifetime(),
            LifetimeType::Transient,
            "persistent resources are never aliased"
        );

        if let Some(existing) = self.lifetimes.get_mut(&resource.id()) {
            existing.first_bundle = existing.first_bundle.min(bundle_id);
            existing.last_bundle = existing.last_bundle.max(bundle_id);
            return;
        }

        let size_in_bytes = resource
            .device()
            .backend()
            .resource_allocation_info(resource.desc())
            .size_in_bytes;

        self.lifetimes.insert(
            resource.id(),
            TransientResourceLifetime {
                resource: Arc::clone(resource),
                size_in_bytes,
                first_bundle: bundle_id,
                last_bundle: bundle_id,
            },
        );
    }

    /// The recorded lifetime of a transient, if any bundle referenced it.
    #[must_use]
    pub fn lifetime(&self, resource: ResourceId) -> Option<&TransientResourceLifetime> {
        self.lifetimes.get(&resource)
    }

    /// `true` if the resource shares its heap region with other
    /// transients.
    #[must_use]
    pub fn is_aliased(&self, resource: ResourceId) -> bool {
        self.aliased_resources.contains_key(&resource)
    }

    /// Packs all recorded transients into aliasable groups.
    pub fn calculate_aliasable_groups(&mut self) {
        let mut unassigned: Vec<TransientResourceLifetime> =
            self.lifetimes.values().cloned().collect();

        // Largest first; equal sizes fall back to creation order so the
        // packing is deterministic.
        unassigned.sort_by(|lhs, rhs| {
            rhs.size_in_bytes
                .cmp(&lhs.size_in_bytes)
                .then_with(|| lhs.resource.id().cmp(&rhs.resource.id()))
        });

        while !unassigned.is_empty() {
            let mut group: Vec<TransientResourceLifetime> = Vec::new();
            let mut remaining: Vec<TransientResourceLifetime> =
                Vec::with_capacity(unassigned.len());

            for candidate in unassigned.drain(..) {
                if group.is_empty() {
                    group.push(candidate);
                    continue;
                }

                if self.can_join_group(&group, &candidate) {
                    group.push(candidate);
                } else {
                    remaining.push(candidate);
                }
            }

            if group.len() > 1 {
                for member in &group {
                    self.aliased_resources.insert(member.resource.id(), ());
                }
            }

            self.groups.push(AliasableResourceGroup {
                resources: group.into_iter().map(|info| info.resource).collect(),
            });
            unassigned = remaining;
        }
    }

    /// The computed groups; empty before
    /// [`calculate_aliasable_groups`](Self::calculate_aliasable_groups).
    #[must_use]
    pub fn aliasable_groups(&self) -> &[AliasableResourceGroup] {
        &self.groups
    }

    fn can_join_group(
        &self,
        group: &[TransientResourceLifetime],
        candidate: &TransientResourceLifetime,
    ) -> bool {
        let candidate_before = candidate.resource.can_alias_before_use();
        let candidate_after = candidate.resource.can_alias_after_use();

        for member in group {
            if member.overlaps(candidate) {
                return false;
            }

            // A resource that must not be aliased before its GPU use may
            // not follow any group-mate in time, and one that must not be
            // aliased afterwards may not precede one. Both directions are
            // checked for both resources.
            if (!candidate_before && member.first_bundle <= candidate.first_bundle)
                || (!candidate_after && candidate.last_bundle <= member.last_bundle)
            {
                return false;
            }
            if (!member.resource.can_alias_before_use()
                && candidate.first_bundle <= member.first_bundle)
                || (!member.resource.can_alias_after_use()
                    && member.last_bundle <= candidate.last_bundle)
            {
                return false;
            }

            if member.resource.heap_type() != candidate.resource.heap_type() {
                return false;
            }
        }

        // Lifetimes are compatible; the hardware has the final say. On
        // heap tier 1, a heap may only hold one resource class.
        let classes = group
            .iter()
            .map(|member| HeapClass::of(member.resource.desc()))
            .chain(std::iter::once(HeapClass::of(candidate.resource.desc())));

        self.heap_manager.can_classes_alias(classes)
    }
}
