//! Resource State Zone Map
//!
//! The per-subresource timeline of state zones across the frame,
//! partitioned into **segments** by state-decay barriers. Within a
//! segment, state carries forward from zone to zone; a decay resets the
//! subresource to `COMMON`.

use crate::rhi::states::is_implicit_transition_possible;
use crate::rhi::states::ResourceStates;
use crate::rhi::types::ResourceDesc;

use super::optimizer::optimize_zones;
use super::zone::ResourceStateZone;

/// Segmented zone timeline of one subresource.
pub struct ResourceStateZoneMap {
    segments: Vec<Vec<ResourceStateZone>>,
    start_state: ResourceStates,
}

impl ResourceStateZoneMap {
    /// Creates a map whose first segment begins in `start_state`.
    #[must_use]
    pub fn new(start_state: ResourceStates) -> Self {
        Self {
            segments: vec![Vec::new()],
            start_state,
        }
    }

    /// The subresource state at the start of the frame.
    #[inline]
    #[must_use]
    pub fn start_state(&self) -> ResourceStates {
        self.start_state
    }

    /// Appends a zone to the current segment.
    ///
    /// A zone that explicitly requires `COMMON` is itself a state decay:
    /// it ends the current segment, so later zones never transition out
    /// of a state the decay already erased.
    pub fn add_zone(&mut self, zone: ResourceStateZone) {
        let decays = zone
            .required_state
            .is_some_and(ResourceStates::is_common);

        self.segments
            .last_mut()
            .expect("zone map always has a segment")
            .push(zone);

        if decays {
            self.add_state_decay_barrier();
        }
    }

    /// Appends a run of zones.
    pub fn add_zones(&mut self, zones: impl IntoIterator<Item = ResourceStateZone>) {
        for zone in zones {
            self.add_zone(zone);
        }
    }

    /// Starts a new segment (implicit decay at an `ExecuteCommandLists`
    /// boundary).
    pub fn add_state_decay_barrier(&mut self) {
        self.segments.push(Vec::new());
    }

    /// The segments, in frame order.
    #[must_use]
    pub fn segments(&self) -> &[Vec<ResourceStateZone>] {
        &self.segments
    }

    /// Flags implicit promotions and runs the read-combine optimizer.
    pub fn optimize(&mut self, desc: &ResourceDesc) {
        // Each segment starts in COMMON (post-decay), except the first,
        // which starts in the carried-over state: its head zone is only
        // promotable when that state is COMMON.
        let first_eligible_segment = usize::from(!self.start_state.is_common());
        for segment in self.segments.iter_mut().skip(first_eligible_segment) {
            if let Some(zone) = segment.iter_mut().find(|zone| !zone.is_null()) {
                let required = zone.required_state.expect("non-null zone");
                zone.is_implicit_transition = is_implicit_transition_possible(desc, required);
            }
        }

        let to_delete = optimize_zones(&mut self.segments, desc);
        if to_delete.is_empty() {
            return;
        }

        for (segment_index, segment) in self.segments.iter_mut().enumerate() {
            let mut zone_index = 0;
            segment.retain(|_| {
                let keep = !to_delete.contains(&(segment_index, zone_index));
                zone_index += 1;
                keep
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pass::RenderPassId;
    use crate::rhi::types::{Format, QueueType};
    use crate::state::zone::PassRef;

    fn pass(n: u64) -> PassRef {
        PassRef {
            id: RenderPassId::from_raw(n),
            queue: QueueType::Direct,
        }
    }

    #[test]
    fn test_explicit_common_zone_splits_segment() {
        let mut map = ResourceStateZoneMap::new(ResourceStates::COMMON);
        map.add_zone(ResourceStateZone::new(
            ResourceStates::COPY_DEST,
            pass(1),
            0,
        ));
        map.add_zone(ResourceStateZone::new(ResourceStates::COMMON, pass(2), 0));
        map.add_zone(ResourceStateZone::new(
            ResourceStates::COPY_SOURCE,
            pass(3),
            0,
        ));

        assert_eq!(map.segments().len(), 2);
        assert_eq!(map.segments()[0].len(), 2);
        assert_eq!(map.segments()[1].len(), 1);
    }

    #[test]
    fn test_read_combine_merges_and_deletes() {
        // P1 PIXEL, P2 null, P3 NON_PIXEL on a plain texture: one zone
        // remains, holding the combined mask.
        let desc = ResourceDesc::texture_2d(Format::Rgba8Unorm, 16, 16, 1);
        let mut map = ResourceStateZoneMap::new(ResourceStates::COMMON);
        map.add_zone(ResourceStateZone::new(
            ResourceStates::PIXEL_SHADER_RESOURCE,
            pass(1),
            0,
        ));
        map.add_zone(ResourceStateZone::null(pass(2), 0));
        map.add_zone(ResourceStateZone::new(
            ResourceStates::NON_PIXEL_SHADER_RESOURCE,
            pass(3),
            0,
        ));

        map.optimize(&desc);

        let zones: Vec<_> = map.segments()[0].iter().collect();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].pass, pass(1));
        assert_eq!(
            zones[0].required_state,
            Some(ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE)
        );
    }

    #[test]
    fn test_no_combine_across_decay() {
        let desc = ResourceDesc::texture_2d(Format::Rgba8Unorm, 16, 16, 1);
        let mut map = ResourceStateZoneMap::new(ResourceStates::COMMON);
        map.add_zone(ResourceStateZone::new(
            ResourceStates::PIXEL_SHADER_RESOURCE,
            pass(1),
            0,
        ));
        map.add_state_decay_barrier();
        map.add_zone(ResourceStateZone::new(
            ResourceStates::NON_PIXEL_SHADER_RESOURCE,
            pass(2),
            1,
        ));

        map.optimize(&desc);

        // Both zones survive with their original masks.
        assert_eq!(map.segments()[0].len(), 1);
        assert_eq!(
            map.segments()[0][0].required_state,
            Some(ResourceStates::PIXEL_SHADER_RESOURCE)
        );
        assert_eq!(map.segments()[1].len(), 1);
        assert_eq!(
            map.segments()[1][0].required_state,
            Some(ResourceStates::NON_PIXEL_SHADER_RESOURCE)
        );
    }

    #[test]
    fn test_write_zone_interrupts_combining() {
        let desc = ResourceDesc::texture_2d(Format::Rgba8Unorm, 16, 16, 1);
        let mut map = ResourceStateZoneMap::new(ResourceStates::COMMON);
        map.add_zone(ResourceStateZone::new(
            ResourceStates::PIXEL_SHADER_RESOURCE,
            pass(1),
            0,
        ));
        map.add_zone(ResourceStateZone::new(
            ResourceStates::UNORDERED_ACCESS,
            pass(2),
            0,
        ));
        map.add_zone(ResourceStateZone::new(
            ResourceStates::PIXEL_SHADER_RESOURCE,
            pass(3),
            0,
        ));

        map.optimize(&desc);
        assert_eq!(map.segments()[0].len(), 3);
    }
}
