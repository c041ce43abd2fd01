//! Resource States
//!
//! D3D12-style per-subresource state bitmask plus the rule set the state
//! tracker is built on: which combinations are valid read states, which
//! queues may perform which transitions, and when implicit promotion and
//! decay apply.

use bitflags::bitflags;

use super::types::{QueueType, ResourceDesc, ResourceFlags};

bitflags! {
    /// Resource state bitmask, mirroring `D3D12_RESOURCE_STATES`.
    ///
    /// `COMMON` is the empty mask. Read states may be combined; write
    /// states are exclusive.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceStates: u32 {
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const STREAM_OUT = 0x100;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RESOLVE_DEST = 0x1000;
        const RESOLVE_SOURCE = 0x2000;
        const SHADING_RATE_SOURCE = 0x1000000;
    }
}

impl ResourceStates {
    /// The `COMMON` (and `PRESENT`) state: the empty mask.
    pub const COMMON: Self = Self::empty();

    /// `GENERIC_READ`: the required (and permanent) state of upload-heap
    /// resources.
    pub const GENERIC_READ: Self = Self::VERTEX_AND_CONSTANT_BUFFER
        .union(Self::INDEX_BUFFER)
        .union(Self::NON_PIXEL_SHADER_RESOURCE)
        .union(Self::PIXEL_SHADER_RESOURCE)
        .union(Self::INDIRECT_ARGUMENT)
        .union(Self::COPY_SOURCE);

    /// Every state bit which only ever reads from the resource.
    pub const ALL_READ_STATES: Self = Self::VERTEX_AND_CONSTANT_BUFFER
        .union(Self::INDEX_BUFFER)
        .union(Self::DEPTH_READ)
        .union(Self::NON_PIXEL_SHADER_RESOURCE)
        .union(Self::PIXEL_SHADER_RESOURCE)
        .union(Self::INDIRECT_ARGUMENT)
        .union(Self::COPY_SOURCE)
        .union(Self::RESOLVE_SOURCE)
        .union(Self::SHADING_RATE_SOURCE);

    /// States legal on a compute queue. A compute queue may only record a
    /// transition whose before- and after-states are both subsets of this.
    pub const COMPUTE_QUEUE_VALID_STATES: Self = Self::VERTEX_AND_CONSTANT_BUFFER
        .union(Self::UNORDERED_ACCESS)
        .union(Self::NON_PIXEL_SHADER_RESOURCE)
        .union(Self::INDIRECT_ARGUMENT)
        .union(Self::COPY_DEST)
        .union(Self::COPY_SOURCE);

    /// States legal on a copy queue.
    pub const COPY_QUEUE_VALID_STATES: Self = Self::COPY_DEST.union(Self::COPY_SOURCE);

    /// Returns `true` if the mask is a non-empty combination of read-only
    /// states. `COMMON` is *not* a valid read state.
    #[inline]
    #[must_use]
    pub fn is_valid_read_state(self) -> bool {
        !self.is_empty() && Self::ALL_READ_STATES.contains(self)
    }

    /// Returns `true` if this is the `COMMON` state.
    #[inline]
    #[must_use]
    pub fn is_common(self) -> bool {
        self.is_empty()
    }
}

impl std::fmt::Debug for ResourceStates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("COMMON");
        }
        bitflags::parser::to_writer(self, f)
    }
}

/// Returns `true` if `queue` may record a transition between the two
/// given states.
///
/// The direct queue can perform any transition. The compute and copy
/// queues can only record barriers whose before- and after-states are
/// both subsets of the states legal on that queue (`COMMON` is legal
/// everywhere).
#[must_use]
pub fn can_queue_perform_transition(
    queue: QueueType,
    before: ResourceStates,
    after: ResourceStates,
) -> bool {
    let valid = match queue {
        QueueType::Direct => return true,
        QueueType::Compute => ResourceStates::COMPUTE_QUEUE_VALID_STATES,
        QueueType::Copy => ResourceStates::COPY_QUEUE_VALID_STATES,
    };

    valid.contains(before) && valid.contains(after)
}

/// Returns `true` if `queue` may place a resource in the given state at
/// all (the single-state form of [`can_queue_perform_transition`]).
#[must_use]
pub fn can_queue_handle_state(queue: QueueType, states: ResourceStates) -> bool {
    can_queue_perform_transition(queue, ResourceStates::COMMON, states)
}

/// Returns `true` if the resource decays back to `COMMON` at every
/// `ExecuteCommandLists` boundary regardless of how it was used.
///
/// This holds for buffers and for textures created with
/// `ALLOW_SIMULTANEOUS_ACCESS`.
#[must_use]
pub fn resource_always_decays(desc: &ResourceDesc) -> bool {
    desc.is_buffer() || desc.flags.contains(ResourceFlags::ALLOW_SIMULTANEOUS_ACCESS)
}

/// Returns `true` if the resource can be implicitly promoted from `COMMON`
/// to every state in `states` on first use, without an explicit barrier.
///
/// Promotion is restricted to buffers and simultaneous-access textures,
/// and to read-only target states. Anything else needs an explicit
/// transition out of `COMMON`.
#[must_use]
pub fn is_implicit_transition_possible(desc: &ResourceDesc, states: ResourceStates) -> bool {
    resource_always_decays(desc) && states.is_valid_read_state()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::types::{Format, ResourceDesc};

    #[test]
    fn test_read_state_validity() {
        assert!(
            (ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::NON_PIXEL_SHADER_RESOURCE)
                .is_valid_read_state()
        );
        assert!(ResourceStates::GENERIC_READ.is_valid_read_state());
        assert!(!ResourceStates::COMMON.is_valid_read_state());
        assert!(
            !(ResourceStates::PIXEL_SHADER_RESOURCE | ResourceStates::UNORDERED_ACCESS)
                .is_valid_read_state()
        );
    }

    #[test]
    fn test_queue_transition_legality() {
        // The direct queue can do anything.
        assert!(can_queue_perform_transition(
            QueueType::Direct,
            ResourceStates::RENDER_TARGET,
            ResourceStates::PIXEL_SHADER_RESOURCE,
        ));

        // Compute cannot touch pixel-shader or render-target states.
        assert!(!can_queue_perform_transition(
            QueueType::Compute,
            ResourceStates::COMMON,
            ResourceStates::PIXEL_SHADER_RESOURCE,
        ));
        assert!(can_queue_perform_transition(
            QueueType::Compute,
            ResourceStates::COMMON,
            ResourceStates::NON_PIXEL_SHADER_RESOURCE | ResourceStates::UNORDERED_ACCESS,
        ));

        // Copy queues only see the copy states.
        assert!(can_queue_perform_transition(
            QueueType::Copy,
            ResourceStates::COMMON,
            ResourceStates::COPY_DEST,
        ));
        assert!(!can_queue_perform_transition(
            QueueType::Copy,
            ResourceStates::COMMON,
            ResourceStates::NON_PIXEL_SHADER_RESOURCE,
        ));
    }

    #[test]
    fn test_implicit_promotion_rules() {
        let buffer = ResourceDesc::buffer(1024);
        let texture = ResourceDesc::texture_2d(Format::Rgba8Unorm, 64, 64, 1);

        assert!(is_implicit_transition_possible(
            &buffer,
            ResourceStates::VERTEX_AND_CONSTANT_BUFFER,
        ));
        // Write states never promote.
        assert!(!is_implicit_transition_possible(
            &buffer,
            ResourceStates::COPY_DEST,
        ));
        // Plain textures never promote.
        assert!(!is_implicit_transition_possible(
            &texture,
            ResourceStates::PIXEL_SHADER_RESOURCE,
        ));

        let simultaneous = ResourceDesc {
            flags: ResourceFlags::ALLOW_SIMULTANEOUS_ACCESS,
            ..ResourceDesc::texture_2d(Format::Rgba8Unorm, 64, 64, 1)
        };
        assert!(is_implicit_transition_possible(
            &simultaneous,
            ResourceStates::PIXEL_SHADER_RESOURCE,
        ));
        assert!(resource_always_decays(&simultaneous));
        assert!(!resource_always_decays(&texture));
    }
}
