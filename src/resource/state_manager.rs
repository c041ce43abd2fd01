//! Per-Subresource State Manager
//!
//! The authoritative record of the state each subresource of a resource
//! was left in by the most recently compiled frame. The state-tracking
//! pass reads it as the before-state for the next compilation and writes
//! the final states back when it finishes.

use smallvec::SmallVec;

use crate::rhi::states::ResourceStates;
use crate::rhi::types::ALL_SUBRESOURCES;

/// State vector with one entry per subresource.
pub struct SubResourceStateManager {
    states: SmallVec<[ResourceStates; 4]>,
}

impl SubResourceStateManager {
    /// Creates a manager with every subresource in `initial_state`.
    #[must_use]
    pub fn new(initial_state: ResourceStates, subresource_count: u32) -> Self {
        debug_assert!(subresource_count > 0);
        Self {
            states: smallvec::smallvec![initial_state; subresource_count as usize],
        }
    }

    /// Number of tracked subresources.
    #[inline]
    #[must_use]
    pub fn subresource_count(&self) -> u32 {
        self.states.len() as u32
    }

    /// State of one subresource.
    #[inline]
    #[must_use]
    pub fn subresource_state(&self, subresource: u32) -> ResourceStates {
        self.states[subresource as usize]
    }

    /// All subresource states, indexed by subresource.
    #[must_use]
    pub fn all_states(&self) -> &[ResourceStates] {
        &self.states
    }

    /// Sets the state of one subresource, or of every subresource when
    /// `subresource` is [`ALL_SUBRESOURCES`].
    pub fn set_subresource_state(&mut self, state: ResourceStates, subresource: u32) {
        if subresource == ALL_SUBRESOURCES {
            self.states.fill(state);
        } else {
            self.states[subresource as usize] = state;
        }
    }

    /// Returns every subresource to `COMMON` (implicit state decay).
    pub fn decay_all(&mut self) {
        self.states.fill(ResourceStates::COMMON);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_decay() {
        let mut manager = SubResourceStateManager::new(ResourceStates::COMMON, 3);
        manager.set_subresource_state(ResourceStates::COPY_DEST, 1);
        assert_eq!(manager.subresource_state(0), ResourceStates::COMMON);
        assert_eq!(manager.subresource_state(1), ResourceStates::COPY_DEST);

        manager.set_subresource_state(ResourceStates::PIXEL_SHADER_RESOURCE, ALL_SUBRESOURCES);
        assert!(
            manager
                .all_states()
                .iter()
                .all(|s| *s == ResourceStates::PIXEL_SHADER_RESOURCE)
        );

        manager.decay_all();
        assert!(manager.all_states().iter().all(|s| s.is_common()));
    }
}
