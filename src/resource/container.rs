//! Resource Containers
//!
//! The backing storage variant of a [`super::GpuResource`]: committed
//! (owns an implicit heap), placed (a region of a shared heap), or
//! borrowed (e.g. a swap-chain back buffer, not destroyed on drop).

use std::sync::Arc;

use crate::memory::heap::HeapAllocation;
use crate::rhi::device::Device;
use crate::rhi::types::RawResourceId;

/// Backing storage of a created resource.
pub enum ResourceContainer {
    /// Committed resource; owns its memory and participates in residency
    /// as a standalone pageable object.
    Committed {
        raw: RawResourceId,
        /// Allocation size reported at creation.
        size: u64,
    },
    /// Placed resource inside a shared heap region. Aliased resources of
    /// one group share the same [`HeapAllocation`].
    Placed {
        raw: RawResourceId,
        allocation: Arc<HeapAllocation>,
    },
    /// Externally owned resource; never destroyed by the engine.
    Borrowed { raw: RawResourceId },
}

impl ResourceContainer {
    /// The backend resource handle.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> RawResourceId {
        match self {
            Self::Committed { raw, .. } | Self::Placed { raw, .. } | Self::Borrowed { raw } => *raw,
        }
    }

    /// The shared heap region for placed resources.
    #[must_use]
    pub fn heap_allocation(&self) -> Option<&Arc<HeapAllocation>> {
        match self {
            Self::Placed { allocation, .. } => Some(allocation),
            _ => None,
        }
    }

    /// Destroys the backend object where this container owns it.
    pub(crate) fn destroy(&self, device: &Device) {
        match self {
            Self::Committed { raw, .. } | Self::Placed { raw, .. } => {
                device.backend().destroy_resource(*raw);
            }
            Self::Borrowed { .. } => {}
        }
    }
}
