//! Bindless SRVs
//!
//! A resource may expose any number of bindless shader resource views.
//! Each view owns a [`BindlessSrvSentinel`] holding a stable index into
//! the process-wide bindless descriptor partition; if the underlying GPU
//! resource is re-created (placed re-allocation, eviction and remake),
//! the per-resource manager re-writes every live descriptor at its
//! existing index, so indices already captured by shaders stay valid.

use std::sync::{Arc, Weak};

use crate::descriptors::heap::{BindlessSrvSentinel, GpuResourceDescriptorHeap};
use crate::errors::Result;
use crate::rhi::types::{DescriptorContents, RawResourceId};

/// Shader resource view parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SrvDescription {
    pub most_detailed_mip: u32,
    pub mip_levels: u32,
}

impl Default for SrvDescription {
    fn default() -> Self {
        Self {
            most_detailed_mip: 0,
            mip_levels: u32::MAX,
        }
    }
}

/// Owner handle of one bindless SRV.
///
/// Dropping the allocation releases the bindless index back to the
/// process-wide free queue.
pub struct BindlessSrvAllocation {
    sentinel: Arc<BindlessSrvSentinel>,
}

impl BindlessSrvAllocation {
    /// The stable index shaders use to address the view.
    #[inline]
    #[must_use]
    pub fn bindless_index(&self) -> u32 {
        self.sentinel.bindless_index()
    }
}

struct BindlessEntry {
    sentinel: Weak<BindlessSrvSentinel>,
    srv: SrvDescription,
}

/// Per-resource bookkeeping of live bindless SRVs.
///
/// The manager holds weak sentinel references; the owning
/// [`BindlessSrvAllocation`] handles keep them alive, so a dropped
/// allocation disappears from the manager on the next sweep.
#[derive(Default)]
pub struct BindlessSrvManager {
    entries: Vec<BindlessEntry>,
}

impl BindlessSrvManager {
    /// Allocates a bindless index and, when the resource already exists,
    /// writes its descriptor.
    pub fn create_bindless_srv(
        &mut self,
        descriptor_heap: &GpuResourceDescriptorHeap,
        srv: SrvDescription,
        raw: Option<RawResourceId>,
    ) -> Result<BindlessSrvAllocation> {
        let sentinel = Arc::new(descriptor_heap.allocate_bindless_srv()?);

        if let Some(raw) = raw {
            sentinel.write_descriptor(srv_contents(raw, srv));
        }

        self.entries.push(BindlessEntry {
            sentinel: Arc::downgrade(&sentinel),
            srv,
        });

        Ok(BindlessSrvAllocation { sentinel })
    }

    /// Re-writes every live descriptor against a new backend resource.
    pub fn update_bindless_srvs(&mut self, raw: RawResourceId) {
        self.entries.retain(|entry| {
            let Some(sentinel) = entry.sentinel.upgrade() else {
                return false;
            };
            sentinel.write_descriptor(srv_contents(raw, entry.srv));
            true
        });
    }

    /// `true` while any allocation is alive.
    #[must_use]
    pub fn has_bindless_srvs(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.sentinel.strong_count() > 0)
    }
}

fn srv_contents(raw: RawResourceId, srv: SrvDescription) -> DescriptorContents {
    DescriptorContents::ShaderResourceView {
        resource: raw,
        most_detailed_mip: srv.most_detailed_mip,
        mip_levels: srv.mip_levels,
    }
}
