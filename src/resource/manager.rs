//! Resource Allocation Managers
//!
//! Two allocation paths feed the frame graph:
//!
//! - [`PersistentGpuResourceManager`] creates application-owned resources
//!   either committed (own implicit heap, registered with the residency
//!   manager) or placed into pooled heaps.
//! - [`TransientGpuResourceManager`] owns the frame's transient resources
//!   and creates each aliasable group as placed resources sharing one
//!   heap region. Transients are destroyed when their frame's fences
//!   clear.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::errors::Result;
use crate::memory::heap::{GpuResourceHeapManager, HeapClass};
use crate::memory::residency::{GpuResidencyManager, PageableGpuObject};

use super::{CreationPreference, GpuResource, LifetimeType};

// ============================================================================
// Persistent resources
// ============================================================================

/// Allocator for persistent (application-owned) resources.
pub struct PersistentGpuResourceManager {
    heap_manager: Arc<GpuResourceHeapManager>,
    residency: Arc<GpuResidencyManager>,
}

impl PersistentGpuResourceManager {
    #[must_use]
    pub fn new(
        heap_manager: Arc<GpuResourceHeapManager>,
        residency: Arc<GpuResidencyManager>,
    ) -> Self {
        Self {
            heap_manager,
            residency,
        }
    }

    /// Creates the backend resource for a persistent wrapper, honouring
    /// its creation preference.
    pub fn allocate(&self, resource: &Arc<GpuResource>) -> Result<()> {
        debug_assert_eq!(resource.lifetime(), LifetimeType::Persistent);
        debug_assert!(!resource.is_created());

        match resource.creation_preference() {
            CreationPreference::Committed => {
                resource.create_committed()?;
                // Committed resources own their memory; the residency
                // manager pages them individually.
                let resource_dyn: Arc<dyn PageableGpuObject> =
                    Arc::clone(resource) as Arc<dyn PageableGpuObject>;
                let pageable: Weak<dyn PageableGpuObject> = Arc::downgrade(&resource_dyn);
                self.residency.register(pageable);
                Ok(())
            }
            CreationPreference::Placed => {
                let info = resource
                    .device()
                    .backend()
                    .resource_allocation_info(resource.desc());
                let allocation = self.heap_manager.allocate(
                    info.size_in_bytes,
                    resource.heap_type(),
                    HeapClass::of(resource.desc()),
                )?;
                resource.create_placed(Arc::new(allocation))
            }
        }
    }
}

// ============================================================================
// Transient resources
// ============================================================================

/// Owner of the current frame's transient resources.
pub struct TransientGpuResourceManager {
    heap_manager: Arc<GpuResourceHeapManager>,
    resources: Mutex<Vec<Arc<GpuResource>>>,
}

impl TransientGpuResourceManager {
    #[must_use]
    pub fn new(heap_manager: Arc<GpuResourceHeapManager>) -> Self {
        Self {
            heap_manager,
            resources: Mutex::new(Vec::new()),
        }
    }

    /// The heap manager transient allocations draw from.
    #[must_use]
    pub fn heap_manager(&self) -> &Arc<GpuResourceHeapManager> {
        &self.heap_manager
    }

    /// Takes ownership of a builder's transient resources for the frame.
    pub fn add_transient_resources(&self, resources: impl IntoIterator<Item = Arc<GpuResource>>) {
        self.resources.lock().extend(resources);
    }

    /// Number of owned transients.
    #[must_use]
    pub fn transient_count(&self) -> usize {
        self.resources.lock().len()
    }

    /// Creates the backend resources for one aliasable group: a single
    /// shared heap region sized for the largest member, every member
    /// placed at its base.
    pub fn allocate_aliased_group(&self, group: &[Arc<GpuResource>]) -> Result<()> {
        debug_assert!(!group.is_empty());

        let heap_type = group[0].heap_type();
        debug_assert!(
            group.iter().all(|r| r.heap_type() == heap_type),
            "aliasable group mixes heap types"
        );

        let max_size = group
            .iter()
            .map(|resource| {
                resource
                    .device()
                    .backend()
                    .resource_allocation_info(resource.desc())
                    .size_in_bytes
            })
            .max()
            .unwrap_or(0);

        let allocation = self.heap_manager.allocate_aliased(
            max_size,
            heap_type,
            group.iter().map(|r| HeapClass::of(r.desc())),
        )?;

        for resource in group {
            if !resource.is_created() {
                resource.create_placed(Arc::clone(&allocation))?;
            }
        }

        Ok(())
    }

    /// Destroys the previous frame's transients. Only called after the
    /// frame's fence collection has cleared, so the GPU is done with
    /// them.
    pub fn delete_transient_resources(&self) {
        let dropped = std::mem::take(&mut *self.resources.lock());
        if !dropped.is_empty() {
            log::trace!("Destroyed {} transient resource(s)", dropped.len());
        }
    }
}
