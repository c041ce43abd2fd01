//! GPU Residency Management
//!
//! Tracks every pageable object (heaps and committed resources) the
//! process has created and keeps the GPU working set inside the OS-provided
//! memory budget.
//!
//! Each frame, [`GpuResidencyManager::execute_residency_pass`]:
//!
//! 1. Makes every evicted object needed by the frame resident again
//!    (asynchronously; the returned fence gates command submission).
//! 2. While the process is over budget, frees memory through a two-state
//!    FSM: **Evict** pages objects out (preferred when the GPU virtual
//!    address space exceeds the budget), falling back to **Delete** when
//!    nothing more can be evicted.
//! 3. Retries the make-resident call after every successful free.
//!
//! If the page faults cannot be resolved the frame aborts with
//! [`ForgeError::OutOfGpuMemory`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::errors::{ForgeError, Result};
use crate::rhi::device::{Device, Fence};
use crate::rhi::types::PageableId;

/// Fraction of the OS budget the free-residency loop trims down to.
/// Freeing slightly past the budget line keeps the next few frames from
/// immediately re-entering the loop.
pub const DESIRED_BUDGET_USAGE_THRESHOLD: f32 = 0.8;

/// Usage metrics closer than this are considered equal when ordering
/// eviction candidates; the tie is broken by size instead.
pub const USAGE_METRIC_EPSILON: f32 = 0.01;

// ============================================================================
// Pageable objects
// ============================================================================

/// An object occupying GPU memory which can be made resident or evicted.
pub trait PageableGpuObject: Send + Sync {
    /// Backend identity used for residency calls.
    fn pageable_id(&self) -> PageableId;

    fn is_resident(&self) -> bool;

    fn set_resident(&self, resident: bool);

    /// Whether the current frame's command lists reference this object.
    fn needs_residency_this_frame(&self) -> bool;

    /// Marks or clears the per-frame residency request.
    fn set_needs_residency(&self, needed: bool);

    /// Folds the current frame into the object's usage metric; called
    /// once per residency pass, after the frame's dependencies have been
    /// marked. Objects with a derived metric ignore it.
    fn record_frame_usage(&self) {}

    /// Whether the object may be destroyed outright to reclaim memory.
    fn is_deletion_safe(&self) -> bool;

    /// Destroys the underlying GPU object. Only called when
    /// [`is_deletion_safe`](Self::is_deletion_safe) returned `true`.
    fn delete_gpu_object(&self);

    /// GPU memory footprint in bytes.
    fn gpu_memory_size(&self) -> u64;

    /// Recent-use metric in `[0, 1]`; lower values are evicted first.
    fn usage_metric(&self) -> f32;
}

// ============================================================================
// Free-residency FSM
// ============================================================================

enum FreeResidencyOutcome {
    /// Some memory was freed.
    Freed,
    /// This state cannot free anything (now or ever for this pass).
    Exhausted,
}

/// Evict state: pages out objects not needed this frame, least recently
/// useful first.
struct EvictState {
    /// Candidates sorted in reverse eviction order so the best candidate
    /// can be taken with `pop`.
    cached_candidates: Option<Vec<Arc<dyn PageableGpuObject>>>,
}

/// Delete state: destroys deletion-safe objects, smallest first, to get
/// as close to the budget line as possible.
struct DeleteState {
    cached_candidates: Option<Vec<Arc<dyn PageableGpuObject>>>,
}

/// The free-residency state machine. Evicting is preferred; deletion is
/// the fallback once nothing more can be paged out.
enum FreeResidencyState {
    Evict(EvictState),
    Delete(DeleteState),
}

impl FreeResidencyState {
    fn try_free(
        &mut self,
        device: &Device,
        objects: &[Arc<dyn PageableGpuObject>],
        target_usage: u64,
        current_usage: u64,
    ) -> FreeResidencyOutcome {
        match self {
            Self::Evict(state) => state.try_free(device, objects, target_usage, current_usage),
            Self::Delete(state) => state.try_free(device, objects, target_usage, current_usage),
        }
    }

    /// The state to fall back to when this one is exhausted.
    fn fallback(&self) -> Option<Self> {
        match self {
            Self::Evict(_) => Some(Self::Delete(DeleteState {
                cached_candidates: None,
            })),
            Self::Delete(_) => None,
        }
    }
}

impl EvictState {
    fn try_free(
        &mut self,
        device: &Device,
        objects: &[Arc<dyn PageableGpuObject>],
        target_usage: u64,
        mut current_usage: u64,
    ) -> FreeResidencyOutcome {
        // The object set is stable for the whole pass, so the sorted
        // candidate list is computed once and consumed across calls.
        let candidates = self.cached_candidates.get_or_insert_with(|| {
            let mut evictable: Vec<Arc<dyn PageableGpuObject>> = objects
                .iter()
                .filter(|object| object.is_resident() && !object.needs_residency_this_frame())
                .cloned()
                .collect();

            // Reverse eviction order: highest usage first, so `pop`
            // yields the least-used object; ties prefer larger objects
            // to keep the eviction count low.
            evictable.sort_by(|lhs, rhs| {
                let lhs_usage = lhs.usage_metric();
                let rhs_usage = rhs.usage_metric();

                if (lhs_usage - rhs_usage).abs() > USAGE_METRIC_EPSILON {
                    rhs_usage
                        .partial_cmp(&lhs_usage)
                        .unwrap_or(std::cmp::Ordering::Equal)
                } else {
                    lhs.gpu_memory_size().cmp(&rhs.gpu_memory_size())
                }
            });

            evictable
        });

        if candidates.is_empty() {
            return FreeResidencyOutcome::Exhausted;
        }

        let mut to_evict: Vec<Arc<dyn PageableGpuObject>> = Vec::new();
        while current_usage > target_usage {
            let Some(object) = candidates.pop() else { break };
            current_usage = current_usage.saturating_sub(object.gpu_memory_size());
            to_evict.push(object);
        }

        if to_evict.is_empty() {
            return FreeResidencyOutcome::Exhausted;
        }

        let ids: Vec<PageableId> = to_evict.iter().map(|o| o.pageable_id()).collect();
        if device.backend().evict(&ids).is_err() {
            return FreeResidencyOutcome::Exhausted;
        }

        for object in &to_evict {
            object.set_resident(false);
        }
        log::info!(
            "Residency: evicted {} object(s) ({} bytes)",
            to_evict.len(),
            to_evict.iter().map(|o| o.gpu_memory_size()).sum::<u64>()
        );

        FreeResidencyOutcome::Freed
    }
}

impl DeleteState {
    fn try_free(
        &mut self,
        _device: &Device,
        objects: &[Arc<dyn PageableGpuObject>],
        target_usage: u64,
        mut current_usage: u64,
    ) -> FreeResidencyOutcome {
        let candidates = self.cached_candidates.get_or_insert_with(|| {
            let mut deletable: Vec<Arc<dyn PageableGpuObject>> = objects
                .iter()
                .filter(|object| object.is_deletion_safe())
                .cloned()
                .collect();

            // Reverse deletion order: largest first, so `pop` yields the
            // smallest object. Trimming to the budget prefers many small
            // deletions over losing one large object.
            deletable.sort_by(|lhs, rhs| rhs.gpu_memory_size().cmp(&lhs.gpu_memory_size()));
            deletable
        });

        if candidates.is_empty() {
            return FreeResidencyOutcome::Exhausted;
        }

        let mut deleted_bytes = 0u64;
        let mut deleted_count = 0usize;
        while current_usage > target_usage {
            let Some(object) = candidates.pop() else { break };
            deleted_bytes += object.gpu_memory_size();
            deleted_count += 1;
            current_usage = current_usage.saturating_sub(object.gpu_memory_size());
            object.delete_gpu_object();
            object.set_resident(false);
        }

        if deleted_count == 0 {
            return FreeResidencyOutcome::Exhausted;
        }

        log::warn!("Residency: deleted {deleted_count} object(s) ({deleted_bytes} bytes) to meet the memory budget");
        FreeResidencyOutcome::Freed
    }
}

// ============================================================================
// GpuResidencyManager
// ============================================================================

/// Result of a residency pass.
pub struct ResidencyPassResults {
    /// Fence signalled once all page faults of the frame are resolved;
    /// `None` when nothing had to be made resident.
    pub make_resident_fence: Option<Fence>,
}

/// Process-wide registry of pageable GPU objects.
///
/// The registry holds weak references: dropping the last strong handle to
/// an object implicitly unregisters it on the next pass.
pub struct GpuResidencyManager {
    device: Device,
    objects: Mutex<Vec<Weak<dyn PageableGpuObject>>>,
}

impl GpuResidencyManager {
    #[must_use]
    pub fn new(device: Device) -> Self {
        Self {
            device,
            objects: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, object: Weak<dyn PageableGpuObject>) {
        self.objects.lock().push(object);
    }

    pub fn unregister(&self, id: PageableId) {
        self.objects.lock().retain(|object| {
            object
                .upgrade()
                .is_some_and(|object| object.pageable_id() != id)
        });
    }

    /// Number of live registered objects.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.objects
            .lock()
            .iter()
            .filter(|object| object.strong_count() > 0)
            .count()
    }

    /// Snapshot of the live registered objects, pruning dead entries.
    fn live_objects(&self) -> Vec<Arc<dyn PageableGpuObject>> {
        let mut registry = self.objects.lock();
        registry.retain(|object| object.strong_count() > 0);
        registry.iter().filter_map(Weak::upgrade).collect()
    }

    /// Clears every object's per-frame residency request. Called at the
    /// start of a frame, before the builders re-mark their dependencies.
    pub fn clear_residency_requests(&self) {
        for object in self.live_objects() {
            object.set_needs_residency(false);
        }
    }

    /// Runs the per-frame residency pass.
    pub fn execute_residency_pass(&self) -> Result<ResidencyPassResults> {
        let objects: Vec<Arc<dyn PageableGpuObject>> = self.live_objects();

        // The builders have marked this frame's dependencies by now, so
        // every object can fold the frame into its usage metric.
        for object in &objects {
            object.record_frame_usage();
        }

        // Objects the frame needs which are currently paged out.
        let needing_residency: Vec<Arc<dyn PageableGpuObject>> = objects
            .iter()
            .filter(|object| !object.is_resident() && object.needs_residency_this_frame())
            .cloned()
            .collect();

        let mut make_resident = self.try_make_resident(&needing_residency);

        let budget = self.device.backend().memory_budget();
        let capabilities = self.device.capabilities();
        let eviction_is_helpful = capabilities.max_gpu_virtual_address_bytes > budget.budget;

        let mut free_state = if eviction_is_helpful {
            FreeResidencyState::Evict(EvictState {
                cached_candidates: None,
            })
        } else {
            // With a VA range no larger than the budget, evicted objects
            // still consume address space; deletion is the only way out.
            FreeResidencyState::Delete(DeleteState {
                cached_candidates: None,
            })
        };

        let mut budget = budget;
        while budget.current_usage > budget.budget {
            let target_usage =
                (budget.budget as f64 * f64::from(DESIRED_BUDGET_USAGE_THRESHOLD)) as u64;

            match free_state.try_free(&self.device, &objects, target_usage, budget.current_usage) {
                FreeResidencyOutcome::Freed => {
                    // Memory was released; page faults from the first
                    // attempt may now be resolvable.
                    if make_resident.is_err() {
                        make_resident = self.try_make_resident(&needing_residency);
                    }
                }
                FreeResidencyOutcome::Exhausted => match free_state.fallback() {
                    Some(fallback) => free_state = fallback,
                    None => break,
                },
            }

            budget = self.device.backend().memory_budget();
        }

        match make_resident {
            Ok(make_resident_fence) => Ok(ResidencyPassResults {
                make_resident_fence,
            }),
            Err(_) => Err(ForgeError::OutOfGpuMemory),
        }
    }

    fn try_make_resident(
        &self,
        objects: &[Arc<dyn PageableGpuObject>],
    ) -> Result<Option<Fence>> {
        // The common case: nothing was paged out.
        if objects.is_empty() {
            return Ok(None);
        }

        let still_evicted: Vec<&Arc<dyn PageableGpuObject>> = objects
            .iter()
            .filter(|object| !object.is_resident())
            .collect();
        if still_evicted.is_empty() {
            return Ok(None);
        }

        let ids: Vec<PageableId> = still_evicted.iter().map(|o| o.pageable_id()).collect();
        let fence = self.device.create_fence(0);

        self.device
            .backend()
            .enqueue_make_resident(&ids, &fence, 1)?;

        for object in still_evicted {
            object.set_resident(true);
        }

        Ok(Some(fence))
    }
}
