//! Frame Fence Collection
//!
//! One collection per frame-graph slot. It answers two questions:
//!
//! - *Is the GPU done with the frame this slot last tracked?* The
//!   submission thread signals the completion fence after the frame's
//!   last module and presentation; slot reuse blocks on it.
//! - *May the GPU start executing this frame?* If the residency pass had
//!   to make objects resident, the make-resident fence gates every queue
//!   of the frame.

use parking_lot::Mutex;

use crate::errors::{ForgeError, Result};
use crate::rhi::device::{CommandQueue, Fence};

/// Per-frame fence state.
pub struct FrameGraphFenceCollection {
    /// Signalled (with value 1) by the submission thread once the frame
    /// has fully executed, presented, and signalled its queue fences.
    completion_fence: Mutex<Fence>,
    /// Whether a submission is in flight for this collection.
    pending: Mutex<bool>,
    /// Fence gating command execution on pending residency work.
    make_resident_fence: Mutex<Option<Fence>>,
    /// Error raised by the submission thread (e.g. presentation
    /// failures), surfaced when the slot is reused.
    deferred_error: Mutex<Option<ForgeError>>,
}

impl Default for FrameGraphFenceCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameGraphFenceCollection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            completion_fence: Mutex::new(Fence::new(0)),
            pending: Mutex::new(false),
            make_resident_fence: Mutex::new(None),
            deferred_error: Mutex::new(None),
        }
    }

    /// Blocks until the tracked frame has fully executed, then surfaces
    /// any error its submission raised.
    pub fn wait_for_frame_completion(&self) -> Result<()> {
        let fence = {
            let pending = self.pending.lock();
            if !*pending {
                return Ok(());
            }
            self.completion_fence.lock().clone()
        };

        fence.wait(1);
        *self.pending.lock() = false;

        match self.deferred_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Prepares the collection for a new frame.
    pub fn reset(&self) {
        debug_assert!(!*self.pending.lock(), "reset of a collection with a frame in flight");
        *self.completion_fence.lock() = Fence::new(0);
        *self.make_resident_fence.lock() = None;
        *self.deferred_error.lock() = None;
    }

    /// Marks a submission in flight for this collection.
    pub(crate) fn begin_frame_submission(&self) {
        *self.pending.lock() = true;
    }

    /// The fence the submission thread signals on frame completion.
    #[must_use]
    pub(crate) fn completion_fence(&self) -> Fence {
        self.completion_fence.lock().clone()
    }

    pub(crate) fn record_error(&self, error: ForgeError) {
        let mut slot = self.deferred_error.lock();
        // Keep the first error; later ones are consequences.
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Attaches the residency pass's make-resident fence.
    pub fn set_make_resident_fence(&self, fence: Fence) {
        *self.make_resident_fence.lock() = Some(fence);
    }

    /// Makes every given queue wait for pending residency work before
    /// executing this frame's commands.
    pub fn ensure_gpu_residency_for_queues(&self, queues: &[&CommandQueue]) {
        if let Some(fence) = self.make_resident_fence.lock().as_ref() {
            for queue in queues {
                queue.wait(fence, 1);
            }
        }
    }
}
