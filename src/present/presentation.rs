//! Presentation
//!
//! Presentation runs on a dedicated direct queue owned by the
//! [`PresentationManager`]. When a frame requested presentation (via
//! `DirectContext::present`), the submission thread hands the frame over
//! here after its last module: the presentation queue waits on the
//! graphics queue (always) and the compute queue (if the frame used it),
//! then every registered present callback runs — concurrently when there
//! is more than one (multi-viewport applications present several swap
//! chains per frame).
//!
//! Callback failures never short-circuit: all callbacks run to
//! completion, shared state is restored, and the first error is then
//! reported.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{ForgeError, Result};
use crate::jobs::JobSystem;
use crate::rhi::device::CommandQueue;
use crate::rhi::types::{QueueFlags, QueueType};

type PresentCallback = Box<dyn FnMut() -> Result<()> + Send>;

/// Process-wide presentation state.
pub struct PresentationManager {
    presentation_queue: CommandQueue,
    callbacks: Mutex<Vec<Arc<Mutex<PresentCallback>>>>,
    jobs: JobSystem,
}

impl PresentationManager {
    #[must_use]
    pub fn new(jobs: JobSystem) -> Self {
        Self {
            presentation_queue: CommandQueue::new(QueueType::Direct),
            callbacks: Mutex::new(Vec::new()),
            jobs,
        }
    }

    /// The dedicated presentation queue.
    #[must_use]
    pub fn presentation_queue(&self) -> &CommandQueue {
        &self.presentation_queue
    }

    /// Registers a callback invoked once per presented frame.
    pub fn register_present_callback(
        &self,
        callback: impl FnMut() -> Result<()> + Send + 'static,
    ) {
        self.callbacks
            .lock()
            .push(Arc::new(Mutex::new(Box::new(callback))));
    }

    /// Presents the frame if any of its passes requested it. Returns
    /// `Ok(true)` when presentation happened, `Ok(false)` when nothing
    /// was requested.
    pub fn handle_frame_presentation(
        &self,
        frame_number: u64,
        present_requested: bool,
        queues_to_synchronize_with: QueueFlags,
        graphics_queue: &CommandQueue,
        compute_queue: &CommandQueue,
    ) -> Result<bool> {
        if !present_requested {
            return Ok(false);
        }

        // Presentation always trails the graphics queue; compute only
        // when the frame actually recorded on it.
        self.presentation_queue.wait_for_queue(graphics_queue);
        if queues_to_synchronize_with.contains(QueueFlags::COMPUTE) {
            self.presentation_queue.wait_for_queue(compute_queue);
        }

        let callbacks: Vec<Arc<Mutex<PresentCallback>>> = self.callbacks.lock().clone();
        let errors: Vec<ForgeError> = if callbacks.len() > 1 {
            self.run_callbacks_concurrently(&callbacks)
        } else {
            callbacks
                .iter()
                .filter_map(|callback| (*callback.lock())().err())
                .collect()
        };

        if let Some(first) = errors.first() {
            log::error!(
                "Presentation of frame {frame_number} failed in {} callback(s): {first}",
                errors.len()
            );
            return Err(ForgeError::PresentationFailed {
                failed_count: errors.len(),
                first_error: first.to_string(),
            });
        }

        Ok(true)
    }

    fn run_callbacks_concurrently(
        &self,
        callbacks: &[Arc<Mutex<PresentCallback>>],
    ) -> Vec<ForgeError> {
        let errors = Arc::new(Mutex::new(Vec::new()));

        let mut group = self.jobs.create_group();
        group.reserve(callbacks.len());
        for callback in callbacks {
            let callback = Arc::clone(callback);
            let errors = Arc::clone(&errors);
            group.add_job(move || {
                if let Err(error) = (*callback.lock())() {
                    errors.lock().push(error);
                }
            });
        }
        group.execute_jobs();

        let mut errors = errors.lock();
        std::mem::take(&mut *errors)
    }
}
