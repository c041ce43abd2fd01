//! Command Submission
//!
//! Recording is parallel; submission is not. Per-module record jobs
//! deliver their closed command lists to **submit points**, and a single
//! dedicated submission thread drains them strictly in module order:
//!
//! 1. make every used queue wait on the other queues of the previous
//!    submission, so cross-queue execution order matches declaration
//!    order;
//! 2. `ExecuteCommandLists` on each used queue;
//! 3. return the command contexts to the vault for reuse.
//!
//! After a frame's last module the thread hands presentation over to the
//! [`PresentationManager`] and signals the frame's fences. Because one
//! thread issues every signal, fence values can never be observed out of
//! order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::rhi::device::{CommandList, CommandQueue, Device, Fence};
use crate::rhi::types::{QueueFlags, QueueType};
use crate::present::PresentationManager;

use super::fence_collection::FrameGraphFenceCollection;

// ============================================================================
// Command contexts
// ============================================================================

/// A command allocator + command list pair bound to one queue class.
pub struct GpuCommandContext {
    pub(crate) queue_type: QueueType,
    pub(crate) allocator: crate::rhi::types::CommandAllocatorId,
    pub(crate) list: CommandList,
}

/// Recycling pool of command contexts, keyed by queue class.
///
/// Contexts returned after submission are reused by later frames once
/// their allocator can safely be reset.
pub struct GpuCommandContextVault {
    device: Device,
    pools: Mutex<FxHashMap<QueueType, Vec<GpuCommandContext>>>,
}

impl GpuCommandContextVault {
    #[must_use]
    pub fn new(device: Device) -> Self {
        Self {
            device,
            pools: Mutex::new(FxHashMap::default()),
        }
    }

    /// Takes a context for `queue`, creating one if the pool is empty.
    #[must_use]
    pub fn acquire(&self, queue: QueueType) -> GpuCommandContext {
        if let Some(mut context) = self.pools.lock().entry(queue).or_default().pop() {
            self.device.backend().reset_command_allocator(context.allocator);
            context.list.reset(context.allocator);
            return context;
        }

        let allocator = self.device.backend().create_command_allocator(queue);
        GpuCommandContext {
            queue_type: queue,
            allocator,
            list: CommandList::open(queue, allocator),
        }
    }

    /// Returns a submitted context for reuse.
    pub fn return_context(&self, context: GpuCommandContext) {
        self.pools
            .lock()
            .entry(context.queue_type)
            .or_default()
            .push(context);
    }
}

/// The closed command lists of one execution module.
pub struct GpuCommandContextGroup {
    pub(crate) module_id: u32,
    pub(crate) used_queues: QueueFlags,
    pub(crate) contexts: Vec<GpuCommandContext>,
}

// ============================================================================
// Submit points
// ============================================================================

/// Hand-off slot between one module's record job and the submission
/// thread.
pub struct GpuCommandContextSubmitPoint {
    slot: Mutex<Option<GpuCommandContextGroup>>,
    ready: Condvar,
}

impl Default for GpuCommandContextSubmitPoint {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

impl GpuCommandContextSubmitPoint {
    /// Called by the record job once the module's lists are closed.
    pub fn set_group(&self, group: GpuCommandContextGroup) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "a module delivered its command lists twice");
        *slot = Some(group);
        self.ready.notify_one();
    }

    /// Blocks the submission thread until the module's group arrives.
    fn wait_take_group(&self) -> GpuCommandContextGroup {
        let mut slot = self.slot.lock();
        loop {
            if let Some(group) = slot.take() {
                return group;
            }
            self.ready.wait(&mut slot);
        }
    }
}

/// One frame's ordered submit points.
pub struct GpuCommandContextSink {
    points: Vec<Arc<GpuCommandContextSubmitPoint>>,
}

impl GpuCommandContextSink {
    fn new(module_count: usize) -> Self {
        Self {
            points: (0..module_count)
                .map(|_| Arc::new(GpuCommandContextSubmitPoint::default()))
                .collect(),
        }
    }

    /// The submit point of the module with the given ID.
    #[must_use]
    pub fn point(&self, module_id: u32) -> Arc<GpuCommandContextSubmitPoint> {
        Arc::clone(&self.points[module_id as usize])
    }
}

// ============================================================================
// GpuCommandManager
// ============================================================================

struct FrameSubmission {
    frame_number: u64,
    sink: Arc<GpuCommandContextSink>,
    fence_collection: Arc<FrameGraphFenceCollection>,
    /// Set by any of the frame's record callbacks calling `present`.
    present_requested: Arc<AtomicBool>,
}

/// Owner of the three command queues and the submission thread.
pub struct GpuCommandManager {
    queues: [CommandQueue; 3],
    frame_fences: [Fence; 3],
    vault: Arc<GpuCommandContextVault>,
    presentation: Arc<PresentationManager>,
    sender: flume::Sender<FrameSubmission>,
}

impl GpuCommandManager {
    #[must_use]
    pub fn new(device: Device, presentation: Arc<PresentationManager>) -> Arc<Self> {
        let queues = [
            CommandQueue::new(QueueType::Direct),
            CommandQueue::new(QueueType::Compute),
            CommandQueue::new(QueueType::Copy),
        ];
        let frame_fences = [Fence::new(0), Fence::new(0), Fence::new(0)];
        let vault = Arc::new(GpuCommandContextVault::new(device));

        let (sender, receiver) = flume::unbounded::<FrameSubmission>();

        {
            let queues = queues.clone();
            let frame_fences = frame_fences.clone();
            let vault = Arc::clone(&vault);
            let presentation = Arc::clone(&presentation);

            std::thread::Builder::new()
                .name("forge-submission".into())
                .spawn(move || {
                    submission_thread_loop(&receiver, &queues, &frame_fences, &vault, &presentation);
                })
                .expect("failed to spawn the submission thread");
        }

        Arc::new(Self {
            queues,
            frame_fences,
            vault,
            presentation,
            sender,
        })
    }

    /// The queue of one class.
    #[must_use]
    pub fn queue(&self, queue: QueueType) -> &CommandQueue {
        &self.queues[queue as usize]
    }

    /// The monotonically signalled frame fence of one queue.
    #[must_use]
    pub fn frame_fence(&self, queue: QueueType) -> &Fence {
        &self.frame_fences[queue as usize]
    }

    #[must_use]
    pub fn context_vault(&self) -> &Arc<GpuCommandContextVault> {
        &self.vault
    }

    #[must_use]
    pub fn presentation(&self) -> &Arc<PresentationManager> {
        &self.presentation
    }

    /// Announces a frame of `module_count` modules to the submission
    /// thread. Returns the sink record jobs deliver into and the frame's
    /// presentation-request flag.
    #[must_use]
    pub fn begin_frame_submission(
        &self,
        frame_number: u64,
        fence_collection: &Arc<FrameGraphFenceCollection>,
        module_count: usize,
    ) -> (Arc<GpuCommandContextSink>, Arc<AtomicBool>) {
        let sink = Arc::new(GpuCommandContextSink::new(module_count));
        let present_requested = Arc::new(AtomicBool::new(false));
        fence_collection.begin_frame_submission();

        // Send only fails once the submission thread is gone, which only
        // happens at engine teardown.
        let _ = self.sender.send(FrameSubmission {
            frame_number,
            sink: Arc::clone(&sink),
            fence_collection: Arc::clone(fence_collection),
            present_requested: Arc::clone(&present_requested),
        });

        (sink, present_requested)
    }
}

fn submission_thread_loop(
    receiver: &flume::Receiver<FrameSubmission>,
    queues: &[CommandQueue; 3],
    frame_fences: &[Fence; 3],
    vault: &GpuCommandContextVault,
    presentation: &PresentationManager,
) {
    let mut last_submission_queues = QueueFlags::empty();

    while let Ok(submission) = receiver.recv() {
        let collection = &submission.fence_collection;

        // No command list of this frame may execute before the residency
        // manager's page-ins complete.
        collection.ensure_gpu_residency_for_queues(&[&queues[0], &queues[1], &queues[2]]);

        for point in &submission.sink.points {
            let group = point.wait_take_group();
            submit_group(group, queues, &mut last_submission_queues, vault);
        }

        // Presentation, then the frame's fences. The fence values only
        // ever come from this thread, so they are strictly increasing.
        // Every record job of the frame finished before the last submit
        // point drained, so the flag is settled by now.
        let presented = match presentation.handle_frame_presentation(
            submission.frame_number,
            submission.present_requested.load(Ordering::Acquire),
            last_submission_queues,
            &queues[QueueType::Direct as usize],
            &queues[QueueType::Compute as usize],
        ) {
            Ok(presented) => presented,
            Err(error) => {
                collection.record_error(error);
                false
            }
        };

        let fence_value = submission.frame_number + 1;
        if presented {
            // The presentation queue trails the direct queue, so its
            // signal covers both.
            presentation
                .presentation_queue()
                .signal(&frame_fences[QueueType::Direct as usize], fence_value);
        } else {
            queues[QueueType::Direct as usize]
                .signal(&frame_fences[QueueType::Direct as usize], fence_value);
        }
        queues[QueueType::Compute as usize]
            .signal(&frame_fences[QueueType::Compute as usize], fence_value);
        queues[QueueType::Copy as usize]
            .signal(&frame_fences[QueueType::Copy as usize], fence_value);

        collection.completion_fence().signal(1);
    }
}

fn submit_group(
    group: GpuCommandContextGroup,
    queues: &[CommandQueue; 3],
    last_submission_queues: &mut QueueFlags,
    vault: &GpuCommandContextVault,
) {
    let used = group.used_queues;
    if used.is_empty() {
        return;
    }

    // Every used queue waits for the other queues of the previous
    // submission, which makes inter-queue execution order follow module
    // order.
    for queue_type in QueueType::ALL {
        if !used.contains(queue_type.into()) {
            continue;
        }
        for other in QueueType::ALL {
            if other != queue_type && last_submission_queues.contains(other.into()) {
                queues[queue_type as usize].wait_for_queue(&queues[other as usize]);
            }
        }
    }
    *last_submission_queues = used;

    let mut contexts = group.contexts;
    for queue_type in QueueType::ALL {
        let mut lists: Vec<&mut CommandList> = contexts
            .iter_mut()
            .filter(|context| context.queue_type == queue_type)
            .map(|context| &mut context.list)
            .collect();

        if !lists.is_empty() {
            queues[queue_type as usize].execute_command_lists(&mut lists);
        }
    }

    for context in contexts {
        vault.return_context(context);
    }
}
