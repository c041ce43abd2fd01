//! Device Interface
//!
//! The boundary between the engine core and the graphics API. The core
//! only ever talks to [`DeviceBackend`]; a native D3D12 backend maps each
//! method onto the corresponding `ID3D12Device` call, while the software
//! backend in [`super::software`] implements the same contract in-process
//! for tests and validation.
//!
//! Fences, command queues, and command lists are CPU-side objects with a
//! fixed contract (ordered signalling, recorded command streams); they are
//! defined here rather than behind the backend trait.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::errors::{ForgeError, Result};

use super::states::ResourceStates;
use super::types::{
    ClearValue, CommandAllocatorId, CopyableFootprints, DescriptorContents, DescriptorHeapDesc,
    DescriptorHeapId, DescriptorHeapType, DeviceCapabilities, HeapId, HeapType, MemoryBudgetInfo,
    PageableId, QueueType, RawResourceId, ResourceAllocationInfo, ResourceBarrier, ResourceDesc,
    ResourceBindingTier, ShaderModel,
};

/// Minimum shader model required by the engine.
pub const MIN_SHADER_MODEL: ShaderModel = ShaderModel { major: 6, minor: 0 };

// ============================================================================
// Backend trait
// ============================================================================

/// The device operations the engine core requires from a graphics API.
pub trait DeviceBackend: Send + Sync {
    /// Static capability report.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Current device-local memory budget snapshot.
    fn memory_budget(&self) -> MemoryBudgetInfo;

    // ── Memory & resources ─────────────────────────────────────────────────

    fn create_heap(&self, size_in_bytes: u64, heap_type: HeapType) -> Result<HeapId>;

    fn destroy_heap(&self, heap: HeapId);

    fn create_placed_resource(
        &self,
        heap: HeapId,
        offset: u64,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
        clear: Option<ClearValue>,
    ) -> Result<RawResourceId>;

    fn create_committed_resource(
        &self,
        heap_type: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
        clear: Option<ClearValue>,
    ) -> Result<RawResourceId>;

    fn destroy_resource(&self, resource: RawResourceId);

    /// Size and alignment the resource would occupy in a heap.
    fn resource_allocation_info(&self, desc: &ResourceDesc) -> ResourceAllocationInfo;

    /// Buffer placement footprints for a span of texture subresources.
    fn copyable_footprints(
        &self,
        desc: &ResourceDesc,
        first_subresource: u32,
        subresource_count: u32,
        base_offset: u64,
    ) -> CopyableFootprints;

    /// CPU write into a mappable (upload-heap) buffer resource.
    fn write_buffer(&self, resource: RawResourceId, offset: u64, data: &[u8]) -> Result<()>;

    /// CPU read out of a mappable (readback-heap) buffer resource.
    fn read_buffer(&self, resource: RawResourceId, offset: u64, data: &mut [u8]) -> Result<()>;

    // ── Descriptors ────────────────────────────────────────────────────────

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<DescriptorHeapId>;

    fn write_descriptor(&self, heap: DescriptorHeapId, index: u32, contents: DescriptorContents);

    fn copy_descriptors(
        &self,
        dst_heap: DescriptorHeapId,
        dst_start: u32,
        src_heap: DescriptorHeapId,
        src_start: u32,
        count: u32,
    );

    fn descriptor_handle_increment_size(&self, heap_type: DescriptorHeapType) -> u32;

    // ── Residency ──────────────────────────────────────────────────────────

    /// Asynchronously makes the given pageable objects resident. On
    /// success the backend signals `fence` with `signal_value` once the
    /// objects are available; returns [`ForgeError::OutOfGpuMemory`] if the
    /// device truly cannot satisfy the request right now.
    fn enqueue_make_resident(
        &self,
        objects: &[PageableId],
        fence: &Fence,
        signal_value: u64,
    ) -> Result<()>;

    /// Removes the given pageable objects from the GPU working set.
    fn evict(&self, objects: &[PageableId]) -> Result<()>;

    // ── Command allocators ─────────────────────────────────────────────────

    fn create_command_allocator(&self, queue_type: QueueType) -> CommandAllocatorId;

    fn reset_command_allocator(&self, allocator: CommandAllocatorId);
}

// ============================================================================
// Device
// ============================================================================

/// Shared device handle.
///
/// Wraps the backend and caches the capability report. Cloning is cheap;
/// every subsystem that needs device access holds one of these.
#[derive(Clone)]
pub struct Device {
    backend: Arc<dyn DeviceBackend>,
    capabilities: DeviceCapabilities,
}

impl Device {
    /// Wraps a backend, verifying the engine's minimum feature
    /// requirements (Shader Model 6.0, Resource Binding Tier 2).
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Result<Self> {
        let capabilities = backend.capabilities();

        if capabilities.highest_shader_model < MIN_SHADER_MODEL {
            return Err(ForgeError::UnsupportedDevice(format!(
                "Shader Model {}.{} is below the required 6.0",
                capabilities.highest_shader_model.major, capabilities.highest_shader_model.minor
            )));
        }

        if capabilities.resource_binding_tier < ResourceBindingTier::Tier2 {
            return Err(ForgeError::UnsupportedDevice(
                "Resource Binding Tier 2 is required".into(),
            ));
        }

        Ok(Self {
            backend,
            capabilities,
        })
    }

    /// The cached capability report.
    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Direct access to the backend.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &dyn DeviceBackend {
        self.backend.as_ref()
    }

    /// Creates a fence starting at the given value.
    #[must_use]
    pub fn create_fence(&self, initial_value: u64) -> Fence {
        Fence::new(initial_value)
    }
}

// ============================================================================
// Fence
// ============================================================================

static NEXT_FENCE_ID: AtomicU64 = AtomicU64::new(1);

struct FenceInner {
    id: u64,
    value: Mutex<u64>,
    signalled: Condvar,
}

/// A monotonically increasing synchronization fence.
///
/// Cloning yields another handle to the same fence. Values are expected
/// to only ever increase; waiting for a value the fence has already
/// reached returns immediately.
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    #[must_use]
    pub fn new(initial_value: u64) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                id: NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed),
                value: Mutex::new(initial_value),
                signalled: Condvar::new(),
            }),
        }
    }

    /// Stable identity of the fence, used in queue logs.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The highest value this fence has been signalled with.
    #[must_use]
    pub fn completed_value(&self) -> u64 {
        *self.inner.value.lock()
    }

    /// Returns `true` once the fence has reached `value`.
    #[must_use]
    pub fn is_complete(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// CPU-side signal.
    pub fn signal(&self, value: u64) {
        let mut current = self.inner.value.lock();
        if value > *current {
            *current = value;
            self.inner.signalled.notify_all();
        }
    }

    /// Blocks the calling thread until the fence reaches `value`.
    pub fn wait(&self, value: u64) {
        let mut current = self.inner.value.lock();
        while *current < value {
            self.inner.signalled.wait(&mut current);
        }
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("id", &self.inner.id)
            .field("completed", &self.completed_value())
            .finish()
    }
}

// ============================================================================
// Command lists
// ============================================================================

/// One recorded GPU command. The software queue retains these verbatim so
/// tests can inspect exactly what would reach the GPU.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    Barriers(Vec<ResourceBarrier>),
    DiscardResource(RawResourceId),
    ClearRenderTarget {
        resource: RawResourceId,
        color: [f32; 4],
    },
    ClearDepthStencil {
        resource: RawResourceId,
        depth: f32,
        stencil: u8,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyResource {
        src: RawResourceId,
        dst: RawResourceId,
    },
    CopyBufferRegion {
        src: RawResourceId,
        src_offset: u64,
        dst: RawResourceId,
        dst_offset: u64,
        size: u64,
    },
    ExecuteIndirect {
        argument_buffer: RawResourceId,
        argument_offset: u64,
        max_command_count: u32,
    },
    /// PIX-style debug marker emitted at the start of a pass.
    BeginEvent {
        name: String,
        color: u32,
    },
    EndEvent,
}

/// A recording command list bound to one queue class.
pub struct CommandList {
    queue_type: QueueType,
    allocator: CommandAllocatorId,
    commands: Vec<RecordedCommand>,
    is_open: bool,
}

impl CommandList {
    /// Opens a fresh command list recording against `allocator`.
    #[must_use]
    pub fn open(queue_type: QueueType, allocator: CommandAllocatorId) -> Self {
        Self {
            queue_type,
            allocator,
            commands: Vec::new(),
            is_open: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    #[inline]
    #[must_use]
    pub fn allocator(&self) -> CommandAllocatorId {
        self.allocator
    }

    /// Re-opens a closed list against a (reset) allocator.
    pub fn reset(&mut self, allocator: CommandAllocatorId) {
        debug_assert!(!self.is_open, "reset of a command list that is still open");
        self.allocator = allocator;
        self.commands.clear();
        self.is_open = true;
    }

    /// Finishes recording.
    pub fn close(&mut self) {
        debug_assert!(self.is_open, "close of a command list that is not open");
        self.is_open = false;
    }

    /// Takes the recorded command stream out of a closed list.
    pub(crate) fn take_commands(&mut self) -> Vec<RecordedCommand> {
        debug_assert!(!self.is_open, "submission of an open command list");
        std::mem::take(&mut self.commands)
    }

    /// The commands recorded so far.
    #[must_use]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    fn push(&mut self, command: RecordedCommand) {
        debug_assert!(self.is_open, "recording into a closed command list");
        self.commands.push(command);
    }

    pub fn resource_barriers(&mut self, barriers: Vec<ResourceBarrier>) {
        if !barriers.is_empty() {
            self.push(RecordedCommand::Barriers(barriers));
        }
    }

    pub fn discard_resource(&mut self, resource: RawResourceId) {
        self.push(RecordedCommand::DiscardResource(resource));
    }

    pub fn clear_render_target(&mut self, resource: RawResourceId, color: [f32; 4]) {
        self.push(RecordedCommand::ClearRenderTarget { resource, color });
    }

    pub fn clear_depth_stencil(&mut self, resource: RawResourceId, depth: f32, stencil: u8) {
        self.push(RecordedCommand::ClearDepthStencil {
            resource,
            depth,
            stencil,
        });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(RecordedCommand::Dispatch { x, y, z });
    }

    pub fn copy_resource(&mut self, src: RawResourceId, dst: RawResourceId) {
        self.push(RecordedCommand::CopyResource { src, dst });
    }

    pub fn copy_buffer_region(
        &mut self,
        src: RawResourceId,
        src_offset: u64,
        dst: RawResourceId,
        dst_offset: u64,
        size: u64,
    ) {
        self.push(RecordedCommand::CopyBufferRegion {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    pub fn execute_indirect(
        &mut self,
        argument_buffer: RawResourceId,
        argument_offset: u64,
        max_command_count: u32,
    ) {
        self.push(RecordedCommand::ExecuteIndirect {
            argument_buffer,
            argument_offset,
            max_command_count,
        });
    }

    pub fn begin_event(&mut self, name: &str, color: u32) {
        self.push(RecordedCommand::BeginEvent {
            name: name.to_owned(),
            color,
        });
    }

    pub fn end_event(&mut self) {
        self.push(RecordedCommand::EndEvent);
    }
}

// ============================================================================
// Command queue
// ============================================================================

/// One entry in a queue's submission log.
#[derive(Debug)]
pub enum QueueEvent {
    /// An `ExecuteCommandLists` call; one inner `Vec` per command list.
    Execute(Vec<Vec<RecordedCommand>>),
    /// GPU-side wait for a fence value.
    WaitFence { fence_id: u64, value: u64 },
    /// GPU-side signal of a fence value.
    SignalFence { fence_id: u64, value: u64 },
}

struct QueueInner {
    log: Mutex<Vec<QueueEvent>>,
    /// Monotonic fence signalled after every `ExecuteCommandLists` call,
    /// used for queue-to-queue synchronization.
    completion_fence: Fence,
    submission_count: AtomicU64,
}

/// A GPU command queue.
///
/// The software implementation executes submissions synchronously and in
/// order, which preserves the contract the engine relies on: commands
/// submitted earlier are complete by the time a later signal is observed.
#[derive(Clone)]
pub struct CommandQueue {
    queue_type: QueueType,
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    #[must_use]
    pub fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            inner: Arc::new(QueueInner {
                log: Mutex::new(Vec::new()),
                completion_fence: Fence::new(0),
                submission_count: AtomicU64::new(0),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Submits a batch of closed command lists.
    pub fn execute_command_lists(&self, lists: &mut [&mut CommandList]) {
        let mut batch = Vec::with_capacity(lists.len());
        for list in lists.iter_mut() {
            debug_assert_eq!(
                list.queue_type(),
                self.queue_type,
                "command list submitted to a queue of the wrong class"
            );
            batch.push(list.take_commands());
        }

        self.inner.log.lock().push(QueueEvent::Execute(batch));

        let completed = self.inner.submission_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.completion_fence.signal(completed);
    }

    /// Tells the queue to signal `fence` with `value` once all previously
    /// submitted work has completed.
    pub fn signal(&self, fence: &Fence, value: u64) {
        self.inner.log.lock().push(QueueEvent::SignalFence {
            fence_id: fence.id(),
            value,
        });
        fence.signal(value);
    }

    /// Tells the queue to wait until `fence` reaches `value` before
    /// executing further work. This is a GPU-side wait; it never blocks
    /// the calling thread.
    pub fn wait(&self, fence: &Fence, value: u64) {
        self.inner.log.lock().push(QueueEvent::WaitFence {
            fence_id: fence.id(),
            value,
        });
    }

    /// Makes this queue wait for all work `other` has submitted so far.
    pub fn wait_for_queue(&self, other: &CommandQueue) {
        let value = other.inner.submission_count.load(Ordering::Acquire);
        self.wait(&other.inner.completion_fence, value);
    }

    /// Fence signalled with the submission count after every execute call.
    #[must_use]
    pub fn completion_fence(&self) -> &Fence {
        &self.inner.completion_fence
    }

    /// Number of `ExecuteCommandLists` calls made on this queue.
    #[must_use]
    pub fn submission_count(&self) -> u64 {
        self.inner.submission_count.load(Ordering::Acquire)
    }

    /// Drains and returns the submission log (tests only).
    #[must_use]
    pub fn take_log(&self) -> Vec<QueueEvent> {
        std::mem::take(&mut self.inner.log.lock())
    }
}
