//! GPU Resources
//!
//! [`GpuResource`] is the engine-side wrapper around one buffer or
//! texture: its description, heap class, lifetime class, per-subresource
//! state vector, backing container, usage metric, and bindless SRVs.
//!
//! # Initial state invariants
//!
//! - Only buffers may live in upload or readback heaps.
//! - Upload-heap resources are permanently `GENERIC_READ`; readback-heap
//!   resources are permanently `COPY_DEST`.
//! - Render-target textures start in `RENDER_TARGET`, depth-stencil
//!   textures in `DEPTH_WRITE`; both require special initialization
//!   (discard or clear) before their first real use.
//! - Buffers and simultaneous-access textures in default heaps start in
//!   `COMMON` (they are implicitly promoted on first use).
//!
//! These are checked at construction in debug builds.

pub mod bindless;
pub mod buffer;
pub mod container;
pub mod manager;
pub mod state_manager;
pub mod texture;
pub mod usage_tracker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::errors::Result;
use crate::memory::heap::HeapAllocation;
use crate::memory::residency::PageableGpuObject;
use crate::rhi::device::Device;
use crate::rhi::states::{ResourceStates, resource_always_decays};
use crate::rhi::types::{
    ClearValue, HeapType, PageableId, RawResourceId, ResourceDesc, ResourceFlags,
};

use bindless::{BindlessSrvAllocation, BindlessSrvManager, SrvDescription};
use container::ResourceContainer;
use state_manager::SubResourceStateManager;
use usage_tracker::UsageTracker;

pub use bindless::BindlessSrvAllocation as BindlessSrv;
pub use buffer::BufferResource;
pub use manager::{PersistentGpuResourceManager, TransientGpuResourceManager};
pub use texture::{DepthStencilTexture, RenderTargetTexture, Texture2D};

// ============================================================================
// Identity & classification
// ============================================================================

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique resource identity; the key of every per-resource map in
/// the compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

/// Lifetime class of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifetimeType {
    /// Lives across frames; owned by the application. Never aliased.
    Persistent,
    /// Lives for one frame; owned by the frame graph. Eligible for
    /// memory aliasing.
    Transient,
}

/// Preferred creation path for persistent resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreationPreference {
    Committed,
    Placed,
}

/// First-use initialization required by RT/DS textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecialInitializationMethod {
    Discard,
    Clear,
}

/// Construction parameters for [`GpuResource`].
#[derive(Clone, Debug)]
pub struct GpuResourceCreateInfo {
    pub desc: ResourceDesc,
    pub heap_type: HeapType,
    pub creation_preference: CreationPreference,
    pub clear_value: Option<ClearValue>,
    /// Clear to allow aliasing only after this resource's first GPU use.
    pub can_alias_before_use: bool,
    /// Clear to forbid aliasing after this resource's last GPU use.
    pub can_alias_after_use: bool,
    pub name: String,
}

impl GpuResourceCreateInfo {
    /// Defaults for a default-heap resource.
    #[must_use]
    pub fn new(desc: ResourceDesc, name: impl Into<String>) -> Self {
        Self {
            desc,
            heap_type: HeapType::Default,
            creation_preference: CreationPreference::Placed,
            clear_value: None,
            can_alias_before_use: true,
            can_alias_after_use: true,
            name: name.into(),
        }
    }
}

// ============================================================================
// GpuResource
// ============================================================================

/// One GPU buffer or texture.
pub struct GpuResource {
    id: ResourceId,
    name: String,
    desc: ResourceDesc,
    heap_type: HeapType,
    lifetime: LifetimeType,
    creation_preference: CreationPreference,
    clear_value: Option<ClearValue>,
    initial_state: ResourceStates,
    can_alias_before_use: bool,
    can_alias_after_use: bool,

    state_manager: Mutex<SubResourceStateManager>,
    requires_special_init: AtomicBool,
    container: RwLock<Option<ResourceContainer>>,
    bindless: Mutex<BindlessSrvManager>,
    usage_tracker: UsageTracker,

    /// Pageable bookkeeping; meaningful for committed resources only.
    resident: AtomicBool,
    needs_residency: AtomicBool,
    committed_size: AtomicU64,

    /// Hooks run after the backend resource is (re-)created, e.g. to
    /// flush queued buffer writes.
    post_init_hooks: Mutex<Vec<Box<dyn Fn(RawResourceId) -> Result<()> + Send>>>,

    device: Device,
}

impl GpuResource {
    /// Creates a resource wrapper. No GPU memory is allocated yet.
    #[must_use]
    pub fn new(device: Device, lifetime: LifetimeType, info: GpuResourceCreateInfo) -> Arc<Self> {
        let initial_state = derive_initial_state(&info.desc, info.heap_type);
        validate_create_info(&info);

        let requires_special_init = info.desc.flags.intersects(
            ResourceFlags::ALLOW_RENDER_TARGET | ResourceFlags::ALLOW_DEPTH_STENCIL,
        );
        let subresource_count = info.desc.subresource_count();

        Arc::new(Self {
            id: ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            name: info.name,
            heap_type: info.heap_type,
            lifetime,
            creation_preference: info.creation_preference,
            clear_value: info.clear_value,
            initial_state,
            can_alias_before_use: info.can_alias_before_use && info.heap_type != HeapType::Upload,
            can_alias_after_use: info.can_alias_after_use && info.heap_type != HeapType::Readback,
            state_manager: Mutex::new(SubResourceStateManager::new(
                initial_state,
                subresource_count,
            )),
            requires_special_init: AtomicBool::new(requires_special_init),
            container: RwLock::new(None),
            bindless: Mutex::new(BindlessSrvManager::default()),
            usage_tracker: UsageTracker::new(),
            resident: AtomicBool::new(true),
            needs_residency: AtomicBool::new(false),
            committed_size: AtomicU64::new(0),
            post_init_hooks: Mutex::new(Vec::new()),
            desc: info.desc,
            device,
        })
    }

    // ── Identity & description ─────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    #[inline]
    #[must_use]
    pub fn lifetime(&self) -> LifetimeType {
        self.lifetime
    }

    #[inline]
    #[must_use]
    pub fn creation_preference(&self) -> CreationPreference {
        self.creation_preference
    }

    #[inline]
    #[must_use]
    pub fn clear_value(&self) -> Option<ClearValue> {
        self.clear_value
    }

    #[inline]
    #[must_use]
    pub fn subresource_count(&self) -> u32 {
        self.desc.subresource_count()
    }

    /// `true` if the resource decays to `COMMON` at every
    /// `ExecuteCommandLists` boundary.
    #[must_use]
    pub fn always_decays(&self) -> bool {
        resource_always_decays(&self.desc)
    }

    #[inline]
    #[must_use]
    pub fn can_alias_before_use(&self) -> bool {
        self.can_alias_before_use
    }

    #[inline]
    #[must_use]
    pub fn can_alias_after_use(&self) -> bool {
        self.can_alias_after_use
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    // ── Sub-resource states ────────────────────────────────────────────────

    /// Authoritative state of one subresource (the before-state for the
    /// next compilation).
    #[must_use]
    pub fn subresource_state(&self, subresource: u32) -> ResourceStates {
        self.state_manager.lock().subresource_state(subresource)
    }

    /// Updates the authoritative state. Upload/readback resources never
    /// transition out of their initial state.
    pub fn set_subresource_state(&self, state: ResourceStates, subresource: u32) {
        debug_assert_eq!(
            self.heap_type,
            HeapType::Default,
            "resources in upload or readback heaps never transition out of their initial state"
        );
        self.state_manager
            .lock()
            .set_subresource_state(state, subresource);
    }

    /// Implicit decay of every subresource to `COMMON`.
    pub fn decay_all_subresource_states(&self) {
        self.state_manager.lock().decay_all();
    }

    // ── Special initialization ─────────────────────────────────────────────

    /// `true` while the texture still needs its first-use discard/clear.
    #[must_use]
    pub fn requires_special_initialization(&self) -> bool {
        self.requires_special_init.load(Ordering::Acquire)
    }

    pub fn mark_special_initialization_completed(&self) {
        self.requires_special_init.store(false, Ordering::Release);
    }

    /// How the first-use initialization should be performed.
    #[must_use]
    pub fn special_initialization_method(&self) -> SpecialInitializationMethod {
        if self.clear_value.is_some() {
            SpecialInitializationMethod::Clear
        } else {
            SpecialInitializationMethod::Discard
        }
    }

    // ── Usage & residency ──────────────────────────────────────────────────

    #[must_use]
    pub fn usage_tracker(&self) -> &UsageTracker {
        &self.usage_tracker
    }

    /// Marks the resource (and its heap, for placed resources) as used by
    /// the given frame.
    pub fn mark_used_for_frame(&self, frame_number: u64) {
        self.usage_tracker.mark_used_for_frame(frame_number);
        self.needs_residency.store(true, Ordering::Relaxed);

        if let Some(container) = self.container.read().as_ref() {
            if let Some(allocation) = container.heap_allocation() {
                allocation.heap().set_needs_residency(true);
            }
        }
    }

    // ── Container management ───────────────────────────────────────────────

    /// `true` once the backend resource exists.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.container.read().is_some()
    }

    /// The backend resource handle, if created.
    #[must_use]
    pub fn raw_resource(&self) -> Option<RawResourceId> {
        self.container.read().as_ref().map(ResourceContainer::raw)
    }

    /// The shared heap region, for placed resources.
    #[must_use]
    pub fn heap_allocation(&self) -> Option<Arc<HeapAllocation>> {
        self.container
            .read()
            .as_ref()
            .and_then(|c| c.heap_allocation().cloned())
    }

    /// Creates the resource as a committed allocation.
    pub fn create_committed(self: &Arc<Self>) -> Result<()> {
        let info = self.device.backend().resource_allocation_info(&self.desc);
        let raw = self.device.backend().create_committed_resource(
            self.heap_type,
            &self.desc,
            self.initial_state,
            self.clear_value,
        )?;

        self.committed_size.store(info.size_in_bytes, Ordering::Relaxed);
        self.install_container(ResourceContainer::Committed {
            raw,
            size: info.size_in_bytes,
        })
    }

    /// Creates the resource placed at the base of `allocation`.
    pub fn create_placed(self: &Arc<Self>, allocation: Arc<HeapAllocation>) -> Result<()> {
        let raw = self.device.backend().create_placed_resource(
            allocation.heap().id(),
            allocation.offset(),
            &self.desc,
            self.initial_state,
            self.clear_value,
        )?;

        self.install_container(ResourceContainer::Placed { raw, allocation })
    }

    /// Adopts an externally owned backend resource (e.g. a back buffer).
    pub fn borrow_raw(self: &Arc<Self>, raw: RawResourceId) -> Result<()> {
        self.install_container(ResourceContainer::Borrowed { raw })
    }

    fn install_container(self: &Arc<Self>, new_container: ResourceContainer) -> Result<()> {
        let raw = new_container.raw();

        {
            let mut container = self.container.write();
            if let Some(previous) = container.take() {
                previous.destroy(&self.device);
            }
            *container = Some(new_container);
        }

        // A new backend resource invalidates every descriptor built
        // against the old one; re-create them at their stable indices.
        self.bindless.lock().update_bindless_srvs(raw);

        for hook in self.post_init_hooks.lock().iter() {
            hook(raw)?;
        }

        Ok(())
    }

    /// Registers a hook invoked with the backend handle after every
    /// (re-)creation of the resource.
    pub fn add_post_init_hook(&self, hook: impl Fn(RawResourceId) -> Result<()> + Send + 'static) {
        self.post_init_hooks.lock().push(Box::new(hook));
    }

    // ── Bindless SRVs ──────────────────────────────────────────────────────

    /// Creates a bindless SRV over this resource. The returned handle
    /// frees its index when dropped.
    pub fn create_bindless_srv(
        &self,
        descriptor_heap: &crate::descriptors::GpuResourceDescriptorHeap,
        srv: SrvDescription,
    ) -> Result<BindlessSrvAllocation> {
        let raw = self.raw_resource();
        self.bindless
            .lock()
            .create_bindless_srv(descriptor_heap, srv, raw)
    }

    /// `true` while any bindless SRV over this resource is alive.
    #[must_use]
    pub fn has_bindless_srvs(&self) -> bool {
        self.bindless.lock().has_bindless_srvs()
    }
}

impl Drop for GpuResource {
    fn drop(&mut self) {
        if let Some(container) = self.container.get_mut().take() {
            container.destroy(&self.device);
        }
    }
}

impl PageableGpuObject for GpuResource {
    fn pageable_id(&self) -> PageableId {
        PageableId::Resource(self.raw_resource().unwrap_or_default())
    }

    fn is_resident(&self) -> bool {
        self.resident.load(Ordering::Acquire)
    }

    fn set_resident(&self, resident: bool) {
        self.resident.store(resident, Ordering::Release);
    }

    fn needs_residency_this_frame(&self) -> bool {
        self.needs_residency.load(Ordering::Relaxed)
    }

    fn set_needs_residency(&self, needed: bool) {
        self.needs_residency.store(needed, Ordering::Relaxed);
    }

    fn record_frame_usage(&self) {
        self.usage_tracker
            .advance_frame(self.needs_residency.load(Ordering::Relaxed));
    }

    fn is_deletion_safe(&self) -> bool {
        // Resources are only destroyed through their owners; the
        // residency manager reclaims memory from heaps instead.
        false
    }

    fn delete_gpu_object(&self) {
        debug_assert!(false, "resources are never deleted by the residency manager");
    }

    fn gpu_memory_size(&self) -> u64 {
        self.committed_size.load(Ordering::Relaxed)
    }

    fn usage_metric(&self) -> f32 {
        self.usage_tracker.usage_metric()
    }
}

// ============================================================================
// Validation
// ============================================================================

fn derive_initial_state(desc: &ResourceDesc, heap_type: HeapType) -> ResourceStates {
    match heap_type {
        HeapType::Upload => ResourceStates::GENERIC_READ,
        HeapType::Readback => ResourceStates::COPY_DEST,
        HeapType::Default => {
            if desc.flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
                ResourceStates::RENDER_TARGET
            } else if desc.flags.contains(ResourceFlags::ALLOW_DEPTH_STENCIL) {
                ResourceStates::DEPTH_WRITE
            } else {
                // Buffers and simultaneous-access textures are promoted
                // on first use; starting anywhere but COMMON would cost a
                // pointless barrier.
                ResourceStates::COMMON
            }
        }
    }
}

fn validate_create_info(info: &GpuResourceCreateInfo) {
    if info.heap_type != HeapType::Default {
        debug_assert!(
            info.desc.is_buffer(),
            "only buffers may be created in upload or readback heaps"
        );
    }

    debug_assert!(
        !info.desc.flags.contains(
            ResourceFlags::ALLOW_RENDER_TARGET | ResourceFlags::ALLOW_DEPTH_STENCIL
        ),
        "a texture cannot be both a render target and a depth-stencil target"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};
    use crate::rhi::types::Format;

    fn test_device() -> Device {
        Device::new(Arc::new(SoftwareDevice::new(SoftwareDeviceConfig::default()))).unwrap()
    }

    #[test]
    fn test_initial_states() {
        let device = test_device();

        let buffer = GpuResource::new(
            device.clone(),
            LifetimeType::Persistent,
            GpuResourceCreateInfo::new(ResourceDesc::buffer(256), "buffer"),
        );
        assert_eq!(buffer.subresource_state(0), ResourceStates::COMMON);

        let upload = GpuResource::new(
            device.clone(),
            LifetimeType::Persistent,
            GpuResourceCreateInfo {
                heap_type: HeapType::Upload,
                ..GpuResourceCreateInfo::new(ResourceDesc::buffer(256), "upload")
            },
        );
        assert_eq!(upload.subresource_state(0), ResourceStates::GENERIC_READ);
        assert!(!upload.can_alias_before_use());

        let rt_desc = ResourceDesc {
            flags: ResourceFlags::ALLOW_RENDER_TARGET,
            ..ResourceDesc::texture_2d(Format::Rgba8Unorm, 64, 64, 1)
        };
        let rt = GpuResource::new(
            device,
            LifetimeType::Transient,
            GpuResourceCreateInfo::new(rt_desc, "rt"),
        );
        assert_eq!(rt.subresource_state(0), ResourceStates::RENDER_TARGET);
        assert!(rt.requires_special_initialization());
        assert_eq!(
            rt.special_initialization_method(),
            SpecialInitializationMethod::Discard
        );
    }

    #[test]
    fn test_committed_creation_and_raw_handle() {
        let device = test_device();
        let resource = GpuResource::new(
            device,
            LifetimeType::Persistent,
            GpuResourceCreateInfo {
                creation_preference: CreationPreference::Committed,
                ..GpuResourceCreateInfo::new(ResourceDesc::buffer(1024), "committed")
            },
        );

        assert!(!resource.is_created());
        resource.create_committed().unwrap();
        assert!(resource.is_created());
        assert!(resource.raw_resource().is_some());
        assert!(resource.gpu_memory_size() >= 1024);
    }
}
