//! Graphics Abstraction Types
//!
//! Plain data types shared across the device boundary: queue identities,
//! resource descriptors, heap descriptions, barrier payloads, and device
//! capability reports. These mirror their D3D12 counterparts closely
//! enough that a native backend is a direct mapping.

use bitflags::bitflags;

use super::states::ResourceStates;

/// Subresource index wildcard, mirroring
/// `D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES`.
pub const ALL_SUBRESOURCES: u32 = u32::MAX;

/// Constant-buffer placement alignment (bytes).
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// UAV counter placement alignment (bytes).
pub const UAV_COUNTER_ALIGNMENT: u64 = 4096;

/// Texture copy row pitch alignment (bytes).
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u64 = 256;

/// Texture copy subresource placement alignment (bytes).
pub const TEXTURE_SUBRESOURCE_PLACEMENT_ALIGNMENT: u64 = 512;

// ============================================================================
// Queues
// ============================================================================

/// The three GPU command queue classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum QueueType {
    /// Graphics queue: may record any command and any transition.
    Direct = 0,
    /// Async compute queue.
    Compute = 1,
    /// Copy queue.
    Copy = 2,
}

impl QueueType {
    /// All queue types, ordered from most to least capable.
    pub const ALL: [Self; 3] = [Self::Direct, Self::Compute, Self::Copy];

    /// Queue name (for debugging).
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::Compute => "Compute",
            Self::Copy => "Copy",
        }
    }
}

bitflags! {
    /// Set of queue classes used by a bundle or execution module.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct QueueFlags: u8 {
        const DIRECT = 1 << 0;
        const COMPUTE = 1 << 1;
        const COPY = 1 << 2;
    }
}

impl From<QueueType> for QueueFlags {
    fn from(queue: QueueType) -> Self {
        match queue {
            QueueType::Direct => Self::DIRECT,
            QueueType::Compute => Self::COMPUTE,
            QueueType::Copy => Self::COPY,
        }
    }
}

impl QueueFlags {
    /// Number of queue classes in the set.
    #[inline]
    #[must_use]
    pub fn count(self) -> u32 {
        self.bits().count_ones()
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Texel format. Only the formats the engine itself needs to reason about
/// are enumerated; backends map them onto their native format tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R32Float,
    R8Unorm,
    Depth32Float,
    Depth24UnormStencil8,
}

impl Format {
    /// Bytes per texel. Depth-stencil formats report the size of their
    /// primary plane.
    #[must_use]
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Unknown | Self::R8Unorm => 1,
            Self::Rg16Float | Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
            Self::Depth32Float | Self::Depth24UnormStencil8 => 4,
        }
    }

    /// Number of format planes (stencil counts as a second plane).
    #[must_use]
    pub const fn plane_count(self) -> u32 {
        match self {
            Self::Depth24UnormStencil8 => 2,
            _ => 1,
        }
    }
}

/// Resource dimensionality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Buffer,
    Texture2D,
}

bitflags! {
    /// Resource creation flags, mirroring `D3D12_RESOURCE_FLAGS`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        const ALLOW_RENDER_TARGET = 1 << 0;
        const ALLOW_DEPTH_STENCIL = 1 << 1;
        const ALLOW_UNORDERED_ACCESS = 1 << 2;
        const DENY_SHADER_RESOURCE = 1 << 3;
        const ALLOW_SIMULTANEOUS_ACCESS = 1 << 4;
    }
}

/// Heap class of a resource, mirroring `D3D12_HEAP_TYPE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// GPU-local memory.
    Default,
    /// CPU-write, GPU-read memory. Resources stay in `GENERIC_READ`.
    Upload,
    /// GPU-write, CPU-read memory. Resources stay in `COPY_DEST`.
    Readback,
}

/// Description of a buffer or texture resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDesc {
    pub dimension: ResourceDimension,
    pub format: Format,
    /// Buffer length in bytes, or texture width in texels.
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub flags: ResourceFlags,
}

impl ResourceDesc {
    /// Describes a byte buffer.
    #[must_use]
    pub fn buffer(size_in_bytes: u64) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            format: Format::Unknown,
            width: size_in_bytes,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            flags: ResourceFlags::empty(),
        }
    }

    /// Describes a 2D texture.
    #[must_use]
    pub fn texture_2d(format: Format, width: u64, height: u32, mip_levels: u16) -> Self {
        Self {
            dimension: ResourceDimension::Texture2D,
            format,
            width,
            height,
            depth_or_array_size: 1,
            mip_levels,
            flags: ResourceFlags::empty(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_buffer(&self) -> bool {
        self.dimension == ResourceDimension::Buffer
    }

    /// Number of subresources (mips × array slices × format planes).
    /// Buffers always have exactly one subresource.
    #[must_use]
    pub fn subresource_count(&self) -> u32 {
        if self.is_buffer() {
            return 1;
        }

        u32::from(self.mip_levels)
            * u32::from(self.depth_or_array_size)
            * self.format.plane_count()
    }
}

/// Optimized clear value for render-target and depth-stencil textures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

/// Size and alignment a resource requires from its heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceAllocationInfo {
    pub size_in_bytes: u64,
    pub alignment: u64,
}

/// Placement footprint of one texture subresource inside a copy buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceFootprint {
    /// Byte offset of the subresource from the base of the described range.
    pub offset: u64,
    /// Row pitch in bytes, aligned to [`TEXTURE_ROW_PITCH_ALIGNMENT`].
    pub row_pitch: u64,
    /// Number of rows.
    pub row_count: u32,
    /// Bytes of actual texel data per row (unpadded).
    pub unpadded_row_size: u64,
}

/// Copyable footprints for a span of texture subresources.
#[derive(Clone, Debug, Default)]
pub struct CopyableFootprints {
    pub footprints: Vec<SubresourceFootprint>,
    /// Total buffer bytes required, including inter-subresource padding.
    pub total_bytes: u64,
}

// ============================================================================
// Barriers
// ============================================================================

/// Transition barrier flags, mirroring `D3D12_RESOURCE_BARRIER_FLAGS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BarrierFlags {
    #[default]
    None,
    BeginOnly,
    EndOnly,
}

/// A resource barrier as recorded into a command list.
///
/// The `resource` field is the backend handle of the affected resource
/// (`RawResourceId`); barrier batches are assembled by the record context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceBarrier {
    Transition {
        resource: RawResourceId,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
        flags: BarrierFlags,
    },
    UnorderedAccess {
        resource: RawResourceId,
    },
    Aliasing {
        before: Option<RawResourceId>,
        after: RawResourceId,
    },
}

// ============================================================================
// Descriptors
// ============================================================================

/// Descriptor heap class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// CBV / SRV / UAV descriptors.
    CbvSrvUav,
    /// Render-target views.
    Rtv,
    /// Depth-stencil views.
    Dsv,
}

/// Description of a descriptor heap.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorHeapDesc {
    pub heap_type: DescriptorHeapType,
    pub descriptor_count: u32,
    pub shader_visible: bool,
}

/// Contents of one written descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorContents {
    /// Shader resource view over a resource.
    ShaderResourceView {
        resource: RawResourceId,
        most_detailed_mip: u32,
        mip_levels: u32,
    },
    /// Constant buffer view over a byte range.
    ConstantBufferView { resource: RawResourceId, offset: u64, size: u64 },
    /// Unordered access view.
    UnorderedAccessView { resource: RawResourceId, counter: Option<RawResourceId> },
}

// ============================================================================
// Capabilities & Memory
// ============================================================================

/// Resource heap tier, mirroring `D3D12_RESOURCE_HEAP_TIER`.
///
/// On tier-1 hardware a heap may only hold one resource class (buffers,
/// RT/DS textures, or other textures); tier 2 removes the restriction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceHeapTier {
    Tier1,
    Tier2,
}

/// Shader model reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShaderModel {
    pub major: u8,
    pub minor: u8,
}

/// Resource binding tier, mirroring `D3D12_RESOURCE_BINDING_TIER`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceBindingTier {
    Tier1,
    Tier2,
    Tier3,
}

/// Device capability report consulted during initialization and by the
/// residency manager.
#[derive(Clone, Copy, Debug)]
pub struct DeviceCapabilities {
    pub resource_heap_tier: ResourceHeapTier,
    pub resource_binding_tier: ResourceBindingTier,
    pub highest_shader_model: ShaderModel,
    /// Maximum GPU virtual address space per process, in bytes. When this
    /// exceeds the memory budget, eviction is preferable to deletion.
    pub max_gpu_virtual_address_bytes: u64,
}

/// Snapshot of the device-local memory budget.
#[derive(Clone, Copy, Debug)]
pub struct MemoryBudgetInfo {
    /// OS-provided budget this process should stay within, in bytes.
    pub budget: u64,
    /// Bytes of device-local memory currently consumed by this process.
    pub current_usage: u64,
}

// ============================================================================
// Backend handles
// ============================================================================

slotmap::new_key_type! {
    /// Backend handle of a GPU memory heap.
    pub struct HeapId;

    /// Backend handle of a created (committed, placed, or borrowed) resource.
    pub struct RawResourceId;

    /// Backend handle of a descriptor heap.
    pub struct DescriptorHeapId;

    /// Backend handle of a command allocator.
    pub struct CommandAllocatorId;
}

/// Identity of a pageable object for residency calls: either a committed
/// resource or a heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageableId {
    Resource(RawResourceId),
    Heap(HeapId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subresource_count() {
        assert_eq!(ResourceDesc::buffer(256).subresource_count(), 1);

        let tex = ResourceDesc::texture_2d(Format::Rgba8Unorm, 128, 128, 4);
        assert_eq!(tex.subresource_count(), 4);

        let array = ResourceDesc {
            depth_or_array_size: 6,
            ..ResourceDesc::texture_2d(Format::Rgba8Unorm, 64, 64, 3)
        };
        assert_eq!(array.subresource_count(), 18);

        let ds = ResourceDesc::texture_2d(Format::Depth24UnormStencil8, 64, 64, 1);
        assert_eq!(ds.subresource_count(), 2);
    }

    #[test]
    fn test_queue_flags() {
        let mut flags = QueueFlags::empty();
        flags |= QueueFlags::from(QueueType::Direct);
        flags |= QueueFlags::from(QueueType::Copy);
        assert_eq!(flags.count(), 2);
        assert!(flags.contains(QueueFlags::DIRECT));
        assert!(!flags.contains(QueueFlags::COMPUTE));
    }
}
