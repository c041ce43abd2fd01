//! Texture Resources
//!
//! Thin typed wrappers over [`GpuResource`] for the texture classes the
//! engine distinguishes: sampled 2D textures, render targets, and
//! depth-stencil targets.

use std::sync::Arc;

use crate::rhi::device::Device;
use crate::rhi::types::{ClearValue, Format, ResourceDesc, ResourceFlags};

use super::{GpuResource, GpuResourceCreateInfo, LifetimeType};

/// A sampled 2D texture.
pub struct Texture2D {
    resource: Arc<GpuResource>,
}

impl Texture2D {
    #[must_use]
    pub fn new(
        device: Device,
        lifetime: LifetimeType,
        format: Format,
        width: u64,
        height: u32,
        mip_levels: u16,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource: GpuResource::new(
                device,
                lifetime,
                GpuResourceCreateInfo::new(
                    ResourceDesc::texture_2d(format, width, height, mip_levels),
                    name,
                ),
            ),
        }
    }

    #[inline]
    #[must_use]
    pub fn resource(&self) -> &Arc<GpuResource> {
        &self.resource
    }
}

/// A render-target texture. Starts in `RENDER_TARGET` and requires
/// special initialization on first use.
pub struct RenderTargetTexture {
    resource: Arc<GpuResource>,
}

impl RenderTargetTexture {
    #[must_use]
    pub fn new(
        device: Device,
        lifetime: LifetimeType,
        format: Format,
        width: u64,
        height: u32,
        clear_color: Option<[f32; 4]>,
        name: impl Into<String>,
    ) -> Self {
        let desc = ResourceDesc {
            flags: ResourceFlags::ALLOW_RENDER_TARGET,
            ..ResourceDesc::texture_2d(format, width, height, 1)
        };

        Self {
            resource: GpuResource::new(
                device,
                lifetime,
                GpuResourceCreateInfo {
                    clear_value: clear_color.map(ClearValue::Color),
                    ..GpuResourceCreateInfo::new(desc, name)
                },
            ),
        }
    }

    #[inline]
    #[must_use]
    pub fn resource(&self) -> &Arc<GpuResource> {
        &self.resource
    }
}

/// A depth-stencil texture. Starts in `DEPTH_WRITE` and requires
/// special initialization on first use.
pub struct DepthStencilTexture {
    resource: Arc<GpuResource>,
}

impl DepthStencilTexture {
    #[must_use]
    pub fn new(
        device: Device,
        lifetime: LifetimeType,
        format: Format,
        width: u64,
        height: u32,
        clear_depth: f32,
        name: impl Into<String>,
    ) -> Self {
        debug_assert!(matches!(
            format,
            Format::Depth32Float | Format::Depth24UnormStencil8
        ));

        let desc = ResourceDesc {
            flags: ResourceFlags::ALLOW_DEPTH_STENCIL,
            ..ResourceDesc::texture_2d(format, width, height, 1)
        };

        Self {
            resource: GpuResource::new(
                device,
                lifetime,
                GpuResourceCreateInfo {
                    clear_value: Some(ClearValue::DepthStencil {
                        depth: clear_depth,
                        stencil: 0,
                    }),
                    ..GpuResourceCreateInfo::new(desc, name)
                },
            ),
        }
    }

    #[inline]
    #[must_use]
    pub fn resource(&self) -> &Arc<GpuResource> {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::SpecialInitializationMethod;
    use crate::rhi::software::{SoftwareDevice, SoftwareDeviceConfig};
    use crate::rhi::states::ResourceStates;

    fn test_device() -> Device {
        Device::new(std::sync::Arc::new(SoftwareDevice::new(
            SoftwareDeviceConfig::default(),
        )))
        .unwrap()
    }

    #[test]
    fn test_texture_classes_derive_their_initial_states() {
        let device = test_device();

        let sampled = Texture2D::new(
            device.clone(),
            LifetimeType::Persistent,
            Format::Rgba8Unorm,
            256,
            256,
            4,
            "albedo",
        );
        assert_eq!(sampled.resource().subresource_count(), 4);
        assert_eq!(
            sampled.resource().subresource_state(0),
            ResourceStates::COMMON
        );
        assert!(!sampled.resource().requires_special_initialization());

        let target = RenderTargetTexture::new(
            device.clone(),
            LifetimeType::Transient,
            Format::Rgba16Float,
            1920,
            1080,
            Some([0.0, 0.0, 0.0, 1.0]),
            "hdr_target",
        );
        assert_eq!(
            target.resource().subresource_state(0),
            ResourceStates::RENDER_TARGET
        );
        assert_eq!(
            target.resource().special_initialization_method(),
            SpecialInitializationMethod::Clear
        );

        let depth = DepthStencilTexture::new(
            device,
            LifetimeType::Transient,
            Format::Depth24UnormStencil8,
            1920,
            1080,
            1.0,
            "scene_depth",
        );
        assert_eq!(
            depth.resource().subresource_state(0),
            ResourceStates::DEPTH_WRITE
        );
        // Depth and stencil planes are tracked separately.
        assert_eq!(depth.resource().subresource_count(), 2);
    }
}
