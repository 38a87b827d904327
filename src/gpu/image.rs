//! Image and buffer allocation
//!
//! wgpu owns the memory behind every handle; this module only describes the
//! resources, registers images with the state tracker and turns creation
//! failures into errors.

use crate::error::{PipelineError, Result};

use super::context::GpuContext;
use super::state::{ImageId, ResourceStateTracker};
use super::workgroups::Extent2d;

/// Shape and usage of an image to allocate
#[derive(Clone, Debug)]
pub struct ImageDesc {
    pub label: &'static str,
    pub extent: Extent2d,
    pub format: wgpu::TextureFormat,
    pub mip_levels: u32,
    pub usage: wgpu::TextureUsages,
}

/// A device-local 2D image with a tracked mip chain
pub struct MipImage {
    pub id: ImageId,
    pub label: &'static str,
    pub texture: wgpu::Texture,
    pub extent: Extent2d,
    pub format: wgpu::TextureFormat,
    pub mip_levels: u32,
}

/// View of a single mip level, bound to one kernel slot
pub struct LevelView {
    pub level: u32,
    pub extent: Extent2d,
    pub view: wgpu::TextureView,
}

impl MipImage {
    /// Extent of mip `level`
    pub fn level_extent(&self, level: u32) -> Extent2d {
        self.extent.mip(level)
    }

    /// Create a view scoped to mip `level`
    pub fn level_view(&self, level: u32) -> LevelView {
        assert!(
            level < self.mip_levels,
            "{} has no mip {level} ({} levels)",
            self.label,
            self.mip_levels
        );
        let view = self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(self.label),
            format: Some(self.format),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        });
        LevelView {
            level,
            extent: self.level_extent(level),
            view,
        }
    }

    /// Free the texture and drop its tracker rows
    pub fn destroy(self, tracker: &mut ResourceStateTracker) {
        log::debug!("Destroying {}", self.label);
        self.texture.destroy();
        tracker.release(self.id);
    }
}

/// Allocate a device-local image and start tracking its levels
pub fn allocate_image(
    ctx: &GpuContext,
    tracker: &mut ResourceStateTracker,
    desc: &ImageDesc,
) -> Result<MipImage> {
    let (texture, error) = ctx.scoped(|device| {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: desc.extent.to_wgpu(),
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        })
    });
    if let Some(error) = error {
        return Err(PipelineError::ResourceCreation {
            label: desc.label.to_string(),
            message: error.to_string(),
        });
    }

    log::debug!(
        "Allocated {} {}x{} {:?} with {} mips",
        desc.label,
        desc.extent.width,
        desc.extent.height,
        desc.format,
        desc.mip_levels
    );

    Ok(MipImage {
        id: tracker.register(desc.mip_levels),
        label: desc.label,
        texture,
        extent: desc.extent,
        format: desc.format,
        mip_levels: desc.mip_levels,
    })
}

/// Allocate a linear buffer
pub fn allocate_buffer(
    ctx: &GpuContext,
    label: &'static str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> Result<wgpu::Buffer> {
    let (buffer, error) = ctx.scoped(|device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    });
    match error {
        Some(error) => Err(PipelineError::ResourceCreation {
            label: label.to_string(),
            message: error.to_string(),
        }),
        None => Ok(buffer),
    }
}
