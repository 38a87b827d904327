//! Auto-exposure tone mapping of mip 0, in place

use crate::error::Result;
use crate::gpu::arena::{Binding, BindingArena};
use crate::gpu::batch::CommandBatch;
use crate::gpu::context::{GpuContext, HDR_FORMAT};
use crate::gpu::image::MipImage;
use crate::gpu::kernel::{ComputeKernel, KernelDesc, storage_texture_entry};
use crate::gpu::{ImageLayout, ResourceState, ResourceStateTracker, TileSize, plan};

pub const TONEMAP_TILE: TileSize = TileSize::new(16, 16);
pub const TONEMAP_SHADER: &str = include_str!("shaders/tonemap.wgsl");

/// Floor on the average luminance so a black frame does not blow up exposure
pub const MIN_LUMINANCE: f32 = 1e-4;

/// Exposure-normalized Reinhard curve for one channel; mirrors tonemap.wgsl
pub fn tone_map_channel(value: f32, average_luminance: f32, key_value: f32) -> f32 {
    let exposure = key_value / average_luminance.max(MIN_LUMINANCE);
    let scaled = value.max(0.0) * exposure;
    scaled / (1.0 + scaled)
}

/// Push constants for tonemap.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ToneMapParams {
    pub average_luminance: f32,
    pub key_value: f32,
    pub size: [u32; 2],
}

pub struct ToneMapper {
    kernel: ComputeKernel,
}

impl ToneMapper {
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        let kernel = ComputeKernel::new(
            ctx,
            &KernelDesc {
                label: "Tone Map",
                source: TONEMAP_SHADER,
                entry_point: "tonemap_main",
                entries: &[storage_texture_entry(
                    0,
                    HDR_FORMAT,
                    wgpu::StorageTextureAccess::ReadWrite,
                )],
                push_constant_bytes: std::mem::size_of::<ToneMapParams>() as u32,
            },
        )?;
        Ok(Self { kernel })
    }

    /// Record the tone-mapping dispatch; the luminance travels as a push
    /// constant, not through a buffer
    pub fn record(
        &self,
        ctx: &GpuContext,
        batch: &mut CommandBatch,
        tracker: &mut ResourceStateTracker,
        arena: &mut BindingArena,
        image: &MipImage,
        average_luminance: f32,
        key_value: f32,
    ) {
        batch.transition(tracker, image.id, 0..1, ResourceState::SHADER_READ_WRITE);
        tracker.assert_layout(image.id, 0, ImageLayout::General);

        let target = arena.level_view(image, 0);
        let bind_group = arena.bind_group(
            &ctx.device,
            &self.kernel.bind_group_layout,
            &[Binding::View(target)],
        );

        let params = ToneMapParams {
            average_luminance,
            key_value,
            size: [image.extent.width, image.extent.height],
        };
        batch.dispatch(
            self.kernel.label,
            &self.kernel.pipeline,
            arena.get(bind_group),
            bytemuck::bytes_of(&params),
            plan(image.extent, TONEMAP_TILE),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_is_monotonic() {
        for average in [0.01, 0.18, 1.0, 25.0] {
            let mut previous = tone_map_channel(0.0, average, 0.18);
            for step in 1..2000 {
                let value = step as f32 * 0.05;
                let mapped = tone_map_channel(value, average, 0.18);
                assert!(mapped >= previous, "curve decreased at {value} (avg {average})");
                previous = mapped;
            }
        }
    }

    #[test]
    fn test_curve_stays_in_display_range() {
        assert_eq!(tone_map_channel(0.0, 1.0, 0.18), 0.0);
        assert_eq!(tone_map_channel(-3.0, 1.0, 0.18), 0.0);
        let bright = tone_map_channel(1.0e6, 1.0, 0.18);
        assert!(bright < 1.0 && bright > 0.99);
    }

    #[test]
    fn test_average_pixel_maps_to_key_midpoint() {
        // A pixel at the average luminance lands on key / (1 + key)
        let mapped = tone_map_channel(2.5, 2.5, 0.18);
        assert!((mapped - 0.18 / 1.18).abs() < 1e-6);
    }

    #[test]
    fn test_black_frame_uses_luminance_floor() {
        let mapped = tone_map_channel(1e-4, 0.0, 0.18);
        assert!(mapped.is_finite());
        assert!((mapped - 0.18 / 1.18).abs() < 1e-6);
    }
}
