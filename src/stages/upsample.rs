//! Bloom accumulation: coarsest to finest, each coarser level is upsampled
//! and added onto the next finer one

use crate::error::Result;
use crate::gpu::arena::{Binding, BindingArena};
use crate::gpu::batch::CommandBatch;
use crate::gpu::context::{GpuContext, HDR_FORMAT};
use crate::gpu::image::MipImage;
use crate::gpu::kernel::{
    ComputeKernel, KernelDesc, linear_clamp_sampler, sampled_texture_entry, sampler_entry,
    storage_texture_entry,
};
use crate::gpu::state::{ImageBarrier, ImageId};
use crate::gpu::{ImageLayout, ResourceState, ResourceStateTracker, TileSize, plan};

pub const UPSAMPLE_TILE: TileSize = TileSize::new(8, 8);
pub const UPSAMPLE_SHADER: &str = include_str!("shaders/upsample.wgsl");

/// Push constants for upsample.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UpsampleParams {
    pub src_size: [u32; 2],
    pub dst_size: [u32; 2],
    pub strength: f32,
    pub _padding: u32,
}

/// (source, destination) level pairs, coarsest first
pub fn upsample_steps(mip_levels: u32) -> impl Iterator<Item = (u32, u32)> {
    (1..mip_levels).rev().map(|src| (src, src - 1))
}

/// Make the coarser `src` sampleable and the finer `dst` read-writable
pub fn step_barriers(
    tracker: &mut ResourceStateTracker,
    image: ImageId,
    src: u32,
    dst: u32,
) -> Vec<ImageBarrier> {
    let mut barriers = tracker.transition(image, src..src + 1, ResourceState::SHADER_READ);
    barriers.extend(tracker.transition(image, dst..dst + 1, ResourceState::SHADER_READ_WRITE));
    tracker.assert_layout(image, src, ImageLayout::ShaderReadOnly);
    tracker.assert_layout(image, dst, ImageLayout::General);
    barriers
}

pub struct PyramidUpsampler {
    kernel: ComputeKernel,
    sampler: wgpu::Sampler,
}

impl PyramidUpsampler {
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        let kernel = ComputeKernel::new(
            ctx,
            &KernelDesc {
                label: "Upsample",
                source: UPSAMPLE_SHADER,
                entry_point: "upsample_main",
                entries: &[
                    sampled_texture_entry(0),
                    storage_texture_entry(1, HDR_FORMAT, wgpu::StorageTextureAccess::ReadWrite),
                    sampler_entry(2),
                ],
                push_constant_bytes: std::mem::size_of::<UpsampleParams>() as u32,
            },
        )?;
        let sampler = linear_clamp_sampler(&ctx.device, "Upsample Sampler");
        Ok(Self { kernel, sampler })
    }

    /// Record every step from the coarsest level back up to mip 0.
    ///
    /// `strength` weighs the upsampled glow against the level's own content.
    pub fn record(
        &self,
        ctx: &GpuContext,
        batch: &mut CommandBatch,
        tracker: &mut ResourceStateTracker,
        arena: &mut BindingArena,
        image: &MipImage,
        strength: f32,
    ) {
        for (src, dst) in upsample_steps(image.mip_levels) {
            batch.record_barriers(step_barriers(tracker, image.id, src, dst));

            let src_view = arena.level_view(image, src);
            let dst_view = arena.level_view(image, dst);
            let bind_group = arena.bind_group(
                &ctx.device,
                &self.kernel.bind_group_layout,
                &[
                    Binding::View(src_view),
                    Binding::View(dst_view),
                    Binding::Sampler(&self.sampler),
                ],
            );

            let src_extent = arena.view(src_view).extent;
            let dst_extent = arena.view(dst_view).extent;
            let params = UpsampleParams {
                src_size: [src_extent.width, src_extent.height],
                dst_size: [dst_extent.width, dst_extent.height],
                strength,
                _padding: 0,
            };
            log::trace!("Upsample mip {src} -> mip {dst}");
            batch.dispatch(
                self.kernel.label,
                &self.kernel.pipeline,
                arena.get(bind_group),
                bytemuck::bytes_of(&params),
                plan(dst_extent, UPSAMPLE_TILE),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_walk_coarsest_to_finest() {
        let steps: Vec<_> = upsample_steps(6).collect();
        assert_eq!(steps, vec![(5, 4), (4, 3), (3, 2), (2, 1), (1, 0)]);
    }

    #[test]
    fn test_coarsest_level_handed_over_from_downsample() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(3);
        tracker.transition(image, 0..2, ResourceState::SHADER_READ);
        tracker.transition(image, 2..3, ResourceState::SHADER_WRITE);

        let barriers = step_barriers(&mut tracker, image, 2, 1);
        assert_eq!(barriers[0].from, ResourceState::SHADER_WRITE);
        assert_eq!(barriers[0].to, ResourceState::SHADER_READ);
        assert_eq!(barriers[1].from, ResourceState::SHADER_READ);
        assert_eq!(barriers[1].to, ResourceState::SHADER_READ_WRITE);
    }

    #[test]
    fn test_params_layout_matches_shader_block() {
        assert_eq!(std::mem::size_of::<UpsampleParams>(), 24);
    }
}
