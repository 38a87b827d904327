//! Mip pyramid construction: level i is filtered down into level i+1
//!
//! Every step depends on the one before it, so each dispatch is preceded by
//! a barrier making the freshly written source level readable.

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

pub const DOWNSAMPLE_TILE: TileSize = TileSize::new(8, 8);
pub const DOWNSAMPLE_SHADER: &str = include_str!("shaders/downsample.wgsl");

/// Push constants for downsample.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DownsampleParams {
    pub src_size: [u32; 2],
    pub dst_size: [u32; 2],
}

/// (source, destination) level pairs, finest first
pub fn downsample_steps(mip_levels: u32) -> impl Iterator<Item = (u32, u32)> {
    (1..mip_levels).map(|dst| (dst - 1, dst))
}

/// Make `src` sampleable and `dst` writable, returning the barriers
pub fn step_barriers(
    tracker: &mut ResourceStateTracker,
    image: ImageId,
    src: u32,
    dst: u32,
) -> Vec<ImageBarrier> {
    let mut barriers = tracker.transition(image, src..src + 1, ResourceState::SHADER_READ);
    barriers.extend(tracker.transition(image, dst..dst + 1, ResourceState::SHADER_WRITE));
    tracker.assert_layout(image, src, ImageLayout::ShaderReadOnly);
    tracker.assert_layout(image, dst, ImageLayout::General);
    barriers
}

pub struct PyramidDownsampler {
    kernel: ComputeKernel,
    sampler: wgpu::Sampler,
}

impl PyramidDownsampler {
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        let kernel = ComputeKernel::new(
            ctx,
            &KernelDesc {
                label: "Downsample",
                source: DOWNSAMPLE_SHADER,
                entry_point: "downsample_main",
                entries: &[
                    sampled_texture_entry(0),
                    storage_texture_entry(1, HDR_FORMAT, wgpu::StorageTextureAccess::WriteOnly),
                    sampler_entry(2),
                ],
                push_constant_bytes: std::mem::size_of::<DownsampleParams>() as u32,
            },
        )?;
        let sampler = linear_clamp_sampler(&ctx.device, "Downsample Sampler");
        Ok(Self { kernel, sampler })
    }

    /// Record every step from mip 0 down to the coarsest level
    pub fn record(
        &self,
        ctx: &GpuContext,
        batch: &mut CommandBatch,
        tracker: &mut ResourceStateTracker,
        arena: &mut BindingArena,
        image: &MipImage,
    ) {
        for (src, dst) in downsample_steps(image.mip_levels) {
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
            let params = DownsampleParams {
                src_size: [src_extent.width, src_extent.height],
                dst_size: [dst_extent.width, dst_extent.height],
            };
            log::trace!(
                "Downsample mip {src} ({}x{}) -> mip {dst} ({}x{})",
                src_extent.width,
                src_extent.height,
                dst_extent.width,
                dst_extent.height
            );
            batch.dispatch(
                self.kernel.label,
                &self.kernel.pipeline,
                arena.get(bind_group),
                bytemuck::bytes_of(&params),
                plan(dst_extent, DOWNSAMPLE_TILE),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_walk_finest_to_coarsest() {
        let steps: Vec<_> = downsample_steps(6).collect();
        assert_eq!(steps, vec![(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)]);
        assert_eq!(downsample_steps(1).count(), 0);
    }

    #[test]
    fn test_first_step_source_comes_from_fill() {
        let mut tracker = ResourceStateTracker::new();
        let image = tracker.register(6);
        tracker.transition(image, 0..1, ResourceState::SHADER_WRITE);

        let barriers = step_barriers(&mut tracker, image, 0, 1);
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].mips, 0..1);
        assert_eq!(barriers[0].from, ResourceState::SHADER_WRITE);
        assert_eq!(barriers[0].to, ResourceState::SHADER_READ);
        assert_eq!(barriers[1].mips, 1..2);
        assert_eq!(barriers[1].from, ResourceState::UNDEFINED);
        assert_eq!(barriers[1].to, ResourceState::SHADER_WRITE);
    }
}
