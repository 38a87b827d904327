//! Scene-average luminance: per-workgroup partial sums on the device,
//! final sum and average on the host

use crate::error::Result;
use crate::gpu::arena::{Binding, BindingArena};
use crate::gpu::batch::CommandBatch;
use crate::gpu::context::GpuContext;
use crate::gpu::image::{MipImage, allocate_buffer};
use crate::gpu::kernel::{ComputeKernel, KernelDesc, sampled_texture_entry, storage_buffer_entry};
use crate::gpu::readback::read_f32s;
use crate::gpu::{Extent2d, ImageLayout, ResourceState, ResourceStateTracker, TileSize, plan};

pub const LUMINANCE_TILE: TileSize = TileSize::new(16, 16);
pub const LUMINANCE_SHADER: &str = include_str!("shaders/luminance.wgsl");

/// Rec. 709 weights, same as `LUMA` in luminance.wgsl
pub const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// Number of partial sums the reduction writes for `extent`
pub fn partial_sum_count(extent: Extent2d) -> u64 {
    plan(extent, LUMINANCE_TILE).total()
}

/// Average luminance from the per-workgroup partial sums
pub fn reduce_partial_sums(partials: &[f32], extent: Extent2d) -> f32 {
    assert_eq!(
        partials.len() as u64,
        partial_sum_count(extent),
        "partial sum buffer does not match the reduction dispatch"
    );
    let total: f64 = partials.iter().map(|&sum| sum as f64).sum();
    (total / extent.pixel_count() as f64) as f32
}

/// Device-side partial sums plus the staging buffer they are read through
pub struct PartialSums {
    pub storage: wgpu::Buffer,
    pub staging: wgpu::Buffer,
    pub extent: Extent2d,
}

impl PartialSums {
    /// Size both buffers to one `f32` per reduction workgroup
    pub fn allocate(ctx: &GpuContext, extent: Extent2d) -> Result<Self> {
        let size = partial_sum_count(extent) * std::mem::size_of::<f32>() as u64;
        let storage = allocate_buffer(
            ctx,
            "Luminance Partial Sums",
            size,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        )?;
        let staging = allocate_buffer(
            ctx,
            "Luminance Staging",
            size,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        )?;
        Ok(Self {
            storage,
            staging,
            extent,
        })
    }

    /// Read the partial sums back and average them over every pixel
    pub fn average(&self, ctx: &GpuContext) -> Result<f32> {
        let partials = read_f32s(ctx, &self.staging)?;
        Ok(reduce_partial_sums(&partials, self.extent))
    }
}

pub struct LuminanceReducer {
    kernel: ComputeKernel,
}

impl LuminanceReducer {
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        let kernel = ComputeKernel::new(
            ctx,
            &KernelDesc {
                label: "Luminance",
                source: LUMINANCE_SHADER,
                entry_point: "luminance_main",
                entries: &[sampled_texture_entry(0), storage_buffer_entry(1)],
                push_constant_bytes: 0,
            },
        )?;
        Ok(Self { kernel })
    }

    /// Record the reduction over mip 0 and the copy into the staging buffer
    pub fn record(
        &self,
        ctx: &GpuContext,
        batch: &mut CommandBatch,
        tracker: &mut ResourceStateTracker,
        arena: &mut BindingArena,
        image: &MipImage,
        sums: &PartialSums,
    ) {
        assert_eq!(sums.extent, image.extent, "partial sums sized for another image");

        batch.transition(tracker, image.id, 0..1, ResourceState::SHADER_READ);
        tracker.assert_layout(image.id, 0, ImageLayout::ShaderReadOnly);

        let source = arena.level_view(image, 0);
        let bind_group = arena.bind_group(
            &ctx.device,
            &self.kernel.bind_group_layout,
            &[Binding::View(source), Binding::Buffer(&sums.storage)],
        );
        batch.dispatch(
            self.kernel.label,
            &self.kernel.pipeline,
            arena.get(bind_group),
            &[],
            plan(image.extent, LUMINANCE_TILE),
        );

        batch
            .encoder()
            .copy_buffer_to_buffer(&sums.storage, 0, &sums.staging, 0, sums.storage.size());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sum_count_matches_dispatch() {
        assert_eq!(partial_sum_count(Extent2d::new(1920, 1080)), 120 * 68);
        assert_eq!(partial_sum_count(Extent2d::new(16, 16)), 1);
        assert_eq!(partial_sum_count(Extent2d::new(17, 1)), 2);
    }

    #[test]
    fn test_reduce_flat_partials() {
        // 20x20 at luminance 0.25: four groups covering 256, 64, 64 and 16 pixels
        let extent = Extent2d::new(20, 20);
        let partials = [256.0 * 0.25, 64.0 * 0.25, 64.0 * 0.25, 16.0 * 0.25];
        assert!((reduce_partial_sums(&partials, extent) - 0.25).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn test_reduce_rejects_mismatched_buffer() {
        reduce_partial_sums(&[1.0, 2.0], Extent2d::new(16, 16));
    }

    #[test]
    fn test_luma_weights_sum_to_one() {
        let sum: f32 = LUMA_WEIGHTS.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}
