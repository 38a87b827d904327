//! Procedural fill of mip 0 with HDR content

use crate::error::Result;
use crate::gpu::arena::{Binding, BindingArena};
use crate::gpu::batch::CommandBatch;
use crate::gpu::context::{GpuContext, HDR_FORMAT};
use crate::gpu::image::MipImage;
use crate::gpu::kernel::{ComputeKernel, KernelDesc, storage_texture_entry};
use crate::gpu::{ImageLayout, ResourceState, ResourceStateTracker, TileSize, plan};

pub const FILL_TILE: TileSize = TileSize::new(16, 16);
pub const FILL_SHADER: &str = include_str!("shaders/fill.wgsl");

/// What the fill kernel writes into mip 0
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FillPattern {
    /// Grid of tinted diamonds peaking at `peak`
    Diamond { peak: f32 },
    /// Every pixel set to one colour
    Flat([f32; 4]),
}

impl Default for FillPattern {
    fn default() -> Self {
        FillPattern::Diamond { peak: 8.0 }
    }
}

/// Push constants for fill.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FillParams {
    pub color: [f32; 4],
    pub size: [u32; 2],
    pub mode: u32,
    pub peak: f32,
}

impl FillParams {
    pub fn new(pattern: FillPattern, size: [u32; 2]) -> Self {
        match pattern {
            FillPattern::Flat(color) => Self {
                color,
                size,
                mode: 0,
                peak: 0.0,
            },
            FillPattern::Diamond { peak } => Self {
                color: [0.0; 4],
                size,
                mode: 1,
                peak,
            },
        }
    }
}

pub struct FillPipeline {
    kernel: ComputeKernel,
}

impl FillPipeline {
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        let kernel = ComputeKernel::new(
            ctx,
            &KernelDesc {
                label: "Fill",
                source: FILL_SHADER,
                entry_point: "fill_main",
                entries: &[storage_texture_entry(
                    0,
                    HDR_FORMAT,
                    wgpu::StorageTextureAccess::WriteOnly,
                )],
                push_constant_bytes: std::mem::size_of::<FillParams>() as u32,
            },
        )?;
        Ok(Self { kernel })
    }

    /// Record the fill of mip 0
    pub fn record(
        &self,
        ctx: &GpuContext,
        batch: &mut CommandBatch,
        tracker: &mut ResourceStateTracker,
        arena: &mut BindingArena,
        image: &MipImage,
        pattern: FillPattern,
    ) {
        batch.transition(tracker, image.id, 0..1, ResourceState::SHADER_WRITE);
        tracker.assert_layout(image.id, 0, ImageLayout::General);

        let target = arena.level_view(image, 0);
        let bind_group = arena.bind_group(
            &ctx.device,
            &self.kernel.bind_group_layout,
            &[Binding::View(target)],
        );

        let extent = image.extent;
        let params = FillParams::new(pattern, [extent.width, extent.height]);
        batch.dispatch(
            self.kernel.label,
            &self.kernel.pipeline,
            arena.get(bind_group),
            bytemuck::bytes_of(&params),
            plan(extent, FILL_TILE),
        );
    }
}
