//! Precision reduction of mip 0 into an RGBA8 image and its readback

use crate::encode::OutputImage;
use crate::error::Result;
use crate::gpu::arena::{Binding, BindingArena};
use crate::gpu::batch::CommandBatch;
use crate::gpu::context::GpuContext;
use crate::gpu::image::{MipImage, allocate_buffer};
use crate::gpu::kernel::{ComputeKernel, KernelDesc, sampled_texture_entry, storage_texture_entry};
use crate::gpu::readback::{padded_bytes_per_row, read_buffer, strip_row_padding};
use crate::gpu::{Extent2d, ImageLayout, ResourceState, ResourceStateTracker, TileSize, plan};

pub const CONVERT_TILE: TileSize = TileSize::new(16, 16);
pub const CONVERT_SHADER: &str = include_str!("shaders/convert.wgsl");

/// Format of the low-precision output image
pub const LDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const LDR_CHANNELS: u32 = 4;

/// Host-mappable buffer receiving the RGBA8 image with padded rows
pub struct Destage {
    pub buffer: wgpu::Buffer,
    pub extent: Extent2d,
    pub padded_row_bytes: u32,
}

impl Destage {
    pub fn allocate(ctx: &GpuContext, extent: Extent2d) -> Result<Self> {
        let padded_row_bytes = padded_bytes_per_row(extent.width, LDR_CHANNELS);
        let buffer = allocate_buffer(
            ctx,
            "Destage Buffer",
            padded_row_bytes as u64 * extent.height as u64,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        )?;
        Ok(Self {
            buffer,
            extent,
            padded_row_bytes,
        })
    }

    /// Map the buffer and repack it with a stride of `width * 4`
    pub fn read(&self, ctx: &GpuContext) -> Result<OutputImage> {
        let data = read_buffer(ctx, &self.buffer)?;
        let row_bytes = self.extent.width * LDR_CHANNELS;
        let pixels = strip_row_padding(&data, self.extent.height, row_bytes, self.padded_row_bytes);
        Ok(OutputImage::new(
            self.extent.width,
            self.extent.height,
            LDR_CHANNELS,
            pixels,
        ))
    }
}

pub struct FormatConverter {
    kernel: ComputeKernel,
}

impl FormatConverter {
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        let kernel = ComputeKernel::new(
            ctx,
            &KernelDesc {
                label: "Convert",
                source: CONVERT_SHADER,
                entry_point: "convert_main",
                entries: &[
                    sampled_texture_entry(0),
                    storage_texture_entry(1, LDR_FORMAT, wgpu::StorageTextureAccess::WriteOnly),
                ],
                push_constant_bytes: 0,
            },
        )?;
        Ok(Self { kernel })
    }

    /// Record the conversion of `hdr` mip 0 into `ldr` and the copy of `ldr`
    /// into the destage buffer
    pub fn record(
        &self,
        ctx: &GpuContext,
        batch: &mut CommandBatch,
        tracker: &mut ResourceStateTracker,
        arena: &mut BindingArena,
        hdr: &MipImage,
        ldr: &MipImage,
        destage: &Destage,
    ) {
        assert_eq!(hdr.extent, ldr.extent, "conversion must keep the extent");

        batch.transition(tracker, hdr.id, 0..1, ResourceState::SHADER_READ);
        batch.transition(tracker, ldr.id, 0..1, ResourceState::SHADER_WRITE);
        tracker.assert_layout(hdr.id, 0, ImageLayout::ShaderReadOnly);
        tracker.assert_layout(ldr.id, 0, ImageLayout::General);

        let source = arena.level_view(hdr, 0);
        let target = arena.level_view(ldr, 0);
        let bind_group = arena.bind_group(
            &ctx.device,
            &self.kernel.bind_group_layout,
            &[Binding::View(source), Binding::View(target)],
        );
        batch.dispatch(
            self.kernel.label,
            &self.kernel.pipeline,
            arena.get(bind_group),
            &[],
            plan(ldr.extent, CONVERT_TILE),
        );

        batch.transition(tracker, ldr.id, 0..1, ResourceState::TRANSFER_SRC);
        tracker.assert_layout(ldr.id, 0, ImageLayout::TransferSrc);
        batch.encoder().copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &ldr.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &destage.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(destage.padded_row_bytes),
                    rows_per_image: Some(ldr.extent.height),
                },
            },
            ldr.extent.to_wgpu(),
        );
    }
}
