//! Synchronous buffer readback (map, poll, read, unmap)

use crate::error::{PipelineError, Result};

use super::context::GpuContext;

/// Read the whole of a `MAP_READ` buffer back to host memory.
///
/// The buffer must not be in use by any pending submission other than the
/// one that filled it.
pub fn read_buffer(ctx: &GpuContext, buffer: &wgpu::Buffer) -> Result<Vec<u8>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = ctx.device.poll(wgpu::Maintain::Wait);

    pollster::block_on(receiver).map_err(|_| PipelineError::ReadbackChannel)??;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Read a buffer of `f32` values
pub fn read_f32s(ctx: &GpuContext, buffer: &wgpu::Buffer) -> Result<Vec<f32>> {
    let bytes = read_buffer(ctx, buffer)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Bytes per row of a texture copy, padded to wgpu's copy alignment
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    (width * bytes_per_pixel).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

/// Drop the row padding of a texture copy
pub fn strip_row_padding(data: &[u8], height: u32, row_bytes: u32, padded_row_bytes: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((row_bytes * height) as usize);
    for row in data.chunks(padded_row_bytes as usize).take(height as usize) {
        pixels.extend_from_slice(&row[..row_bytes as usize]);
    }
    pixels
}
