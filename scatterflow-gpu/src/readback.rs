//! Blocking buffer readback for tests and exact counts
//!
//! Never part of a frame: each call submits its own copy and waits for the
//! device to go idle.

use std::sync::mpsc;

use crate::context::GpuContext;
use crate::downsample::reference::DENSITY_FIXED_SCALE;
use crate::downsample::{
    COUNTERS_SIZE, COUNTER_MAX_DENSITY, COUNTER_SELECTED, COUNTER_VISIBLE, COUNTER_WEIGHT_HI,
    COUNTER_WEIGHT_LO,
};
use crate::error::{GpuError, GpuResult};

/// Copy the first `size` bytes of `buffer` to the host.
pub fn read_buffer(ctx: &GpuContext, buffer: &wgpu::Buffer, size: u64) -> GpuResult<Vec<u8>> {
    if size == 0 {
        return Ok(Vec::new());
    }
    if size > buffer.size() {
        return Err(GpuError::readback(format!(
            "requested {} bytes from a {} byte buffer",
            size,
            buffer.size()
        )));
    }

    let staging = ctx.create_buffer(
        "readback staging",
        size,
        wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
    )?;
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = ctx.device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|e| GpuError::readback(e.to_string()))?
        .map_err(|e| GpuError::readback(e.to_string()))?;
    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    staging.destroy();
    Ok(bytes)
}

/// Counter buffer contents after a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSnapshot {
    pub visible: u32,
    pub max_density: f32,
    /// Accepted count; may exceed the index capacity
    pub selected: u32,
    /// Fixed-point sum of the visible points' acceptance weights
    pub weight_sum: u64,
}

impl CounterSnapshot {
    pub fn from_words(words: &[u32]) -> Self {
        Self {
            visible: words[COUNTER_VISIBLE],
            max_density: words[COUNTER_MAX_DENSITY] as f32 / DENSITY_FIXED_SCALE,
            selected: words[COUNTER_SELECTED],
            weight_sum: u64::from(words[COUNTER_WEIGHT_HI]) << 32
                | u64::from(words[COUNTER_WEIGHT_LO]),
        }
    }

    /// Indices actually written for an index buffer of `capacity` slots.
    pub fn written(&self, capacity: u32) -> u32 {
        self.selected.min(capacity)
    }
}

fn read_words(ctx: &GpuContext, buffer: &wgpu::Buffer, words: u64) -> GpuResult<Vec<u32>> {
    let bytes = read_buffer(ctx, buffer, words * 4)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

pub fn read_counters(ctx: &GpuContext, counters: &wgpu::Buffer) -> GpuResult<CounterSnapshot> {
    let words = read_words(ctx, counters, COUNTERS_SIZE / 4)?;
    Ok(CounterSnapshot::from_words(&words))
}

/// Selected indices in arrival order, clamped to the buffer capacity.
pub fn read_selected_indices(
    ctx: &GpuContext,
    indices: &wgpu::Buffer,
    counters: &wgpu::Buffer,
) -> GpuResult<Vec<u32>> {
    let capacity = (indices.size() / 4) as u32;
    let written = read_counters(ctx, counters)?.written(capacity);
    read_words(ctx, indices, u64::from(written))
}

/// Per-point markers: density of accepted points, 0 for culled or rejected.
pub fn read_point_data(
    ctx: &GpuContext,
    point_data: &wgpu::Buffer,
    count: u32,
) -> GpuResult<Vec<f32>> {
    let bytes = read_buffer(ctx, point_data, u64::from(count) * 4)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_snapshot_decodes_fixed_point() {
        let snapshot = CounterSnapshot::from_words(&[12, 512, 40, 7, 2, 0, 0, 0]);
        assert_eq!(snapshot.visible, 12);
        assert_eq!(snapshot.max_density, 2.0);
        assert_eq!(snapshot.weight_sum, (2 << 32) + 7);
        assert_eq!(snapshot.written(16), 16);
        assert_eq!(snapshot.written(100), 40);
    }
}
