//! Dispatch grid sizing for per-point compute passes

use crate::error::{GpuError, GpuResult};

/// Threads per workgroup in every per-point pass
pub const WORKGROUP_SIZE: u32 = 256;

/// Workgroups along x once a dispatch spills into a second row
pub const WORKGROUPS_X: u32 = 256;

/// Point indices covered by one dispatch row
pub const THREADS_PER_ROW: u32 = WORKGROUP_SIZE * WORKGROUPS_X;

/// Workgroup counts `[x, y]` covering `count` points.
///
/// Counts that fit in one row use a 1D grid. Larger counts use rows of
/// [`WORKGROUPS_X`] workgroups; threads past `count` in the last row are
/// guarded no-ops in the shader.
pub fn dispatch_size(count: u32, max_per_dimension: u32) -> GpuResult<[u32; 2]> {
    let items = count.max(1);
    let total = items.div_ceil(WORKGROUP_SIZE);
    if total <= WORKGROUPS_X {
        return Ok([total, 1]);
    }
    let rows = items.div_ceil(THREADS_PER_ROW);
    if rows > max_per_dimension {
        return Err(GpuError::DispatchTooLarge {
            count,
            rows,
            limit: max_per_dimension,
        });
    }
    Ok([WORKGROUPS_X, rows])
}

/// Number of threads a grid launches.
pub fn covered_threads(workgroups: [u32; 2]) -> u64 {
    u64::from(workgroups[0]) * u64::from(workgroups[1]) * u64::from(WORKGROUP_SIZE)
}

/// Workgroups for a 2D pass over a `[width, height]` grid with square
/// workgroups of side `tile`.
pub fn grid_dispatch(grid: [u32; 2], tile: u32) -> [u32; 2] {
    [grid[0].div_ceil(tile).max(1), grid[1].div_ceil(tile).max(1)]
}
