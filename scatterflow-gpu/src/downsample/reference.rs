/*!
CPU rendition of the density field and the three downsample passes.

Uses the same hash, cell mapping and acceptance formula as the WGSL passes.
Compaction runs in index order, so `selected` is sorted. The GPU writes the
same set in arrival order whenever the accepted count fits under the limit.
*/

use rayon::prelude::*;

use crate::config::{DownsampleConfig, RendererConfig};
use crate::viewport::ViewportState;

/// Fixed-point scale of the max-density counter and the field maximum
pub const DENSITY_FIXED_SCALE: f32 = 256.0;

/// Floor applied to a visible point's density so it stays a positive marker
pub const MIN_DENSITY: f32 = 1.0e-6;

/// Lower clamp of density relative to the field maximum
pub const MIN_RELATIVE_DENSITY: f32 = 1.0 / 1024.0;

/// Fixed-point scale of acceptance weights and of their per-frame sum
pub const WEIGHT_FIXED_SCALE: f32 = 1024.0;

/// Headroom between the expected accepted count and the limit, in standard
/// deviations of the accepted count
pub const TARGET_SIGMAS: f32 = 4.0;

pub fn pcg_hash(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Uniform draw in [0, 1) determined by `(seed, index)`.
pub fn random01(seed: u32, index: u32) -> f32 {
    let h = pcg_hash(index ^ pcg_hash(seed));
    (h >> 8) as f32 * (1.0 / 16_777_216.0)
}

/// Acceptance weight `relative^(-weight / 10)` in fixed point. `max_density`
/// is the maximum of the blurred field, so the weight lies in
/// `[1, 1024^(1 + weight / 10)]` before scaling.
pub fn sample_weight(density: f32, max_density: f32, density_weight: f32) -> u32 {
    let relative = (density / max_density.max(MIN_DENSITY)).clamp(MIN_RELATIVE_DENSITY, 1.0);
    let k = density_weight * 0.1;
    (relative.powf(-k) * WEIGHT_FIXED_SCALE) as u32
}

/// Expected accepted count once more points are visible than `limit`.
pub fn sample_target(limit: u32) -> f32 {
    let limit = limit as f32;
    (limit - TARGET_SIGMAS * limit.sqrt()).max(0.5 * limit)
}

/// The 64-bit weight sum as the sample pass reads it, one `f32` per half.
pub fn weight_sum_f32(weight_sum: u64) -> f32 {
    (weight_sum >> 32) as u32 as f32 * 4_294_967_296.0 + weight_sum as u32 as f32
}

/// Acceptance probability of a visible point with fixed-point `weight`.
///
/// Every point is kept while `visible <= limit`. Past that the weights are
/// normalised by their frame sum, so the probabilities add up to at most
/// [`sample_target`].
pub fn acceptance_probability(weight: u32, weight_sum: u64, visible: u32, limit: u32) -> f32 {
    if visible <= limit {
        return 1.0;
    }
    let sum = weight_sum_f32(weight_sum).max(1.0);
    (sample_target(limit) * weight as f32 / sum).min(1.0)
}

/// Blurred per-cell point counts over the render target
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    pub size: [u32; 2],
    pub cells: Vec<f32>,
}

impl DensityGrid {
    pub fn at(&self, cell: [u32; 2]) -> f32 {
        self.cells[(cell[1] * self.size[0] + cell[0]) as usize]
    }

    /// Field maximum in the fixed point `density_blur` records
    pub fn max_fixed(&self) -> u32 {
        self.cells
            .par_iter()
            .map(|c| (c * DENSITY_FIXED_SCALE) as u32)
            .max()
            .unwrap_or(0)
    }
}

/// Accumulate visible points into the grid and apply a 3x3 box blur.
pub fn density_field(
    xs: &[f32],
    ys: &[f32],
    viewport: &ViewportState,
    config: &RendererConfig,
) -> DensityGrid {
    let size = config.density_grid();
    let cells = (size[0] * size[1]) as usize;

    let counts = xs
        .par_iter()
        .zip(ys.par_iter())
        .fold(
            || vec![0u32; cells],
            |mut acc, (&x, &y)| {
                if viewport.contains(x, y) {
                    let [cx, cy] = viewport.cell_of(
                        x,
                        y,
                        config.width,
                        config.height,
                        config.density_cell_size,
                        size,
                    );
                    acc[(cy * size[0] + cx) as usize] += 1;
                }
                acc
            },
        )
        .reduce(
            || vec![0u32; cells],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(a, b)| *a += b);
                a
            },
        );

    let [w, h] = [size[0] as i64, size[1] as i64];
    let blurred = (0..cells)
        .into_par_iter()
        .map(|i| {
            let (x, y) = ((i as i64) % w, (i as i64) / w);
            let mut sum = 0.0f32;
            let mut taps = 0.0f32;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (cx, cy) = (x + dx, y + dy);
                    if cx < 0 || cy < 0 || cx >= w || cy >= h {
                        continue;
                    }
                    sum += counts[(cy * w + cx) as usize] as f32;
                    taps += 1.0;
                }
            }
            sum / taps
        })
        .collect();

    DensityGrid {
        size,
        cells: blurred,
    }
}

/// Buffers and counters the GPU passes would leave behind
#[derive(Debug, Clone, PartialEq)]
pub struct CpuDownsample {
    pub visible: u32,
    pub max_density_fixed: u32,
    /// Sum of the visible points' fixed-point weights
    pub weight_sum: u64,
    /// Accepted points keep their density; culled and rejected points are 0.
    pub point_data: Vec<f32>,
    /// Accepted points, capped at the index capacity
    pub selected: Vec<u32>,
    /// Accepted count before the cap
    pub accepted: u32,
}

impl CpuDownsample {
    pub fn upper_bound(&self, max_points: u32) -> u32 {
        (self.point_data.len() as u32).min(max_points)
    }
}

/// Run cull, acceptance and compaction for one frame. `capacity` is the index
/// buffer length in points.
pub fn downsample_cpu(
    xs: &[f32],
    ys: &[f32],
    density: &DensityGrid,
    viewport: &ViewportState,
    config: &RendererConfig,
    frame: &DownsampleConfig,
    capacity: u32,
) -> CpuDownsample {
    let count = xs.len().min(ys.len());
    if count == 0 || frame.max_points == 0 {
        return CpuDownsample {
            visible: 0,
            max_density_fixed: 0,
            weight_sum: 0,
            point_data: vec![0.0; count],
            selected: Vec::new(),
            accepted: 0,
        };
    }

    let mut point_data: Vec<f32> = (0..count)
        .into_par_iter()
        .map(|i| {
            let (x, y) = (xs[i], ys[i]);
            if !viewport.contains(x, y) {
                return 0.0;
            }
            let cell = viewport.cell_of(
                x,
                y,
                config.width,
                config.height,
                config.density_cell_size,
                density.size,
            );
            density.at(cell).max(MIN_DENSITY)
        })
        .collect();

    let visible = point_data.par_iter().filter(|d| **d > 0.0).count() as u32;
    let max_density_fixed = point_data
        .par_iter()
        .map(|d| (d * DENSITY_FIXED_SCALE) as u32)
        .max()
        .unwrap_or(0);

    let field_max = density.max_fixed() as f32 / DENSITY_FIXED_SCALE;
    let weight = |d: f32| sample_weight(d, field_max, frame.density_weight);
    let weight_sum: u64 = point_data
        .par_iter()
        .filter(|d| **d > 0.0)
        .map(|d| u64::from(weight(*d)))
        .sum();

    let limit = frame.max_points.min(capacity);
    point_data.par_iter_mut().enumerate().for_each(|(i, d)| {
        if *d <= 0.0 {
            return;
        }
        let p = acceptance_probability(weight(*d), weight_sum, visible, limit);
        if random01(frame.frame_seed, i as u32) >= p {
            *d = 0.0;
        }
    });

    let mut selected = Vec::new();
    let mut accepted = 0u32;
    for (i, d) in point_data.iter().enumerate() {
        if *d > 0.0 {
            if accepted < limit {
                selected.push(i as u32);
            }
            accepted += 1;
        }
    }

    CpuDownsample {
        visible,
        max_density_fixed,
        weight_sum,
        point_data,
        selected,
        accepted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(pcg_hash(0), pcg_hash(0));
        assert_ne!(pcg_hash(0), pcg_hash(1));
        for i in 0..1000 {
            let r = random01(42, i);
            assert!((0.0..1.0).contains(&r));
        }
    }

    #[test]
    fn test_random_draws_are_roughly_uniform() {
        let n = 100_000;
        let below_half = (0..n).filter(|i| random01(7, *i) < 0.5).count();
        let ratio = below_half as f64 / n as f64;
        assert!((ratio - 0.5).abs() < 0.01, "ratio {}", ratio);
    }

    #[test]
    fn test_weights_follow_relative_density() {
        assert_eq!(sample_weight(3.0, 9.0, 0.0), 1024);
        let sparse = sample_weight(1.0, 8.0, 10.0);
        assert!((8191..=8192).contains(&sparse), "weight {}", sparse);
        // Relative density is clamped at 1/1024.
        let floor = sample_weight(1.0e-6, 8.0, 10.0);
        assert!((1_048_000..=1_048_576).contains(&floor), "weight {}", floor);
        assert_eq!(sample_weight(16.0, 8.0, 10.0), 1024);
    }

    #[test]
    fn test_everything_is_kept_under_the_limit() {
        assert_eq!(acceptance_probability(1024, 5 * 1024, 5, 10), 1.0);
        assert_eq!(acceptance_probability(1024, 10 * 1024, 10, 10), 1.0);
        assert_eq!(acceptance_probability(1024, 0, 0, 10), 1.0);
    }

    #[test]
    fn test_uniform_weights_share_the_target() {
        let target = sample_target(10);
        assert_eq!(target, 5.0);
        let p = acceptance_probability(1024, 100 * 1024, 100, 10);
        assert!((p - 0.05).abs() < 1e-6, "p {}", p);
    }

    #[test]
    fn test_target_leaves_headroom() {
        assert_eq!(sample_target(10_000), 9_600.0);
        for limit in [1, 2, 10, 100, 1_000, 4_000_000] {
            let target = sample_target(limit);
            assert!(target <= limit as f32 && target >= 0.5 * limit as f32);
        }
    }

    #[test]
    fn test_expected_count_stays_under_the_limit() {
        // A few very sparse points among many dense ones, at full weight.
        let weights: Vec<u32> = (0..500_000)
            .map(|i| if i % 100 == 0 { sample_weight(0.01, 50.0, 10.0) } else { 1024 })
            .collect();
        let sum: u64 = weights.iter().map(|w| u64::from(*w)).sum();
        assert!(sum > u64::from(u32::MAX));
        let expected: f32 = weights
            .iter()
            .map(|w| acceptance_probability(*w, sum, weights.len() as u32, 2_000))
            .sum();
        assert!(expected <= sample_target(2_000) + 1.0, "expected {}", expected);
        let sparse = acceptance_probability(weights[0], sum, weights.len() as u32, 2_000);
        let dense = acceptance_probability(weights[1], sum, weights.len() as u32, 2_000);
        assert!(sparse > dense * 100.0);
    }

    #[test]
    fn test_weight_sum_conversion_keeps_the_high_word() {
        assert_eq!(weight_sum_f32(1024), 1024.0);
        assert_eq!(weight_sum_f32(3 << 32), 3.0 * 4_294_967_296.0);
    }

    #[test]
    fn test_density_field_blurs_counts() {
        let config = RendererConfig {
            width: 8,
            height: 8,
            density_cell_size: 4,
            ..Default::default()
        };
        let viewport = ViewportState::default();
        // Both points land in the top-left cell of a 2x2 grid.
        let grid = density_field(&[-0.9, -0.8], &[0.9, 0.8], &viewport, &config);
        assert_eq!(grid.size, [2, 2]);
        assert!(grid.cells.iter().all(|c| (*c - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_culled_points_are_zero() {
        let config = RendererConfig::default();
        let viewport = ViewportState::default();
        let xs = [0.0, 5.0, -0.5];
        let ys = [0.0, 0.0, 0.5];
        let grid = density_field(&xs, &ys, &viewport, &config);
        let frame = DownsampleConfig::new(10, 0.0, 1).unwrap();
        let out = downsample_cpu(&xs, &ys, &grid, &viewport, &config, &frame, 10);
        assert_eq!(out.visible, 2);
        assert_eq!(out.point_data[1], 0.0);
        assert_eq!(out.selected, vec![0, 2]);
        assert_eq!(out.upper_bound(frame.max_points), 3);
    }
}
