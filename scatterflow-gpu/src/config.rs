//! Renderer and per-frame downsample configuration

use serde::{Deserialize, Serialize};

use crate::error::{GpuError, GpuResult};

/// Index buffer capacity when no explicit cap is configured
pub const DEFAULT_MAX_POINTS: u32 = 4_000_000;

/// Default weight of local density in the acceptance probability
pub const DEFAULT_DENSITY_WEIGHT: f32 = 5.0;

pub const MAX_DENSITY_WEIGHT: f32 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Render target width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Render target height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Point diameter in pixels
    #[serde(default = "default_point_size")]
    pub point_size: f32,

    /// Opacity contributed by a single point
    #[serde(default = "default_point_alpha")]
    pub point_alpha: f32,

    /// Maximum points drawn per frame. `None` draws every point directly.
    #[serde(default = "default_max_points")]
    pub downsample_max_points: Option<u32>,

    /// Density weight in [0, 10]; 0 samples uniformly
    #[serde(default = "default_density_weight")]
    pub downsample_density_weight: f32,

    /// Side length of a density grid cell in pixels
    #[serde(default = "default_density_cell_size")]
    pub density_cell_size: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            point_size: default_point_size(),
            point_alpha: default_point_alpha(),
            downsample_max_points: default_max_points(),
            downsample_density_weight: default_density_weight(),
            density_cell_size: default_density_cell_size(),
        }
    }
}

impl RendererConfig {
    pub fn validate(&self) -> GpuResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GpuError::invalid_config(format!(
                "render target must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.density_cell_size == 0 {
            return Err(GpuError::invalid_config("density cell size must be non-zero"));
        }
        if !self.point_size.is_finite() || self.point_size <= 0.0 {
            return Err(GpuError::invalid_config(format!(
                "point size must be positive, got {}",
                self.point_size
            )));
        }
        if !self.downsample_density_weight.is_finite() {
            return Err(GpuError::invalid_config("density weight must be finite"));
        }
        Ok(())
    }

    /// Capacity the index buffer is sized for.
    pub fn index_capacity(&self) -> u32 {
        self.downsample_max_points.unwrap_or(DEFAULT_MAX_POINTS)
    }

    /// Density grid dimensions covering the render target.
    pub fn density_grid(&self) -> [u32; 2] {
        let cell = self.density_cell_size.max(1);
        [self.width.div_ceil(cell).max(1), self.height.div_ceil(cell).max(1)]
    }

    /// Build the per-frame downsample record, or `None` when downsampling is off.
    pub fn downsample_config(&self, frame_seed: u32) -> GpuResult<Option<DownsampleConfig>> {
        self.downsample_max_points
            .map(|max_points| {
                DownsampleConfig::new(max_points, self.downsample_density_weight, frame_seed)
            })
            .transpose()
    }
}

/// Per-frame downsample parameters. Built fresh for every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownsampleConfig {
    pub max_points: u32,
    pub density_weight: f32,
    pub frame_seed: u32,
}

impl DownsampleConfig {
    /// Clamp the density weight into [0, 10]; NaN is rejected.
    pub fn new(max_points: u32, density_weight: f32, frame_seed: u32) -> GpuResult<Self> {
        if density_weight.is_nan() {
            return Err(GpuError::invalid_config("density weight is NaN"));
        }
        Ok(Self {
            max_points,
            density_weight: density_weight.clamp(0.0, MAX_DENSITY_WEIGHT),
            frame_seed,
        })
    }
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

fn default_point_size() -> f32 {
    2.0
}

fn default_point_alpha() -> f32 {
    0.7
}

fn default_max_points() -> Option<u32> {
    Some(DEFAULT_MAX_POINTS)
}

fn default_density_weight() -> f32 {
    DEFAULT_DENSITY_WEIGHT
}

fn default_density_cell_size() -> u32 {
    4
}
