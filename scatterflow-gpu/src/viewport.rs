/*!
# Viewport State

Pan/zoom state of the point view. A data point `p` maps to normalized device
coordinates as `(p - center) * scale`; anything outside `[-1, 1]` on either
axis is culled.
*/

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Center and zoom of the view in data units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
        }
    }
}

/// Axis-aligned data-space rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl Rect {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }
}

impl ViewportState {
    pub fn new(x: f32, y: f32, scale: f32) -> Self {
        Self { x, y, scale }
    }

    /// Viewport that fits the given data rectangle.
    pub fn fit(bounds: Rect) -> Self {
        let extent = bounds.width().max(bounds.height()).max(f32::EPSILON);
        Self {
            x: (bounds.x_min + bounds.x_max) * 0.5,
            y: (bounds.y_min + bounds.y_max) * 0.5,
            scale: 2.0 / extent,
        }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn to_ndc(&self, x: f32, y: f32) -> Vec2 {
        (Vec2::new(x, y) - self.center()) * self.scale
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        let ndc = self.to_ndc(x, y);
        ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0
    }

    pub fn visible_bounds(&self) -> Rect {
        let half = 1.0 / self.scale;
        Rect {
            x_min: self.x - half,
            y_min: self.y - half,
            x_max: self.x + half,
            y_max: self.y + half,
        }
    }

    /// Pixel position of a data point; pixel rows grow downwards.
    pub fn to_pixel(&self, x: f32, y: f32, width: u32, height: u32) -> Vec2 {
        let ndc = self.to_ndc(x, y);
        Vec2::new(
            (ndc.x + 1.0) * 0.5 * width as f32,
            (1.0 - ndc.y) * 0.5 * height as f32,
        )
    }

    pub fn from_pixel(&self, px: f32, py: f32, width: u32, height: u32) -> Vec2 {
        let ndc = Vec2::new(
            px / width as f32 * 2.0 - 1.0,
            1.0 - py / height as f32 * 2.0,
        );
        ndc / self.scale + self.center()
    }

    /// Density grid cell of a visible data point.
    pub fn cell_of(
        &self,
        x: f32,
        y: f32,
        width: u32,
        height: u32,
        cell_size: u32,
        grid: [u32; 2],
    ) -> [u32; 2] {
        let px = self.to_pixel(x, y, width, height);
        let cell = cell_size.max(1) as f32;
        let cx = ((px.x / cell).max(0.0) as u32).min(grid[0].saturating_sub(1));
        let cy = ((px.y / cell).max(0.0) as u32).min(grid[1].saturating_sub(1));
        [cx, cy]
    }
}

/// Frame-wide uniforms shared by every compute and render pipeline (group 0).
///
/// Layout matches `ViewUniforms` in `common.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ViewUniforms {
    pub center: [f32; 2],
    pub scale: f32,
    pub point_size: f32,
    pub frame_size: [f32; 2],
    pub point_alpha: f32,
    pub point_count: u32,
    pub density_grid: [u32; 2],
    pub density_cell: f32,
    pub category_count: u32,
}

impl ViewUniforms {
    pub fn new(
        viewport: &ViewportState,
        config: &crate::config::RendererConfig,
        point_count: u32,
        category_count: u32,
    ) -> Self {
        Self {
            center: [viewport.x, viewport.y],
            scale: viewport.scale,
            point_size: config.point_size,
            frame_size: [config.width as f32, config.height as f32],
            point_alpha: config.point_alpha,
            point_count,
            density_grid: config.density_grid(),
            density_cell: config.density_cell_size as f32,
            category_count,
        }
    }
}
