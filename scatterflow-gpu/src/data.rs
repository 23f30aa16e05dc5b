/*!
# Scene Data

Host-supplied point arrays and view state as constant nodes, plus the buffers
and bind groups every pipeline shares: group 0 holds the view uniforms, group 1
the per-point arrays and the category palette.

Uploads are pure nodes that write through the queue. They depend on the buffer
they fill, so a reallocated buffer is refilled on the next frame.
*/

use std::rc::Rc;

use scatterflow_core::{Dataflow, GraphResult, Node};

use crate::binder::{self, per_point_bytes, STORAGE_USAGE, UNIFORM_USAGE};
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::error::{GpuError, GpuResult};
use crate::viewport::{ViewUniforms, ViewportState};

/// Palette used when the host supplies no category colors
pub const DEFAULT_COLOR: [f32; 4] = [0.27, 0.51, 0.71, 1.0];

const COLOR_BYTES: u64 = 16;

/// Constant nodes the host writes to
#[derive(Debug, Clone, Copy)]
pub struct SceneInputs {
    pub ctx: Node<GpuContext>,
    pub xs: Node<Vec<f32>>,
    pub ys: Node<Vec<f32>>,
    pub categories: Node<Option<Vec<u32>>>,
    pub colors: Node<Vec<[f32; 4]>>,
    pub viewport: Node<ViewportState>,
    pub config: Node<RendererConfig>,
}

impl SceneInputs {
    pub fn new(df: &mut Dataflow, ctx: GpuContext, config: RendererConfig) -> Self {
        Self {
            ctx: df.value("gpu context", ctx),
            xs: df.value("x coordinates", Vec::new()),
            ys: df.value("y coordinates", Vec::new()),
            categories: df.value("categories", None),
            colors: df.value("category colors", vec![DEFAULT_COLOR]),
            viewport: df.value("viewport", ViewportState::default()),
            config: df.value("renderer config", config),
        }
    }
}

/// Number of points described by the coordinate arrays. Every array that is
/// present must have the same length.
pub fn point_count(xs: &[f32], ys: &[f32], categories: Option<&[u32]>) -> GpuResult<u32> {
    if xs.len() != ys.len() {
        return Err(GpuError::invalid_config(format!(
            "x and y arrays differ in length ({} vs {})",
            xs.len(),
            ys.len()
        )));
    }
    if let Some(categories) = categories {
        if categories.len() != xs.len() {
            return Err(GpuError::invalid_config(format!(
                "category array has {} entries for {} points",
                categories.len(),
                xs.len()
            )));
        }
    }
    u32::try_from(xs.len())
        .map_err(|_| GpuError::invalid_config(format!("{} points exceeds u32 indexing", xs.len())))
}

fn palette(colors: &[[f32; 4]]) -> &[[f32; 4]] {
    if colors.is_empty() {
        std::slice::from_ref(&DEFAULT_COLOR)
    } else {
        colors
    }
}

/// Derived buffers and bind groups for groups 0 and 1
#[derive(Debug, Clone, Copy)]
pub struct SceneResources {
    pub count: Node<u32>,
    pub view_uniforms: Node<ViewUniforms>,
    pub view_buffer: Node<wgpu::Buffer>,
    pub xs: Node<wgpu::Buffer>,
    pub ys: Node<wgpu::Buffer>,
    pub categories: Node<wgpu::Buffer>,
    pub colors: Node<wgpu::Buffer>,
    /// Aggregates every host upload; read once per frame before recording.
    pub uploads: Node<()>,
    pub view_layout: Node<wgpu::BindGroupLayout>,
    pub points_layout: Node<wgpu::BindGroupLayout>,
    pub view_group: Node<wgpu::BindGroup>,
    pub points_group: Node<wgpu::BindGroup>,
}

impl SceneResources {
    pub fn build(df: &mut Dataflow, inputs: &SceneInputs) -> GraphResult<Self> {
        let ctx = inputs.ctx;

        let count = df.try_derive(
            "point count",
            (inputs.xs, inputs.ys, inputs.categories),
            |(xs, ys, categories)| Ok(point_count(&xs, &ys, categories.as_deref())?),
        )?;

        let view_uniforms = df.derive_eq(
            "view uniforms",
            (inputs.viewport, inputs.config, count, inputs.colors),
            |(viewport, config, count, colors)| {
                ViewUniforms::new(&viewport, &config, *count, palette(&colors).len() as u32)
            },
        )?;

        let array_size = binder::buffer_size(df, "point array size", count, |count: Rc<u32>| {
            per_point_bytes(*count)
        })?;
        let color_size = binder::buffer_size(
            df,
            "palette size",
            inputs.colors,
            |colors: Rc<Vec<[f32; 4]>>| palette(&colors).len() as u64 * COLOR_BYTES,
        )?;
        let view_size = binder::buffer_size(df, "view uniform size", (), |_| {
            std::mem::size_of::<ViewUniforms>() as u64
        })?;

        let view_buffer = binder::gpu_buffer(df, "view uniforms", ctx, view_size, UNIFORM_USAGE)?;
        let xs = binder::gpu_buffer(df, "x buffer", ctx, array_size, STORAGE_USAGE)?;
        let ys = binder::gpu_buffer(df, "y buffer", ctx, array_size, STORAGE_USAGE)?;
        let categories = binder::gpu_buffer(df, "category buffer", ctx, array_size, STORAGE_USAGE)?;
        let colors = binder::gpu_buffer(df, "palette buffer", ctx, color_size, STORAGE_USAGE)?;

        let uploads = vec![
            df.derive("upload x", (ctx, xs, inputs.xs), |(ctx, buffer, data)| {
                ctx.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&data));
            })?,
            df.derive("upload y", (ctx, ys, inputs.ys), |(ctx, buffer, data)| {
                ctx.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&data));
            })?,
            df.derive(
                "upload categories",
                (ctx, categories, inputs.categories, count),
                |(ctx, buffer, data, count)| match data.as_deref() {
                    Some(data) => ctx.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(data)),
                    None => {
                        let zeros = vec![0u32; *count as usize];
                        ctx.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&zeros));
                    }
                },
            )?,
            df.derive("upload palette", (ctx, colors, inputs.colors), |(ctx, buffer, data)| {
                ctx.queue.write_buffer(&buffer, 0, bytemuck::cast_slice(palette(&data)));
            })?,
            df.derive("upload view", (ctx, view_buffer, view_uniforms), |(ctx, buffer, uniforms)| {
                ctx.queue.write_buffer(&buffer, 0, bytemuck::bytes_of(&*uniforms));
            })?,
        ];
        let uploads = df.derive("scene uploads", uploads, |_| ())?;

        let compute_and_vertex = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::COMPUTE;
        let view_layout = binder::bind_group_layout(
            df,
            "view layout",
            ctx,
            vec![binder::uniform_entry(0, compute_and_vertex | wgpu::ShaderStages::FRAGMENT)],
        )?;
        let points_layout = binder::bind_group_layout(
            df,
            "points layout",
            ctx,
            vec![
                binder::storage_entry(0, compute_and_vertex, true),
                binder::storage_entry(1, compute_and_vertex, true),
                binder::storage_entry(2, compute_and_vertex, true),
                binder::storage_entry(3, wgpu::ShaderStages::VERTEX, true),
            ],
        )?;

        let view_group =
            binder::bind_group(df, "view group", ctx, view_layout, vec![(0, view_buffer)])?;
        let points_group = binder::bind_group(
            df,
            "points group",
            ctx,
            points_layout,
            vec![(0, xs), (1, ys), (2, categories), (3, colors)],
        )?;

        Ok(Self {
            count,
            view_uniforms,
            view_buffer,
            xs,
            ys,
            categories,
            colors,
            uploads,
            view_layout,
            points_layout,
            view_group,
            points_group,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_count_checks_lengths() {
        assert_eq!(point_count(&[0.0; 3], &[1.0; 3], None).unwrap(), 3);
        assert_eq!(point_count(&[0.0; 3], &[1.0; 3], Some(&[0, 1, 2])).unwrap(), 3);
        assert!(matches!(
            point_count(&[0.0; 3], &[1.0; 2], None),
            Err(GpuError::InvalidConfig { .. })
        ));
        assert!(point_count(&[0.0; 2], &[1.0; 2], Some(&[0])).is_err());
        assert_eq!(point_count(&[], &[], None).unwrap(), 0);
    }

    #[test]
    fn test_empty_palette_falls_back() {
        assert_eq!(palette(&[]), &[DEFAULT_COLOR]);
        let colors = [[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0]];
        assert_eq!(palette(&colors).len(), 2);
    }
}
