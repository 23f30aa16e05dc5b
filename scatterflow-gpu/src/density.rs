//! Density field producer
//!
//! Two compute passes ahead of the downsample: `density_accumulate` counts
//! visible points per grid cell, `density_blur` smooths the counts with a 3x3
//! box filter into the `f32` field the cull pass samples. The blur also keeps
//! the field maximum in a small stats buffer.

use std::rc::Rc;

use scatterflow_core::{Dataflow, GraphResult, Node};

use crate::binder::{self, STORAGE_USAGE};
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::data::SceneResources;
use crate::downsample::dispatch::{dispatch_size, grid_dispatch};
use crate::error::GpuResult;

/// Side of the square workgroup in `density_blur`
pub const BLUR_TILE: u32 = 16;

/// Stats buffer: field maximum (fixed point), three reserved words
pub const DENSITY_STATS_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy)]
pub struct DensityResources {
    pub grid: Node<[u32; 2]>,
    pub counts: Node<wgpu::Buffer>,
    pub field: Node<wgpu::Buffer>,
    pub stats: Node<wgpu::Buffer>,
    /// Counts, field and stats, all writable (group 2 of the density passes)
    pub write_layout: Node<wgpu::BindGroupLayout>,
    pub write_group: Node<wgpu::BindGroup>,
    /// Field and stats, read-only at bindings 1 and 2 (group 2 of the
    /// downsample passes)
    pub read_layout: Node<wgpu::BindGroupLayout>,
    pub read_group: Node<wgpu::BindGroup>,
}

impl DensityResources {
    pub fn build(
        df: &mut Dataflow,
        ctx: Node<GpuContext>,
        config: Node<RendererConfig>,
    ) -> GraphResult<Self> {
        let grid = df.derive_eq("density grid", config, |config: Rc<RendererConfig>| {
            config.density_grid()
        })?;
        let field_size =
            binder::buffer_size(df, "density field size", grid, |grid: Rc<[u32; 2]>| {
                u64::from(grid[0]) * u64::from(grid[1]) * 4
            })?;
        let stats_size = binder::buffer_size(df, "density stats size", (), |_| DENSITY_STATS_SIZE)?;

        let counts = binder::gpu_buffer(df, "density counts", ctx, field_size, STORAGE_USAGE)?;
        let field = binder::gpu_buffer(df, "density field", ctx, field_size, STORAGE_USAGE)?;
        let stats = binder::gpu_buffer(df, "density stats", ctx, stats_size, STORAGE_USAGE)?;

        let compute = wgpu::ShaderStages::COMPUTE;
        let write_layout = binder::bind_group_layout(
            df,
            "density write layout",
            ctx,
            vec![
                binder::storage_entry(0, compute, false),
                binder::storage_entry(1, compute, false),
                binder::storage_entry(2, compute, false),
            ],
        )?;
        let write_group = binder::bind_group(
            df,
            "density write group",
            ctx,
            write_layout,
            vec![(0, counts), (1, field), (2, stats)],
        )?;
        let read_layout = binder::bind_group_layout(
            df,
            "density read layout",
            ctx,
            vec![
                binder::storage_entry(1, compute, true),
                binder::storage_entry(2, compute, true),
            ],
        )?;
        let read_group = binder::bind_group(
            df,
            "density read group",
            ctx,
            read_layout,
            vec![(1, field), (2, stats)],
        )?;

        Ok(Self {
            grid,
            counts,
            field,
            stats,
            write_layout,
            write_group,
            read_layout,
            read_group,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DensityPipelines {
    pub accumulate: Node<wgpu::ComputePipeline>,
    pub blur: Node<wgpu::ComputePipeline>,
}

impl DensityPipelines {
    pub fn build(
        df: &mut Dataflow,
        ctx: Node<GpuContext>,
        source: Node<String>,
        scene: &SceneResources,
        resources: &DensityResources,
    ) -> GraphResult<Self> {
        let module = binder::shader_module(df, "density shader", ctx, source)?;
        let layout = binder::pipeline_layout(
            df,
            "density pipeline layout",
            ctx,
            vec![scene.view_layout, scene.points_layout, resources.write_layout],
        )?;
        let mut pipeline = |label: &str, entry_point: &'static str| {
            binder::compute_pipeline(df, label, ctx, layout, module, entry_point)
        };
        Ok(Self {
            accumulate: pipeline("density accumulate", "density_accumulate")?,
            blur: pipeline("density blur", "density_blur")?,
        })
    }
}

pub struct DensityCommand {
    ctx: Rc<GpuContext>,
    count: u32,
    grid: [u32; 2],
    accumulate: Rc<wgpu::ComputePipeline>,
    blur: Rc<wgpu::ComputePipeline>,
    groups: [Rc<wgpu::BindGroup>; 3],
    counts: Rc<wgpu::Buffer>,
    stats: Rc<wgpu::Buffer>,
}

impl DensityCommand {
    pub fn build(
        df: &mut Dataflow,
        ctx: Node<GpuContext>,
        scene: &SceneResources,
        resources: &DensityResources,
        pipelines: &DensityPipelines,
    ) -> GraphResult<Node<Self>> {
        df.derive(
            "density command",
            (
                (ctx, scene.count, resources.grid),
                (pipelines.accumulate, pipelines.blur),
                (scene.view_group, scene.points_group, resources.write_group),
                (resources.counts, resources.stats),
            ),
            |(
                (ctx, count, grid),
                (accumulate, blur),
                (view, points, density),
                (counts, stats),
            )| Self {
                ctx,
                count: *count,
                grid: *grid,
                accumulate,
                blur,
                groups: [view, points, density],
                counts,
                stats,
            },
        )
    }

    /// Clear the counts and stats, then record both passes. Returns false
    /// without recording anything when there are no points.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder) -> GpuResult<bool> {
        if self.count == 0 {
            return Ok(false);
        }
        let max_dim = self.ctx.limits().max_compute_workgroups_per_dimension;
        let points = dispatch_size(self.count, max_dim)?;
        let cells = grid_dispatch(self.grid, BLUR_TILE);

        encoder.clear_buffer(&self.counts, 0, None);
        encoder.clear_buffer(&self.stats, 0, None);
        for (pipeline, workgroups, label) in [
            (&self.accumulate, points, "density accumulate pass"),
            (&self.blur, cells, "density blur pass"),
        ] {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            for (index, group) in self.groups.iter().enumerate() {
                pass.set_bind_group(index as u32, group, &[]);
            }
            pass.dispatch_workgroups(workgroups[0], workgroups[1], 1);
        }
        Ok(true)
    }
}
