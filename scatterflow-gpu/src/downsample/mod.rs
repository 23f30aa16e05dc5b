/*!
# Downsample Engine

Reduces the point set to at most `max_points` visible points per frame without
leaving the GPU. Three compute passes run in order over the same dispatch grid:

1. `downsample_viewport_cull` writes each point's density (or 0 when culled)
   into `point_data`. It counts visible points, tracks the maximum density and
   sums the acceptance weights `w = relative_density^(-weight / 10)`.
2. `downsample_density_sample` keeps every point while `visible <= limit`.
   Otherwise it keeps a point with probability `min(1, target * w / sum(w))`,
   drawn from a hash of `(frame_seed, index)`, and zeroes rejected points.
   `target` sits a few standard deviations below the limit
   ([`reference::sample_target`]).
3. `downsample_compact` appends accepted indices through one atomic counter.

Relative density is measured against the maximum of the blurred field, which
`density_blur` records before the cull pass runs. Index order after compaction
is arrival order and must not be relied on.
*/

pub mod dispatch;
pub mod reference;

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use scatterflow_core::{Dataflow, GraphResult, Node};

use crate::binder::{self, per_point_bytes, STORAGE_USAGE, UNIFORM_USAGE};
use crate::config::{DownsampleConfig, RendererConfig};
use crate::context::GpuContext;
use crate::data::SceneResources;
use crate::density::DensityResources;
use crate::error::GpuResult;

pub use dispatch::{dispatch_size, THREADS_PER_ROW, WORKGROUPS_X, WORKGROUP_SIZE};

/// Counter buffer: visible, max density (fixed point), selected, the weight
/// sum as a (lo, hi) pair, three reserved words
pub const COUNTERS_SIZE: u64 = 32;

pub const COUNTER_VISIBLE: usize = 0;
pub const COUNTER_MAX_DENSITY: usize = 1;
pub const COUNTER_SELECTED: usize = 2;
pub const COUNTER_WEIGHT_LO: usize = 3;
pub const COUNTER_WEIGHT_HI: usize = 4;

/// Per-frame parameters, layout of `DownsampleUniforms` in `downsample.wgsl`
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DownsampleUniforms {
    pub limit: u32,
    pub frame_seed: u32,
    pub density_weight: f32,
    pub _pad: f32,
}

/// What a call to [`DownsampleCommand::record`] put into the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleDispatch {
    /// Zero points or a zero cap: nothing recorded, no buffer touched.
    Skipped,
    Recorded {
        /// `min(count, max_points)`; the exact count stays on the GPU.
        upper_bound: u32,
        workgroups: [u32; 2],
    },
}

impl DownsampleDispatch {
    pub fn upper_bound(&self) -> u32 {
        match self {
            Self::Skipped => 0,
            Self::Recorded { upper_bound, .. } => *upper_bound,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Buffers and bind groups owned by the engine
#[derive(Debug, Clone, Copy)]
pub struct DownsampleResources {
    pub capacity: Node<u32>,
    pub uniforms: Node<wgpu::Buffer>,
    pub counters: Node<wgpu::Buffer>,
    pub point_data: Node<wgpu::Buffer>,
    pub indices: Node<wgpu::Buffer>,
    pub layout: Node<wgpu::BindGroupLayout>,
    pub group: Node<wgpu::BindGroup>,
    /// Read-only view of indices and counters for the indexed draw
    pub index_layout: Node<wgpu::BindGroupLayout>,
    pub index_group: Node<wgpu::BindGroup>,
}

impl DownsampleResources {
    pub fn build(
        df: &mut Dataflow,
        ctx: Node<GpuContext>,
        config: Node<RendererConfig>,
        scene: &SceneResources,
    ) -> GraphResult<Self> {
        let capacity = df.derive_eq("index capacity", config, |config: Rc<RendererConfig>| {
            config.index_capacity()
        })?;

        let uniform_size = binder::buffer_size(df, "downsample uniform size", (), |_| {
            std::mem::size_of::<DownsampleUniforms>() as u64
        })?;
        let counters_size = binder::buffer_size(df, "counters size", (), |_| COUNTERS_SIZE)?;
        let point_data_size =
            binder::buffer_size(df, "point data size", scene.count, |count: Rc<u32>| {
                per_point_bytes(*count)
            })?;
        let index_size =
            binder::buffer_size(df, "index buffer size", capacity, |capacity: Rc<u32>| {
                per_point_bytes(*capacity)
            })?;

        let uniforms =
            binder::gpu_buffer(df, "downsample uniforms", ctx, uniform_size, UNIFORM_USAGE)?;
        let counters =
            binder::gpu_buffer(df, "downsample counters", ctx, counters_size, STORAGE_USAGE)?;
        let point_data =
            binder::gpu_buffer(df, "point data", ctx, point_data_size, STORAGE_USAGE)?;
        let indices = binder::gpu_buffer(df, "selected indices", ctx, index_size, STORAGE_USAGE)?;

        let compute = wgpu::ShaderStages::COMPUTE;
        let layout = binder::bind_group_layout(
            df,
            "downsample layout",
            ctx,
            vec![
                binder::uniform_entry(0, compute),
                binder::storage_entry(1, compute, false),
                binder::storage_entry(2, compute, false),
                binder::storage_entry(3, compute, false),
            ],
        )?;
        let group = binder::bind_group(
            df,
            "downsample group",
            ctx,
            layout,
            vec![(0, uniforms), (1, counters), (2, point_data), (3, indices)],
        )?;

        let vertex = wgpu::ShaderStages::VERTEX;
        let index_layout = binder::bind_group_layout(
            df,
            "draw index layout",
            ctx,
            vec![
                binder::storage_entry(0, vertex, true),
                binder::storage_entry(1, vertex, true),
            ],
        )?;
        let index_group = binder::bind_group(
            df,
            "draw index group",
            ctx,
            index_layout,
            vec![(0, indices), (1, counters)],
        )?;

        Ok(Self {
            capacity,
            uniforms,
            counters,
            point_data,
            indices,
            layout,
            group,
            index_layout,
            index_group,
        })
    }
}

/// One compute pipeline per pass, sharing a layout
#[derive(Debug, Clone, Copy)]
pub struct DownsamplePipelines {
    pub cull: Node<wgpu::ComputePipeline>,
    pub sample: Node<wgpu::ComputePipeline>,
    pub compact: Node<wgpu::ComputePipeline>,
}

impl DownsamplePipelines {
    pub fn build(
        df: &mut Dataflow,
        ctx: Node<GpuContext>,
        source: Node<String>,
        scene: &SceneResources,
        density: &DensityResources,
        resources: &DownsampleResources,
    ) -> GraphResult<Self> {
        let module = binder::shader_module(df, "downsample shader", ctx, source)?;
        let layout = binder::pipeline_layout(
            df,
            "downsample pipeline layout",
            ctx,
            vec![
                scene.view_layout,
                scene.points_layout,
                density.read_layout,
                resources.layout,
            ],
        )?;
        let mut pipeline = |label: &str, entry_point: &'static str| {
            binder::compute_pipeline(df, label, ctx, layout, module, entry_point)
        };
        Ok(Self {
            cull: pipeline("viewport cull", "downsample_viewport_cull")?,
            sample: pipeline("density sample", "downsample_density_sample")?,
            compact: pipeline("compact", "downsample_compact")?,
        })
    }
}

/// Everything needed to record one frame's downsample, resolved from the
/// graph. Re-read from the graph every frame so replaced resources are picked up.
pub struct DownsampleCommand {
    ctx: Rc<GpuContext>,
    count: u32,
    capacity: u32,
    pipelines: [Rc<wgpu::ComputePipeline>; 3],
    groups: [Rc<wgpu::BindGroup>; 4],
    uniforms: Rc<wgpu::Buffer>,
    counters: Rc<wgpu::Buffer>,
}

impl DownsampleCommand {
    pub fn build(
        df: &mut Dataflow,
        ctx: Node<GpuContext>,
        scene: &SceneResources,
        density: &DensityResources,
        resources: &DownsampleResources,
        pipelines: &DownsamplePipelines,
    ) -> GraphResult<Node<Self>> {
        df.derive(
            "downsample command",
            (
                (ctx, scene.count, resources.capacity),
                (pipelines.cull, pipelines.sample, pipelines.compact),
                (scene.view_group, scene.points_group, density.read_group, resources.group),
                (resources.uniforms, resources.counters),
            ),
            |(
                (ctx, count, capacity),
                (cull, sample, compact),
                (view, points, field, group),
                (uniforms, counters),
            )| Self {
                ctx,
                count: *count,
                capacity: *capacity,
                pipelines: [cull, sample, compact],
                groups: [view, points, field, group],
                uniforms,
                counters,
            },
        )
    }

    /// Record the three passes into `encoder`. Zero points or a zero cap
    /// records nothing and leaves every buffer as it was.
    pub fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        config: &DownsampleConfig,
    ) -> GpuResult<DownsampleDispatch> {
        if self.count == 0 || config.max_points == 0 {
            log::trace!(
                "downsample skipped ({} points, cap {})",
                self.count,
                config.max_points
            );
            return Ok(DownsampleDispatch::Skipped);
        }

        let max_dim = self.ctx.limits().max_compute_workgroups_per_dimension;
        let workgroups = dispatch_size(self.count, max_dim)?;
        let params = DownsampleUniforms {
            limit: config.max_points.min(self.capacity),
            frame_seed: config.frame_seed,
            density_weight: config.density_weight,
            _pad: 0.0,
        };
        self.ctx
            .queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&params));
        encoder.clear_buffer(&self.counters, 0, None);

        // Separate passes: each one reads what the previous one wrote.
        let labels = [
            "downsample cull pass",
            "downsample sample pass",
            "downsample compact pass",
        ];
        for (pipeline, label) in self.pipelines.iter().zip(labels) {
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

        let upper_bound = self.count.min(config.max_points);
        log::trace!(
            "downsample recorded: {} points, limit {}, grid {:?}",
            self.count,
            params.limit,
            workgroups
        );
        Ok(DownsampleDispatch::Recorded {
            upper_bound,
            workgroups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<DownsampleUniforms>(), 16);
        let u = DownsampleUniforms {
            limit: 7,
            frame_seed: 9,
            density_weight: 2.5,
            _pad: 0.0,
        };
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&u));
        assert_eq!(words[0], 7);
        assert_eq!(words[1], 9);
        assert_eq!(f32::from_bits(words[2]), 2.5);
    }

    #[test]
    fn test_dispatch_report() {
        assert_eq!(DownsampleDispatch::Skipped.upper_bound(), 0);
        assert!(DownsampleDispatch::Skipped.is_skipped());
        let recorded = DownsampleDispatch::Recorded {
            upper_bound: 10,
            workgroups: [1, 1],
        };
        assert_eq!(recorded.upper_bound(), 10);
        assert!(!recorded.is_skipped());
    }
}
