/*!
# Draw Command Builder

Instanced quads, one instance per point, expanded from a 4-vertex triangle
strip in the vertex stage. Both modes render into the same pair of targets:
premultiplied color and coverage, with additive blending so overlapping points
accumulate.

- Direct: one instance per input point.
- Indexed: one instance per slot of the selected-index buffer. The host only
  knows an upper bound, so the vertex stage reads the GPU-side selected
  counter and collapses instances past it.
*/

use std::rc::Rc;

use scatterflow_core::{Dataflow, GraphResult, Node};

use crate::binder;
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::data::SceneResources;
use crate::downsample::DownsampleResources;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const ALPHA_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;

/// Vertices per instanced quad
const QUAD_VERTICES: u32 = 4;

const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Color and coverage render targets, resized with the render target config
#[derive(Debug, Clone, Copy)]
pub struct AccumulationTargets {
    pub size: Node<[u32; 2]>,
    pub color: Node<wgpu::Texture>,
    pub alpha: Node<wgpu::Texture>,
    pub color_view: Node<wgpu::TextureView>,
    pub alpha_view: Node<wgpu::TextureView>,
}

impl AccumulationTargets {
    pub fn build(
        df: &mut Dataflow,
        ctx: Node<GpuContext>,
        config: Node<RendererConfig>,
    ) -> GraphResult<Self> {
        let size = df.derive_eq("target size", config, |config: Rc<RendererConfig>| {
            [config.width, config.height]
        })?;
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;

        let color = df.stateful_derive("color target", (ctx, size), move |(ctx, size)| {
            Ok(ctx.create_texture("color target", size[0], size[1], COLOR_FORMAT, usage)?)
        })?;
        let alpha = df.stateful_derive("alpha target", (ctx, size), move |(ctx, size)| {
            Ok(ctx.create_texture("alpha target", size[0], size[1], ALPHA_FORMAT, usage)?)
        })?;
        let view_of = |texture: Rc<wgpu::Texture>| {
            Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
        };
        let color_view = df.stateful_derive("color target view", color, view_of)?;
        let alpha_view = df.stateful_derive("alpha target view", alpha, view_of)?;

        Ok(Self {
            size,
            color,
            alpha,
            color_view,
            alpha_view,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DrawPipelines {
    pub direct: Node<wgpu::RenderPipeline>,
    pub indexed: Node<wgpu::RenderPipeline>,
}

impl DrawPipelines {
    pub fn build(
        df: &mut Dataflow,
        ctx: Node<GpuContext>,
        source: Node<String>,
        scene: &SceneResources,
        downsample: &DownsampleResources,
    ) -> GraphResult<Self> {
        let module = binder::shader_module(df, "points shader", ctx, source)?;
        let direct_layout = binder::pipeline_layout(
            df,
            "direct draw layout",
            ctx,
            vec![scene.view_layout, scene.points_layout],
        )?;
        let indexed_layout = binder::pipeline_layout(
            df,
            "indexed draw layout",
            ctx,
            vec![scene.view_layout, scene.points_layout, downsample.index_layout],
        )?;
        let direct = render_pipeline(df, "direct points", ctx, direct_layout, module, "points_vs")?;
        let indexed = render_pipeline(
            df,
            "indexed points",
            ctx,
            indexed_layout,
            module,
            "points_indexed_vs",
        )?;
        Ok(Self { direct, indexed })
    }
}

fn render_pipeline(
    df: &mut Dataflow,
    label: &str,
    ctx: Node<GpuContext>,
    layout: Node<wgpu::PipelineLayout>,
    module: Node<wgpu::ShaderModule>,
    vertex_entry: &'static str,
) -> GraphResult<Node<wgpu::RenderPipeline>> {
    let name = label.to_string();
    df.stateful_derive(label, (ctx, layout, module), move |(ctx, layout, module)| {
        Ok(ctx
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(name.as_str()),
                layout: Some(&*layout),
                vertex: wgpu::VertexState {
                    module: &*module,
                    entry_point: vertex_entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &*module,
                    entry_point: "points_fs",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[
                        Some(wgpu::ColorTargetState {
                            format: COLOR_FORMAT,
                            blend: Some(ADDITIVE),
                            write_mask: wgpu::ColorWrites::ALL,
                        }),
                        Some(wgpu::ColorTargetState {
                            format: ALPHA_FORMAT,
                            blend: Some(ADDITIVE),
                            write_mask: wgpu::ColorWrites::ALL,
                        }),
                    ],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            }))
    })
}

fn begin_accumulation<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &'static str,
    color: &'e wgpu::TextureView,
    alpha: &'e wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    let attachment = |view: &'e wgpu::TextureView| {
        Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
        })
    };
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[attachment(color), attachment(alpha)],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

/// Draws every point
pub struct DrawPointsCommand {
    count: u32,
    pipeline: Rc<wgpu::RenderPipeline>,
    groups: [Rc<wgpu::BindGroup>; 2],
    color: Rc<wgpu::TextureView>,
    alpha: Rc<wgpu::TextureView>,
}

impl DrawPointsCommand {
    pub fn build(
        df: &mut Dataflow,
        scene: &SceneResources,
        targets: &AccumulationTargets,
        pipelines: &DrawPipelines,
    ) -> GraphResult<Node<Self>> {
        df.derive(
            "draw points command",
            (
                scene.count,
                pipelines.direct,
                (scene.view_group, scene.points_group),
                (targets.color_view, targets.alpha_view),
            ),
            |(count, pipeline, (view, points), (color, alpha))| Self {
                count: *count,
                pipeline,
                groups: [view, points],
                color,
                alpha,
            },
        )
    }

    /// Clear the targets and draw all points. Returns the instance count.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder) -> u32 {
        let mut pass = begin_accumulation(encoder, "draw points pass", &self.color, &self.alpha);
        if self.count > 0 {
            pass.set_pipeline(&self.pipeline);
            for (index, group) in self.groups.iter().enumerate() {
                pass.set_bind_group(index as u32, group, &[]);
            }
            pass.draw(0..QUAD_VERTICES, 0..self.count);
        }
        self.count
    }
}

/// Draws the points selected by the downsample engine
pub struct DrawPointsIndexedCommand {
    capacity: u32,
    pipeline: Rc<wgpu::RenderPipeline>,
    groups: [Rc<wgpu::BindGroup>; 3],
    color: Rc<wgpu::TextureView>,
    alpha: Rc<wgpu::TextureView>,
}

impl DrawPointsIndexedCommand {
    pub fn build(
        df: &mut Dataflow,
        scene: &SceneResources,
        downsample: &DownsampleResources,
        targets: &AccumulationTargets,
        pipelines: &DrawPipelines,
    ) -> GraphResult<Node<Self>> {
        df.derive(
            "draw indexed points command",
            (
                downsample.capacity,
                pipelines.indexed,
                (scene.view_group, scene.points_group, downsample.index_group),
                (targets.color_view, targets.alpha_view),
            ),
            |(capacity, pipeline, (view, points, indices), (color, alpha))| Self {
                capacity: *capacity,
                pipeline,
                groups: [view, points, indices],
                color,
                alpha,
            },
        )
    }

    /// Clear the targets and draw up to `upper_bound` selected points.
    /// Returns the instance count issued.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, upper_bound: u32) -> u32 {
        let instances = upper_bound.min(self.capacity);
        let mut pass =
            begin_accumulation(encoder, "draw indexed points pass", &self.color, &self.alpha);
        if instances > 0 {
            pass.set_pipeline(&self.pipeline);
            for (index, group) in self.groups.iter().enumerate() {
                pass.set_bind_group(index as u32, group, &[]);
            }
            pass.draw(0..QUAD_VERTICES, 0..instances);
        }
        instances
    }
}
