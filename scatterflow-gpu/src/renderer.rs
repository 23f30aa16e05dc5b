/*!
# Point Renderer

Owns the dataflow graph and wires every stage into it. The host sets inputs
between frames and calls [`PointRenderer::render`] once per frame with an
encoder it submits itself. Per frame, in order:

1. pending uploads are flushed through the queue,
2. the density field is rebuilt (downsampling only),
3. the downsample passes run when a cap is configured,
4. points are drawn indexed (downsampled) or direct.

Only one frame may be recorded per queue submission, since the downsample
uniforms are written through the queue.
*/

use std::rc::Rc;

use anyhow::Result;
use scatterflow_core::{Dataflow, Node};

use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::data::{SceneInputs, SceneResources};
use crate::density::{DensityCommand, DensityPipelines, DensityResources};
use crate::downsample::{
    DownsampleCommand, DownsampleDispatch, DownsamplePipelines, DownsampleResources,
};
use crate::draw::{
    AccumulationTargets, DrawPipelines, DrawPointsCommand, DrawPointsIndexedCommand,
};
use crate::readback::{self, CounterSnapshot};
use crate::shaders;
use crate::viewport::ViewportState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    Direct,
    Indexed,
}

/// Summary of one recorded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub mode: DrawMode,
    /// Upper bound of points drawn; exact in direct mode.
    pub upper_bound: u32,
    pub dispatch: DownsampleDispatch,
    /// Instances issued by the draw call
    pub instances: u32,
}

pub struct PointRenderer {
    graph: Dataflow,
    inputs: SceneInputs,
    scene: SceneResources,
    downsample: DownsampleResources,
    targets: AccumulationTargets,
    density_command: Node<DensityCommand>,
    downsample_command: Node<DownsampleCommand>,
    draw_points: Node<DrawPointsCommand>,
    draw_indexed: Node<DrawPointsIndexedCommand>,
}

impl PointRenderer {
    pub fn new(ctx: GpuContext, config: RendererConfig) -> Result<Self> {
        config.validate()?;
        log::info!(
            "creating point renderer on {} ({}x{})",
            ctx.device_info(),
            config.width,
            config.height
        );

        let mut graph = Dataflow::new();
        let inputs = SceneInputs::new(&mut graph, ctx, config);
        let ctx = inputs.ctx;

        let mut source = |label: &str, stage: &str| graph.value(label, shaders::assemble(stage));
        let density_source = source("density source", shaders::DENSITY);
        let downsample_source = source("downsample source", shaders::DOWNSAMPLE);
        let points_source = source("points source", shaders::POINTS);

        let scene = SceneResources::build(&mut graph, &inputs)?;

        let density = DensityResources::build(&mut graph, ctx, inputs.config)?;
        let density_pipelines =
            DensityPipelines::build(&mut graph, ctx, density_source, &scene, &density)?;
        let density_command =
            DensityCommand::build(&mut graph, ctx, &scene, &density, &density_pipelines)?;

        let downsample = DownsampleResources::build(&mut graph, ctx, inputs.config, &scene)?;
        let downsample_pipelines = DownsamplePipelines::build(
            &mut graph,
            ctx,
            downsample_source,
            &scene,
            &density,
            &downsample,
        )?;
        let downsample_command = DownsampleCommand::build(
            &mut graph,
            ctx,
            &scene,
            &density,
            &downsample,
            &downsample_pipelines,
        )?;

        let targets = AccumulationTargets::build(&mut graph, ctx, inputs.config)?;
        let draw_pipelines =
            DrawPipelines::build(&mut graph, ctx, points_source, &scene, &downsample)?;
        let draw_points = DrawPointsCommand::build(&mut graph, &scene, &targets, &draw_pipelines)?;
        let draw_indexed = DrawPointsIndexedCommand::build(
            &mut graph,
            &scene,
            &downsample,
            &targets,
            &draw_pipelines,
        )?;

        log::debug!("renderer graph has {} nodes", graph.len());

        Ok(Self {
            graph,
            inputs,
            scene,
            downsample,
            targets,
            density_command,
            downsample_command,
            draw_points,
            draw_indexed,
        })
    }

    /// Replace the point coordinates. Both arrays must have the same length,
    /// which is checked when the next frame resolves the point count.
    pub fn set_points(&mut self, xs: Vec<f32>, ys: Vec<f32>) -> Result<()> {
        self.graph.set(self.inputs.xs, xs)?;
        self.graph.set(self.inputs.ys, ys)?;
        Ok(())
    }

    pub fn set_categories(&mut self, categories: Option<Vec<u32>>) -> Result<()> {
        self.graph.set(self.inputs.categories, categories)?;
        Ok(())
    }

    pub fn set_category_colors(&mut self, colors: Vec<[f32; 4]>) -> Result<()> {
        self.graph.set_if_changed(self.inputs.colors, colors)?;
        Ok(())
    }

    /// Returns whether the viewport actually moved.
    pub fn set_viewport(&mut self, viewport: ViewportState) -> Result<bool> {
        Ok(self.graph.set_if_changed(self.inputs.viewport, viewport)?)
    }

    pub fn set_config(&mut self, config: RendererConfig) -> Result<()> {
        config.validate()?;
        self.graph.set_if_changed(self.inputs.config, config)?;
        Ok(())
    }

    pub fn config(&mut self) -> Result<Rc<RendererConfig>> {
        Ok(self.graph.get(self.inputs.config)?)
    }

    pub fn point_count(&mut self) -> Result<u32> {
        Ok(*self.graph.get(self.scene.count)?)
    }

    /// Record one frame into `encoder`. Nothing is submitted.
    pub fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        frame_seed: u32,
    ) -> Result<FrameReport> {
        let config = self.graph.get(self.inputs.config)?;
        self.graph.get(self.scene.uploads)?;

        let report = match config.downsample_config(frame_seed)? {
            Some(frame) => {
                if frame.max_points > 0 {
                    self.graph.get(self.density_command)?.record(encoder)?;
                }
                let dispatch = self.graph.get(self.downsample_command)?.record(encoder, &frame)?;
                let instances = self
                    .graph
                    .get(self.draw_indexed)?
                    .record(encoder, dispatch.upper_bound());
                FrameReport {
                    mode: DrawMode::Indexed,
                    upper_bound: dispatch.upper_bound(),
                    dispatch,
                    instances,
                }
            }
            None => {
                let instances = self.graph.get(self.draw_points)?.record(encoder);
                FrameReport {
                    mode: DrawMode::Direct,
                    upper_bound: instances,
                    dispatch: DownsampleDispatch::Skipped,
                    instances,
                }
            }
        };

        log::trace!("frame recorded: {:?}", report);
        Ok(report)
    }

    /// Color and coverage targets of the last frame.
    pub fn accumulation_targets(&mut self) -> Result<(Rc<wgpu::Texture>, Rc<wgpu::Texture>)> {
        let color = self.graph.get(self.targets.color)?;
        let alpha = self.graph.get(self.targets.alpha)?;
        Ok((color, alpha))
    }

    pub fn graph(&self) -> &Dataflow {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Dataflow {
        &mut self.graph
    }

    pub fn scene(&self) -> &SceneResources {
        &self.scene
    }

    pub fn downsample_resources(&self) -> &DownsampleResources {
        &self.downsample
    }

    pub fn read_counters(&mut self) -> Result<CounterSnapshot> {
        let ctx = self.graph.get(self.inputs.ctx)?;
        let counters = self.graph.get(self.downsample.counters)?;
        Ok(readback::read_counters(&ctx, &counters)?)
    }

    /// Selected indices of the last downsampled frame, in arrival order.
    pub fn read_selected_indices(&mut self) -> Result<Vec<u32>> {
        let ctx = self.graph.get(self.inputs.ctx)?;
        let indices = self.graph.get(self.downsample.indices)?;
        let counters = self.graph.get(self.downsample.counters)?;
        Ok(readback::read_selected_indices(&ctx, &indices, &counters)?)
    }

    pub fn read_point_data(&mut self) -> Result<Vec<f32>> {
        let ctx = self.graph.get(self.inputs.ctx)?;
        let count = *self.graph.get(self.scene.count)?;
        let point_data = self.graph.get(self.downsample.point_data)?;
        Ok(readback::read_point_data(&ctx, &point_data, count)?)
    }
}
