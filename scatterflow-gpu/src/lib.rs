/*!
# ScatterFlow GPU Pipeline

Interactive rendering of very large 2D point clouds. Every GPU resource is a
node in a [`scatterflow_core::Dataflow`] graph, so buffers, bind groups and
pipelines are rebuilt only when the inputs that determine them change.

## Frame

1. **Density field**: per-cell point counts, blurred into an `f32` grid
2. **Downsample**: viewport cull, density-weighted probabilistic accept,
   atomic stream compaction into a bounded index buffer
3. **Draw**: instanced quads, indexed by the selection or direct over every
   point, accumulated additively into color and coverage targets

Nothing is read back during a frame; the accepted count stays on the GPU and
the host only sees an upper bound.
*/

pub mod binder;
pub mod config;
pub mod context;
pub mod data;
pub mod density;
pub mod downsample;
pub mod draw;
pub mod error;
pub mod readback;
pub mod renderer;
pub mod shaders;
pub mod viewport;

pub use config::{DownsampleConfig, RendererConfig, DEFAULT_DENSITY_WEIGHT, DEFAULT_MAX_POINTS};
pub use context::GpuContext;
pub use downsample::reference::{density_field, downsample_cpu, CpuDownsample, DensityGrid};
pub use downsample::{dispatch_size, DownsampleCommand, DownsampleDispatch, THREADS_PER_ROW};
pub use draw::{AccumulationTargets, DrawPointsCommand, DrawPointsIndexedCommand};
pub use error::{GpuError, GpuResult};
pub use readback::CounterSnapshot;
pub use renderer::{DrawMode, FrameReport, PointRenderer};
pub use viewport::{Rect, ViewUniforms, ViewportState};
