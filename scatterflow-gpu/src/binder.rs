/*!
# Resource Binder

Helpers that express GPU resources as graph nodes. Every buffer gets its byte
size from a separate equality-cutoff node, so a change to the inputs of the size
formula only reallocates when the computed size actually moves. Layouts, bind
groups, shader modules and pipelines are stateful nodes whose dependencies are
exactly the handles they bind.
*/

use std::borrow::Cow;
use std::rc::Rc;

use scatterflow_core::{Dataflow, GraphResult, Inputs, Node};

use crate::context::GpuContext;

/// Usage of per-point storage arrays: written by the host or by compute passes,
/// readable back for inspection.
pub const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_DST)
    .union(wgpu::BufferUsages::COPY_SRC);

pub const UNIFORM_USAGE: wgpu::BufferUsages =
    wgpu::BufferUsages::UNIFORM.union(wgpu::BufferUsages::COPY_DST);

/// Byte size of a per-point array of 4-byte elements. Never zero, since
/// zero-sized bindings are invalid.
pub fn per_point_bytes(count: u32) -> u64 {
    (u64::from(count) * 4).max(4)
}

/// Size node with equality cutoff.
pub fn buffer_size<D, F>(
    df: &mut Dataflow,
    label: impl Into<String>,
    deps: D,
    f: F,
) -> GraphResult<Node<u64>>
where
    D: Inputs + 'static,
    F: FnMut(D::Values) -> u64 + 'static,
{
    df.derive_eq(label, deps, f)
}

/// Buffer reallocated whenever the context or its size node changes.
pub fn gpu_buffer(
    df: &mut Dataflow,
    label: &str,
    ctx: Node<GpuContext>,
    size: Node<u64>,
    usage: wgpu::BufferUsages,
) -> GraphResult<Node<wgpu::Buffer>> {
    let name = label.to_string();
    df.stateful_derive(label, (ctx, size), move |(ctx, size)| {
        Ok(ctx.create_buffer(&name, *size, usage)?)
    })
}

pub fn storage_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    read_only: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn bind_group_layout(
    df: &mut Dataflow,
    label: &str,
    ctx: Node<GpuContext>,
    entries: Vec<wgpu::BindGroupLayoutEntry>,
) -> GraphResult<Node<wgpu::BindGroupLayout>> {
    let name = label.to_string();
    df.stateful_derive(label, ctx, move |ctx: Rc<GpuContext>| {
        Ok(ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(name.as_str()),
                entries: &entries,
            }))
    })
}

/// Bind group over whole buffers. Rebuilt whenever the layout or any bound
/// buffer is replaced.
pub fn bind_group(
    df: &mut Dataflow,
    label: &str,
    ctx: Node<GpuContext>,
    layout: Node<wgpu::BindGroupLayout>,
    bindings: Vec<(u32, Node<wgpu::Buffer>)>,
) -> GraphResult<Node<wgpu::BindGroup>> {
    let name = label.to_string();
    let slots: Vec<u32> = bindings.iter().map(|(slot, _)| *slot).collect();
    let buffers: Vec<Node<wgpu::Buffer>> = bindings.into_iter().map(|(_, node)| node).collect();

    df.stateful_derive(label, (ctx, layout, buffers), move |(ctx, layout, buffers)| {
        let entries: Vec<wgpu::BindGroupEntry> = slots
            .iter()
            .zip(buffers.iter())
            .map(|(slot, buffer)| wgpu::BindGroupEntry {
                binding: *slot,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        Ok(ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(name.as_str()),
            layout: &*layout,
            entries: &entries,
        }))
    })
}

pub fn shader_module(
    df: &mut Dataflow,
    label: &str,
    ctx: Node<GpuContext>,
    source: Node<String>,
) -> GraphResult<Node<wgpu::ShaderModule>> {
    let name = label.to_string();
    df.stateful_derive(label, (ctx, source), move |(ctx, source)| {
        Ok(ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name.as_str()),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.as_str().to_owned())),
        }))
    })
}

pub fn pipeline_layout(
    df: &mut Dataflow,
    label: &str,
    ctx: Node<GpuContext>,
    groups: Vec<Node<wgpu::BindGroupLayout>>,
) -> GraphResult<Node<wgpu::PipelineLayout>> {
    let name = label.to_string();
    df.stateful_derive(label, (ctx, groups), move |(ctx, groups)| {
        let layouts: Vec<&wgpu::BindGroupLayout> = groups.iter().map(|g| g.as_ref()).collect();
        Ok(ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(name.as_str()),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            }))
    })
}

pub fn compute_pipeline(
    df: &mut Dataflow,
    label: &str,
    ctx: Node<GpuContext>,
    layout: Node<wgpu::PipelineLayout>,
    module: Node<wgpu::ShaderModule>,
    entry_point: &'static str,
) -> GraphResult<Node<wgpu::ComputePipeline>> {
    let name = label.to_string();
    df.stateful_derive(label, (ctx, layout, module), move |(ctx, layout, module)| {
        Ok(ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name.as_str()),
                layout: Some(&*layout),
                module: &*module,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }))
    })
}
