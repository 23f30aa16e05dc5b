//! Resource capability trait for stateful nodes
//!
//! A stateful node owns exactly one resource instance at a time. The graph
//! calls [`Resource::release`] on the previous instance immediately before the
//! replacement is installed, and on the final instance when the graph is torn
//! down. Derivation closures never release anything themselves.

/// An externally owned resource with an explicit destroy operation.
pub trait Resource: 'static {
    /// Free the underlying resource. Called at most once per instance.
    fn release(&self);
}

#[cfg(feature = "wgpu")]
mod gpu {
    use super::Resource;

    impl Resource for wgpu::Buffer {
        fn release(&self) {
            self.destroy();
        }
    }

    impl Resource for wgpu::Texture {
        fn release(&self) {
            self.destroy();
        }
    }

    // Handles without an explicit destroy are freed when the last reference
    // drops; the node still owns them exclusively.
    macro_rules! drop_released {
        ($($ty:ty),+ $(,)?) => {
            $(impl Resource for $ty {
                fn release(&self) {}
            })+
        };
    }

    drop_released!(
        wgpu::BindGroup,
        wgpu::BindGroupLayout,
        wgpu::PipelineLayout,
        wgpu::ComputePipeline,
        wgpu::RenderPipeline,
        wgpu::ShaderModule,
        wgpu::Sampler,
        wgpu::TextureView,
    );
}
