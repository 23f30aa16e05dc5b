/*!
# GPU Context

Device and queue handles shared by every node in the graph, plus checked
allocation helpers that turn device-limit violations into [`GpuError`]s before
wgpu would raise a validation error.
*/

use std::sync::Arc;

use crate::error::{GpuError, GpuResult};

#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: wgpu::AdapterInfo,
}

fn require_adapter(adapter: Option<wgpu::Adapter>) -> GpuResult<wgpu::Adapter> {
    adapter.ok_or_else(|| {
        log::warn!("no GPU adapter available");
        GpuError::NoAdapter
    })
}

impl GpuContext {
    /// Request a headless high-performance adapter and its device. Fails with
    /// [`GpuError::NoAdapter`] when the machine has no usable adapter.
    pub async fn new() -> GpuResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = require_adapter(
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await,
        )?;

        let adapter_info = adapter.get_info();
        log::info!(
            "using GPU adapter {} ({:?}, {:?})",
            adapter_info.name,
            adapter_info.device_type,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("ScatterFlow Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| GpuError::RequestDevice {
                message: e.to_string(),
            })?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
        })
    }

    /// Blocking variant of [`GpuContext::new`].
    pub fn new_blocking() -> GpuResult<Self> {
        pollster::block_on(Self::new())
    }

    /// Wrap handles owned by the host.
    pub fn from_parts(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        adapter_info: wgpu::AdapterInfo,
    ) -> Self {
        Self {
            device,
            queue,
            adapter_info,
        }
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    pub fn device_info(&self) -> String {
        format!("{} ({:?})", self.adapter_info.name, self.adapter_info.device_type)
    }

    /// Largest size a buffer with `usage` may have on this device.
    pub fn buffer_limit(&self, usage: wgpu::BufferUsages) -> u64 {
        let limits = self.limits();
        let mut limit = limits.max_buffer_size;
        if usage.contains(wgpu::BufferUsages::STORAGE) {
            limit = limit.min(u64::from(limits.max_storage_buffer_binding_size));
        }
        if usage.contains(wgpu::BufferUsages::UNIFORM) {
            limit = limit.min(u64::from(limits.max_uniform_buffer_binding_size));
        }
        limit
    }

    /// Create a buffer, failing synchronously instead of producing an invalid
    /// handle when the size exceeds device limits or memory runs out.
    pub fn create_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> GpuResult<wgpu::Buffer> {
        let limit = self.buffer_limit(usage);
        if size > limit {
            return Err(GpuError::ResourceAllocation {
                label: label.to_string(),
                requested: size,
                limit,
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            buffer.destroy();
            return Err(GpuError::OutOfMemory {
                label: label.to_string(),
                message: error.to_string(),
            });
        }

        log::debug!("allocated buffer '{}' ({} bytes)", label, size);
        Ok(buffer)
    }

    /// Create a 2D render-target texture within device limits.
    pub fn create_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> GpuResult<wgpu::Texture> {
        let limit = self.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(GpuError::ResourceAllocation {
                label: label.to_string(),
                requested: u64::from(width.max(height)),
                limit: u64::from(limit),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            texture.destroy();
            return Err(GpuError::OutOfMemory {
                label: label.to_string(),
                message: error.to_string(),
            });
        }

        log::debug!("allocated texture '{}' ({}x{} {:?})", label, width, height, format);
        Ok(texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_adapter_is_an_error() {
        assert!(matches!(require_adapter(None), Err(GpuError::NoAdapter)));
        assert_eq!(GpuError::NoAdapter.to_string(), "no compatible GPU adapter found");
    }
}
