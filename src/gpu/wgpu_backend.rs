//! [`GpuBackend`] over a wgpu device and queue.

use std::ops::Range;

use crate::errors::{Result, SigilError};
use crate::gpu::backend::{BindGroupEntry, BindGroupResource, BufferDesc, GpuBackend, TextureDesc};
use crate::resources::TextureSampler;

/// Texture plus the default view bound in bind groups.
#[derive(Debug, Clone)]
pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// wgpu reports most validation failures asynchronously, so the limits
/// that can be checked on the host are checked before each call.
#[derive(Debug, Clone)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
}

impl WgpuBackend {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let limits = device.limits();
        Self { device, queue, limits }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn upload_texture(&self, texture: &wgpu::Texture, desc: &TextureDesc<'_>) {
        let Some(data) = desc.data else {
            return;
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.bytes_per_row),
                rows_per_image: Some(desc.size.height),
            },
            desc.size,
        );
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Texture = WgpuTexture;
    type Sampler = wgpu::Sampler;
    type BindGroupLayout = wgpu::BindGroupLayout;
    type BindGroup = wgpu::BindGroup;
    type PipelineLayout = wgpu::PipelineLayout;
    type RenderPipeline = wgpu::RenderPipeline;
    type ComputePipeline = wgpu::ComputePipeline;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer> {
        if desc.size == 0 || desc.size > self.limits.max_buffer_size {
            return Err(SigilError::ResourceCreation(format!(
                "buffer {:?}: size {} outside 1..={}",
                desc.label, desc.size, self.limits.max_buffer_size
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label,
            size: desc.size,
            usage: desc.usage,
            mapped_at_creation: false,
        });
        if let Some(contents) = desc.contents {
            self.queue.write_buffer(&buffer, 0, contents);
        }
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        buffer.destroy();
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<Self::Texture> {
        let max = match desc.dimension {
            wgpu::TextureDimension::D1 => self.limits.max_texture_dimension_1d,
            wgpu::TextureDimension::D2 => self.limits.max_texture_dimension_2d,
            wgpu::TextureDimension::D3 => self.limits.max_texture_dimension_3d,
        };
        if desc.size.width == 0 || desc.size.height == 0 || desc.size.width > max || desc.size.height > max {
            return Err(SigilError::ResourceCreation(format!(
                "texture {:?}: extent {}x{} outside 1..={max}",
                desc.label, desc.size.width, desc.size.height
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label,
            size: desc.size,
            mip_level_count: desc.mip_level_count,
            sample_count: 1,
            dimension: desc.dimension,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        });
        self.upload_texture(&texture, desc);

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label,
            dimension: Some(desc.view_dimension),
            ..Default::default()
        });
        Ok(WgpuTexture { texture, view })
    }

    fn write_texture(&self, texture: &Self::Texture, desc: &TextureDesc<'_>) {
        self.upload_texture(&texture.texture, desc);
    }

    fn destroy_texture(&self, texture: Self::Texture) {
        texture.texture.destroy();
    }

    fn create_sampler(&self, label: Option<&str>, sampler: &TextureSampler) -> Result<Self::Sampler> {
        Ok(self.device.create_sampler(&sampler.descriptor(label)))
    }

    fn create_bind_group_layout(
        &self,
        label: Option<&str>,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<Self::BindGroupLayout> {
        if entries.len() as u64 > u64::from(self.limits.max_bindings_per_bind_group) {
            return Err(SigilError::ResourceCreation(format!(
                "bind group layout {label:?}: {} entries exceed the limit of {}",
                entries.len(),
                self.limits.max_bindings_per_bind_group
            )));
        }
        Ok(self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label, entries }))
    }

    fn create_bind_group(
        &self,
        label: Option<&str>,
        layout: &Self::BindGroupLayout,
        entries: &[BindGroupEntry<'_, Self>],
    ) -> Result<Self::BindGroup> {
        let entries: Vec<wgpu::BindGroupEntry<'_>> = entries
            .iter()
            .map(|entry| wgpu::BindGroupEntry {
                binding: entry.binding,
                resource: match &entry.resource {
                    BindGroupResource::Buffer { buffer, offset, size } => {
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: *offset,
                            size: *size,
                        })
                    }
                    BindGroupResource::Texture(texture) => wgpu::BindingResource::TextureView(&texture.view),
                    BindGroupResource::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                },
            })
            .collect();

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label,
            layout,
            entries: &entries,
        }))
    }

    fn create_pipeline_layout(
        &self,
        label: Option<&str>,
        bind_group_layouts: &[&Self::BindGroupLayout],
    ) -> Result<Self::PipelineLayout> {
        if bind_group_layouts.len() as u64 > u64::from(self.limits.max_bind_groups) {
            return Err(SigilError::ResourceCreation(format!(
                "pipeline layout {label:?}: {} bind groups exceed the limit of {}",
                bind_group_layouts.len(),
                self.limits.max_bind_groups
            )));
        }
        let bind_group_layouts: Vec<Option<&wgpu::BindGroupLayout>> =
            bind_group_layouts.iter().copied().map(Some).collect();
        Ok(self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label,
            bind_group_layouts: &bind_group_layouts,
            immediate_size: 0,
        }))
    }

    fn read_buffer(&self, buffer: &Self::Buffer, range: Range<u64>) -> flume::Receiver<Result<Vec<u8>>> {
        let (tx, rx) = flume::bounded(1);
        let size = range.end.saturating_sub(range.start);
        if size == 0 || range.end > buffer.size() {
            let _ = tx.send(Err(SigilError::Readback(format!(
                "range {range:?} outside buffer of {} bytes",
                buffer.size()
            ))));
            return rx;
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, range.start, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let mapped = staging.clone();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let outcome = match result {
                Ok(()) => {
                    let bytes = mapped.slice(..).get_mapped_range().to_vec();
                    mapped.unmap();
                    Ok(bytes)
                }
                Err(e) => Err(SigilError::Readback(e.to_string())),
            };
            let _ = tx.send(outcome);
        });
        rx
    }

    fn poll(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("Device poll failed: {e}");
        }
    }
}
