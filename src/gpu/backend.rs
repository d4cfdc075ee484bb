//! The seam between the resource manager and a native graphics API.
//!
//! [`ResourceManager`](crate::gpu::ResourceManager) only ever talks to a
//! [`GpuBackend`]. [`WgpuBackend`](crate::gpu::WgpuBackend) is the
//! production implementation; [`HeadlessBackend`](crate::gpu::HeadlessBackend)
//! records calls without a device.

use std::num::NonZeroU64;
use std::ops::Range;

use crate::errors::Result;
use crate::resources::TextureSampler;

/// Buffer creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub label: Option<&'a str>,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
    /// Initial contents, uploaded right after creation.
    pub contents: Option<&'a [u8]>,
}

/// Texture creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub label: Option<&'a str>,
    pub size: wgpu::Extent3d,
    pub mip_level_count: u32,
    pub dimension: wgpu::TextureDimension,
    pub view_dimension: wgpu::TextureViewDimension,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
    /// Pixels for mip level 0, tightly packed.
    pub data: Option<&'a [u8]>,
    pub bytes_per_row: u32,
}

/// A resource bound at one slot of a bind group.
pub enum BindGroupResource<'a, B: GpuBackend + ?Sized> {
    Buffer {
        buffer: &'a B::Buffer,
        offset: u64,
        size: Option<NonZeroU64>,
    },
    Texture(&'a B::Texture),
    Sampler(&'a B::Sampler),
}

pub struct BindGroupEntry<'a, B: GpuBackend + ?Sized> {
    pub binding: u32,
    pub resource: BindGroupResource<'a, B>,
}

/// Native object factory.
///
/// Creation never panics on invalid input: every failure the backend can
/// detect up front comes back as
/// [`SigilError::ResourceCreation`](crate::errors::SigilError::ResourceCreation).
pub trait GpuBackend {
    type Buffer;
    type Texture;
    type Sampler;
    type BindGroupLayout;
    type BindGroup;
    type PipelineLayout;
    type RenderPipeline;
    type ComputePipeline;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer>;

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    fn destroy_buffer(&self, buffer: Self::Buffer);

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<Self::Texture>;

    /// Replaces the pixels of mip level 0.
    fn write_texture(&self, texture: &Self::Texture, desc: &TextureDesc<'_>);

    fn destroy_texture(&self, texture: Self::Texture);

    fn create_sampler(&self, label: Option<&str>, sampler: &TextureSampler) -> Result<Self::Sampler>;

    fn create_bind_group_layout(
        &self,
        label: Option<&str>,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<Self::BindGroupLayout>;

    /// `entries` are already in binding-index order.
    fn create_bind_group(
        &self,
        label: Option<&str>,
        layout: &Self::BindGroupLayout,
        entries: &[BindGroupEntry<'_, Self>],
    ) -> Result<Self::BindGroup>;

    fn create_pipeline_layout(
        &self,
        label: Option<&str>,
        bind_group_layouts: &[&Self::BindGroupLayout],
    ) -> Result<Self::PipelineLayout>;

    /// Starts copying `range` of `buffer` back to the host. The result
    /// arrives on the returned channel once the device has finished; it is
    /// never awaited here.
    fn read_buffer(&self, buffer: &Self::Buffer, range: Range<u64>) -> flume::Receiver<Result<Vec<u8>>>;

    /// Lets the device make progress on pending work without blocking.
    fn poll(&self);
}
