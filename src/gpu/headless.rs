//! Device-less [`GpuBackend`].
//!
//! Every call is recorded as a [`HeadlessEvent`] and buffers keep their
//! bytes on the host, so cache and upload behaviour can be observed
//! without a GPU.

use std::cell::{Cell, RefCell};
use std::ops::Range;
use std::rc::Rc;

use crate::errors::{Result, SigilError};
use crate::gpu::backend::{BindGroupEntry, BindGroupResource, BufferDesc, GpuBackend, TextureDesc};
use crate::resources::TextureSampler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadlessEvent {
    CreateBuffer { id: u64, size: u64 },
    WriteBuffer { id: u64, offset: u64, len: usize },
    DestroyBuffer { id: u64 },
    CreateTexture { id: u64, width: u32, height: u32 },
    WriteTexture { id: u64 },
    DestroyTexture { id: u64 },
    CreateSampler { id: u64 },
    CreateBindGroupLayout { id: u64, entries: usize },
    /// `entries` holds `(binding, handle id)` in the order received.
    CreateBindGroup { id: u64, entries: Vec<(u32, u64)> },
    CreatePipelineLayout { id: u64, layouts: Vec<u64> },
}

#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    pub id: u64,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
    contents: Rc<RefCell<Vec<u8>>>,
}

impl HeadlessBuffer {
    /// Snapshot of the host copy.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.contents.borrow().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessHandle {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessBindGroup {
    pub id: u64,
    pub entries: Vec<(u32, u64)>,
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: Cell<u64>,
    events: RefCell<Vec<HeadlessEvent>>,
    max_buffer_size: Option<u64>,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects buffers larger than `max` the way a device limit would.
    #[must_use]
    pub fn with_max_buffer_size(mut self, max: u64) -> Self {
        self.max_buffer_size = Some(max);
        self
    }

    #[must_use]
    pub fn events(&self) -> Vec<HeadlessEvent> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&HeadlessEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn record(&self, event: HeadlessEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl GpuBackend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessHandle;
    type Sampler = HeadlessHandle;
    type BindGroupLayout = HeadlessHandle;
    type BindGroup = HeadlessBindGroup;
    type PipelineLayout = HeadlessHandle;
    type RenderPipeline = HeadlessHandle;
    type ComputePipeline = HeadlessHandle;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer> {
        if desc.size == 0 || self.max_buffer_size.is_some_and(|max| desc.size > max) {
            return Err(SigilError::ResourceCreation(format!(
                "buffer {:?}: unsupported size {}",
                desc.label, desc.size
            )));
        }
        let id = self.next_id();
        let mut bytes = vec![0u8; desc.size as usize];
        if let Some(contents) = desc.contents {
            let n = contents.len().min(bytes.len());
            bytes[..n].copy_from_slice(&contents[..n]);
        }
        self.record(HeadlessEvent::CreateBuffer { id, size: desc.size });
        Ok(HeadlessBuffer {
            id,
            size: desc.size,
            usage: desc.usage,
            contents: Rc::new(RefCell::new(bytes)),
        })
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        let mut contents = buffer.contents.borrow_mut();
        let start = offset as usize;
        let end = (start + data.len()).min(contents.len());
        if start < end {
            contents[start..end].copy_from_slice(&data[..end - start]);
        }
        self.record(HeadlessEvent::WriteBuffer {
            id: buffer.id,
            offset,
            len: data.len(),
        });
    }

    fn destroy_buffer(&self, buffer: Self::Buffer) {
        self.record(HeadlessEvent::DestroyBuffer { id: buffer.id });
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<Self::Texture> {
        if desc.size.width == 0 || desc.size.height == 0 {
            return Err(SigilError::ResourceCreation(format!(
                "texture {:?}: empty extent",
                desc.label
            )));
        }
        let id = self.next_id();
        self.record(HeadlessEvent::CreateTexture {
            id,
            width: desc.size.width,
            height: desc.size.height,
        });
        Ok(HeadlessHandle { id })
    }

    fn write_texture(&self, texture: &Self::Texture, _desc: &TextureDesc<'_>) {
        self.record(HeadlessEvent::WriteTexture { id: texture.id });
    }

    fn destroy_texture(&self, texture: Self::Texture) {
        self.record(HeadlessEvent::DestroyTexture { id: texture.id });
    }

    fn create_sampler(&self, _label: Option<&str>, _sampler: &TextureSampler) -> Result<Self::Sampler> {
        let id = self.next_id();
        self.record(HeadlessEvent::CreateSampler { id });
        Ok(HeadlessHandle { id })
    }

    fn create_bind_group_layout(
        &self,
        _label: Option<&str>,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<Self::BindGroupLayout> {
        let id = self.next_id();
        self.record(HeadlessEvent::CreateBindGroupLayout {
            id,
            entries: entries.len(),
        });
        Ok(HeadlessHandle { id })
    }

    fn create_bind_group(
        &self,
        _label: Option<&str>,
        _layout: &Self::BindGroupLayout,
        entries: &[BindGroupEntry<'_, Self>],
    ) -> Result<Self::BindGroup> {
        let id = self.next_id();
        let entries: Vec<(u32, u64)> = entries
            .iter()
            .map(|entry| {
                let handle = match &entry.resource {
                    BindGroupResource::Buffer { buffer, .. } => buffer.id,
                    BindGroupResource::Texture(texture) => texture.id,
                    BindGroupResource::Sampler(sampler) => sampler.id,
                };
                (entry.binding, handle)
            })
            .collect();
        self.record(HeadlessEvent::CreateBindGroup {
            id,
            entries: entries.clone(),
        });
        Ok(HeadlessBindGroup { id, entries })
    }

    fn create_pipeline_layout(
        &self,
        _label: Option<&str>,
        bind_group_layouts: &[&Self::BindGroupLayout],
    ) -> Result<Self::PipelineLayout> {
        let id = self.next_id();
        self.record(HeadlessEvent::CreatePipelineLayout {
            id,
            layouts: bind_group_layouts.iter().map(|l| l.id).collect(),
        });
        Ok(HeadlessHandle { id })
    }

    fn read_buffer(&self, buffer: &Self::Buffer, range: Range<u64>) -> flume::Receiver<Result<Vec<u8>>> {
        let (tx, rx) = flume::bounded(1);
        let contents = buffer.contents.borrow();
        let outcome = if range.start < range.end && range.end as usize <= contents.len() {
            Ok(contents[range.start as usize..range.end as usize].to_vec())
        } else {
            Err(SigilError::Readback(format!(
                "range {range:?} outside buffer of {} bytes",
                contents.len()
            )))
        };
        let _ = tx.send(outcome);
        rx
    }

    fn poll(&self) {}
}
