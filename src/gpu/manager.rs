//! Resource Manager
//!
//! Owns every native object created for the binding core and hands out
//! reference-counted leases on them.
//!
//! # Caching policy
//!
//! Each request carries a stable key: a caller-chosen id for buffers, the
//! buffer generation for uniform sets, the texture id for textures, a
//! content hash for samplers and layouts, a fingerprint of the bound
//! resources for bind groups. A hit returns the cached object, a miss
//! creates it through the [`GpuBackend`]. Lease operations name their entry
//! with a [`ResourceKey`], so ids from different namespaces never alias.
//!
//! Every use stamps the entry with the current frame. [`begin_frame`]
//! advances the frame counter and evicts entries that nobody leases and
//! that have gone unused for longer than
//! [`ResourceSettings::retention_frames`].
//!
//! # Generations
//!
//! Uniform buffers and native textures are stored per generation. A rebuilt
//! uniform set or a texture whose shape changed gets a new generation; the
//! superseded one stays alive while bind groups still lease it and is
//! destroyed once its count drops to zero.
//!
//! [`begin_frame`]: ResourceManager::begin_frame

use std::hash::Hash;
use std::num::NonZeroU64;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::binding::{BindGroupLayout, Binding, BindingKind, BufferBindingKind};
use crate::errors::{Result, SigilError};
use crate::gpu::backend::{BindGroupEntry, BindGroupResource, BufferDesc, GpuBackend, TextureDesc};
use crate::gpu::cache::ResourceCache;
use crate::gpu::resource_ids::{
    BindGroupFingerprint, ResourceId, ResourceKey, fx_hash_key, generate_resource_id,
};
use crate::gpu::values::{BindingValue, BindingValues};
use crate::resources::{Texture, TextureSampler, TextureSource, UniformData, UniformKind};
use crate::settings::ResourceSettings;

/// Receives the bytes of a finished readback.
pub type ReadbackCallback = Box<dyn FnOnce(Result<Vec<u8>>)>;

// ============================================================================
// Cached GPU wrappers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BufferKey {
    User(ResourceId),
    /// Keyed by buffer generation
    Uniform(ResourceId),
}

struct GpuBuffer<B: GpuBackend> {
    buffer: B::Buffer,
    size: u64,
    /// Uniform set whose numeric data this buffer holds.
    owner: Option<ResourceId>,
}

struct GpuTexture<B: GpuBackend> {
    texture: B::Texture,
    /// Id of the CPU-side texture this generation was uploaded from.
    owner: ResourceId,
    /// Leases taken through `get_or_create_texture`, as opposed to the ones
    /// held by bind groups. They follow the texture to a new generation.
    leases: u32,
    /// CPU version last uploaded.
    version: u64,
    extent: wgpu::Extent3d,
    format: wgpu::TextureFormat,
    mip_level_count: u32,
}

struct GpuSampler<B: GpuBackend> {
    sampler: B::Sampler,
    id: ResourceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dependency {
    Buffer(BufferKey),
    /// Texture generation
    Texture(ResourceId),
    Sampler(TextureSampler),
}

struct GpuBindGroup<B: GpuBackend> {
    bind_group: B::BindGroup,
    id: ResourceId,
    layout_key: u64,
    dependencies: SmallVec<[Dependency; 8]>,
}

struct PendingReadback {
    buffer: ResourceId,
    receiver: flume::Receiver<Result<Vec<u8>>>,
    callback: ReadbackCallback,
}

/// Entry counts per cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub frame: u64,
    pub buffers: usize,
    pub textures: usize,
    pub samplers: usize,
    pub bind_group_layouts: usize,
    pub bind_groups: usize,
    pub pipeline_layouts: usize,
    pub render_pipelines: usize,
    pub compute_pipelines: usize,
    pub pending_readbacks: usize,
}

// ============================================================================
// Resource Manager
// ============================================================================

pub struct ResourceManager<B: GpuBackend> {
    backend: B,
    settings: ResourceSettings,
    frame_index: u64,

    buffers: ResourceCache<BufferKey, GpuBuffer<B>>,
    // Keyed by texture generation
    textures: ResourceCache<ResourceId, GpuTexture<B>>,
    samplers: ResourceCache<TextureSampler, GpuSampler<B>>,

    // Keyed by `BindGroupLayout::key()`, which doubles as the layout id
    layouts: ResourceCache<u64, B::BindGroupLayout>,
    // Keyed by `BindGroupFingerprint::key()`
    bind_groups: ResourceCache<u64, GpuBindGroup<B>>,
    bind_group_ids: FxHashMap<ResourceId, u64>,

    pipeline_layouts: ResourceCache<u64, B::PipelineLayout>,
    render_pipelines: ResourceCache<u64, B::RenderPipeline>,
    compute_pipelines: ResourceCache<u64, B::ComputePipeline>,

    // Uniform set id -> buffer generation currently uploaded
    uniform_generations: FxHashMap<ResourceId, ResourceId>,
    // Texture id -> current native texture generation
    texture_generations: FxHashMap<ResourceId, ResourceId>,

    readbacks: Vec<PendingReadback>,
}

impl<B: GpuBackend> ResourceManager<B> {
    pub fn new(backend: B, settings: ResourceSettings) -> Self {
        Self {
            backend,
            settings,
            frame_index: 0,
            buffers: ResourceCache::new(),
            textures: ResourceCache::new(),
            samplers: ResourceCache::new(),
            layouts: ResourceCache::new(),
            bind_groups: ResourceCache::new(),
            bind_group_ids: FxHashMap::default(),
            pipeline_layouts: ResourceCache::new(),
            render_pipelines: ResourceCache::new(),
            compute_pipelines: ResourceCache::new(),
            uniform_generations: FxHashMap::default(),
            texture_generations: FxHashMap::default(),
            readbacks: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ResourceSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    // ========================================================================
    // Frame lifecycle
    // ========================================================================

    /// Advances the frame counter, delivers finished readbacks and evicts
    /// stale entries.
    pub fn begin_frame(&mut self) {
        self.frame_index += 1;
        self.backend.poll();
        self.deliver_readbacks();

        let frame = self.frame_index;
        let retention = self.settings.retention_frames;

        // Bind groups go first so the leases they hold are dropped before
        // their dependencies are swept.
        let bind_groups = self.bind_groups.sweep(frame, retention);
        for (_, group) in &bind_groups {
            self.bind_group_ids.remove(&group.id);
            self.release_dependencies(group);
        }

        let buffers = self.buffers.sweep(frame, retention);
        let buffer_count = buffers.len();
        for (key, gpu) in buffers {
            self.forget_uniform_buffer(key, gpu.owner);
            self.backend.destroy_buffer(gpu.buffer);
        }

        let textures = self.textures.sweep(frame, retention);
        let texture_count = textures.len();
        for (generation, gpu) in textures {
            self.forget_texture(generation, gpu.owner);
            self.backend.destroy_texture(gpu.texture);
        }

        let others = self.samplers.sweep(frame, retention).len()
            + self.layouts.sweep(frame, retention).len()
            + self.pipeline_layouts.sweep(frame, retention).len()
            + self.render_pipelines.sweep(frame, retention).len()
            + self.compute_pipelines.sweep(frame, retention).len();

        let total = bind_groups.len() + buffer_count + texture_count + others;
        if total > 0 {
            log::info!(
                "Frame {frame}: evicted {total} resources ({} bind groups, {buffer_count} buffers, {texture_count} textures, {others} other)",
                bind_groups.len()
            );
        }
    }

    fn release_dependencies(&mut self, group: &GpuBindGroup<B>) {
        for dependency in &group.dependencies {
            match dependency {
                Dependency::Buffer(key) => {
                    self.buffers.release(key);
                }
                Dependency::Texture(generation) => {
                    self.textures.release(generation);
                }
                Dependency::Sampler(sampler) => {
                    self.samplers.release(sampler);
                }
            }
        }
        self.layouts.release(&group.layout_key);
    }

    fn forget_uniform_buffer(&mut self, key: BufferKey, owner: Option<ResourceId>) {
        if let (BufferKey::Uniform(generation), Some(owner)) = (key, owner)
            && self.uniform_generations.get(&owner) == Some(&generation)
        {
            self.uniform_generations.remove(&owner);
        }
    }

    fn forget_texture(&mut self, generation: ResourceId, owner: ResourceId) {
        if self.texture_generations.get(&owner) == Some(&generation) {
            self.texture_generations.remove(&owner);
        }
    }

    // ========================================================================
    // Leases
    // ========================================================================

    /// Stamps an entry as used this frame. Returns `false` if it is not
    /// cached.
    pub fn mark_used(&mut self, key: ResourceKey) -> bool {
        let frame = self.frame_index;
        match key {
            ResourceKey::Buffer(id) => self.buffers.mark_used(&BufferKey::User(id), frame),
            ResourceKey::Uniform(generation) => self.buffers.mark_used(&BufferKey::Uniform(generation), frame),
            ResourceKey::Texture(id) => match self.texture_generations.get(&id) {
                Some(generation) => self.textures.mark_used(generation, frame),
                None => false,
            },
            ResourceKey::BindGroup(id) => match self.bind_group_ids.get(&id) {
                Some(fingerprint) => self.bind_groups.mark_used(fingerprint, frame),
                None => false,
            },
        }
    }

    /// Drops one lease and returns the remaining count.
    ///
    /// Buffers and textures are destroyed as soon as their count reaches
    /// zero. Bind groups at zero are left to the frame sweep. Releasing a
    /// texture only drops leases taken with
    /// [`get_or_create_texture`](Self::get_or_create_texture); the ones bind
    /// groups hold are untouched.
    pub fn release(&mut self, key: ResourceKey) -> Option<u32> {
        match key {
            ResourceKey::Buffer(id) => self.release_buffer(BufferKey::User(id)),
            ResourceKey::Uniform(generation) => self.release_buffer(BufferKey::Uniform(generation)),
            ResourceKey::Texture(id) => {
                let generation = *self.texture_generations.get(&id)?;
                let entry = self.textures.entry_mut(&generation)?;
                if entry.handle.leases == 0 {
                    return Some(entry.ref_count);
                }
                entry.handle.leases -= 1;
                entry.ref_count = entry.ref_count.saturating_sub(1);
                let count = entry.ref_count;
                if count == 0
                    && let Some(gpu) = self.textures.remove(&generation)
                {
                    log::debug!("Texture {id} released, destroying");
                    self.texture_generations.remove(&id);
                    self.backend.destroy_texture(gpu.texture);
                }
                Some(count)
            }
            ResourceKey::BindGroup(id) => {
                let fingerprint = self.bind_group_ids.get(&id)?;
                self.bind_groups.release(fingerprint)
            }
        }
    }

    fn release_buffer(&mut self, key: BufferKey) -> Option<u32> {
        let count = self.buffers.release(&key)?;
        if count == 0
            && let Some(gpu) = self.buffers.remove(&key)
        {
            log::debug!("Buffer {key:?} released, destroying");
            self.forget_uniform_buffer(key, gpu.owner);
            self.backend.destroy_buffer(gpu.buffer);
        }
        Some(count)
    }

    #[must_use]
    pub fn ref_count(&self, key: ResourceKey) -> Option<u32> {
        match key {
            ResourceKey::Buffer(id) => self.buffers.ref_count(&BufferKey::User(id)),
            ResourceKey::Uniform(generation) => self.buffers.ref_count(&BufferKey::Uniform(generation)),
            ResourceKey::Texture(id) => self.textures.ref_count(self.texture_generations.get(&id)?),
            ResourceKey::BindGroup(id) => self.bind_groups.ref_count(self.bind_group_ids.get(&id)?),
        }
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Returns the buffer cached under `id`, creating it from `desc` on a
    /// miss, and takes a lease.
    pub fn get_or_create_buffer(&mut self, id: ResourceId, desc: &BufferDesc<'_>) -> Result<&B::Buffer> {
        let frame = self.frame_index;
        let backend = &self.backend;
        let entry = self.buffers.get_or_try_insert(BufferKey::User(id), frame, || {
            log::debug!("Creating buffer {id} ({:?}, {} bytes)", desc.label, desc.size);
            Ok::<_, SigilError>(GpuBuffer {
                buffer: backend.create_buffer(desc)?,
                size: desc.size,
                owner: None,
            })
        })?;
        entry.ref_count += 1;
        Ok(&entry.handle.buffer)
    }

    #[must_use]
    pub fn get_buffer(&self, id: ResourceId) -> Option<&B::Buffer> {
        self.buffers.get(&BufferKey::User(id)).map(|gpu| &gpu.buffer)
    }

    /// Native buffer of uniform generation `generation`, as returned by
    /// [`update_uniforms`](Self::update_uniforms).
    #[must_use]
    pub fn get_uniform_buffer(&self, generation: ResourceId) -> Option<&B::Buffer> {
        self.buffers.get(&BufferKey::Uniform(generation)).map(|gpu| &gpu.buffer)
    }

    /// Uploads `data` at `offset` into the buffer cached under `id`.
    pub fn update_buffer(&mut self, id: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let key = BufferKey::User(id);
        let gpu = self
            .buffers
            .get(&key)
            .ok_or_else(|| SigilError::ResourceNotFound(format!("buffer {id}")))?;
        let fits = offset
            .checked_add(data.len() as u64)
            .is_some_and(|end| end <= gpu.size);
        if !fits {
            return Err(SigilError::CapacityExceeded {
                what: format!("buffer {id}"),
                capacity: gpu.size as usize,
            });
        }
        self.backend.write_buffer(&gpu.buffer, offset, data);
        self.buffers.mark_used(&key, self.frame_index);
        Ok(())
    }

    /// Brings the native buffer of a uniform set up to date and returns its
    /// generation, or `None` when the set has no numeric fields.
    ///
    /// A rebuilt set gets a new buffer (its generation changed); otherwise
    /// only the bytes written since the last upload are sent.
    pub fn update_uniforms(&mut self, uniform: &UniformData) -> Result<Option<ResourceId>> {
        let frame = self.frame_index;
        let generation = uniform.buffer_generation();
        let key = BufferKey::Uniform(generation);

        if let Some(gpu) = self.buffers.get(&key) {
            if let Some(range) = uniform.take_dirty_range() {
                uniform.with_buffer(|data| {
                    if let Some(bytes) = data.as_bytes().get(range.start as usize..range.end as usize) {
                        self.backend.write_buffer(&gpu.buffer, range.start, bytes);
                    }
                });
            }
            self.buffers.mark_used(&key, frame);
            return Ok(Some(generation));
        }

        let Some(desc) = uniform.buffer_descriptor() else {
            return Ok(None);
        };
        uniform.take_dirty_range();

        let buffer = self.backend.create_buffer(&BufferDesc {
            label: Some(&desc.label),
            size: desc.size,
            usage: desc.usage,
            contents: Some(&desc.data),
        })?;
        self.buffers.insert(
            key,
            GpuBuffer {
                buffer,
                size: desc.size,
                owner: Some(uniform.id()),
            },
            frame,
        );
        log::debug!(
            "Uniform `{}`: created buffer generation {generation} ({} bytes)",
            desc.label,
            desc.size
        );

        // Retire the previous generation unless a bind group still holds it.
        if let Some(previous) = self.uniform_generations.insert(uniform.id(), generation)
            && previous != generation
        {
            let previous = BufferKey::Uniform(previous);
            if self.buffers.ref_count(&previous) == Some(0)
                && let Some(gpu) = self.buffers.remove(&previous)
            {
                self.backend.destroy_buffer(gpu.buffer);
            }
        }

        Ok(Some(generation))
    }

    // ========================================================================
    // Textures and samplers
    // ========================================================================

    /// Uploads a loaded texture (or refreshes it after new pixels arrived)
    /// and takes a lease. Returns `None` while the texture is still loading.
    pub fn get_or_create_texture(&mut self, texture: &Texture) -> Result<Option<ResourceId>> {
        let Some(generation) = self.ensure_texture(texture)? else {
            return Ok(None);
        };
        self.textures.acquire(&generation, self.frame_index);
        if let Some(gpu) = self.textures.get_mut(&generation) {
            gpu.leases += 1;
        }
        Ok(Some(texture.id()))
    }

    /// Current native texture of the texture with id `id`.
    #[must_use]
    pub fn get_texture(&self, id: ResourceId) -> Option<&B::Texture> {
        let generation = self.texture_generations.get(&id)?;
        self.textures.get(generation).map(|gpu| &gpu.texture)
    }

    /// Current native generation of the texture with id `id`.
    #[must_use]
    pub fn texture_generation(&self, id: ResourceId) -> Option<ResourceId> {
        self.texture_generations.get(&id).copied()
    }

    /// Native texture of a specific generation, current or superseded.
    #[must_use]
    pub fn get_texture_generation(&self, generation: ResourceId) -> Option<&B::Texture> {
        self.textures.get(&generation).map(|gpu| &gpu.texture)
    }

    /// Returns the generation holding the latest pixels of `texture`, or
    /// `None` while it is still loading.
    fn ensure_texture(&mut self, texture: &Texture) -> Result<Option<ResourceId>> {
        if let Some(&generation) = self.texture_generations.get(&texture.id())
            && self
                .textures
                .get(&generation)
                .is_some_and(|gpu| gpu.version == texture.version())
        {
            self.textures.mark_used(&generation, self.frame_index);
            return Ok(Some(generation));
        }
        texture
            .with_source(|source| self.upload_texture(texture, source))
            .transpose()
    }

    fn upload_texture(&mut self, texture: &Texture, source: &TextureSource) -> Result<ResourceId> {
        let id = texture.id();
        let frame = self.frame_index;
        let desc = TextureDesc {
            label: Some(texture.name()),
            size: source.extent(),
            mip_level_count: source.mip_level_count,
            dimension: source.dimension,
            view_dimension: texture.view_dimension(),
            format: source.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            data: source.data.as_deref(),
            bytes_per_row: source.bytes_per_row(),
        };

        let previous = self.texture_generations.get(&id).copied();
        if let Some(generation) = previous
            && let Some(gpu) = self.textures.get_mut(&generation)
            && gpu.extent == desc.size
            && gpu.format == desc.format
            && gpu.mip_level_count == desc.mip_level_count
        {
            self.backend.write_texture(&gpu.texture, &desc);
            gpu.version = texture.version();
            self.textures.mark_used(&generation, frame);
            log::debug!("Texture `{}` re-uploaded in place", texture.name());
            return Ok(generation);
        }

        let native = self.backend.create_texture(&desc)?;
        let generation = generate_resource_id();
        let leases = previous.map_or(0, |previous| self.retire_texture(previous));
        self.textures.insert(
            generation,
            GpuTexture {
                texture: native,
                owner: id,
                leases,
                version: texture.version(),
                extent: desc.size,
                format: desc.format,
                mip_level_count: desc.mip_level_count,
            },
            frame,
        );
        if let Some(entry) = self.textures.entry_mut(&generation) {
            entry.ref_count = leases;
        }
        self.texture_generations.insert(id, generation);
        log::debug!("Texture `{}` created as generation {generation}", texture.name());
        Ok(generation)
    }

    /// Takes the owner's leases off a superseded texture generation and
    /// destroys it unless bind groups still hold it. Returns the leases
    /// moved.
    fn retire_texture(&mut self, generation: ResourceId) -> u32 {
        let Some(entry) = self.textures.entry_mut(&generation) else {
            return 0;
        };
        let leases = std::mem::take(&mut entry.handle.leases);
        entry.ref_count = entry.ref_count.saturating_sub(leases);
        let remaining = entry.ref_count;

        if remaining == 0 {
            if let Some(gpu) = self.textures.remove(&generation) {
                self.backend.destroy_texture(gpu.texture);
            }
        } else {
            log::debug!("Texture generation {generation} superseded, kept for {remaining} bind groups");
        }
        leases
    }

    /// Returns the id of the shared sampler for `sampler`, creating it on a
    /// miss, and takes a lease.
    pub fn get_or_create_sampler(&mut self, sampler: &TextureSampler) -> Result<ResourceId> {
        let id = self.ensure_sampler(sampler)?;
        self.samplers.acquire(sampler, self.frame_index);
        Ok(id)
    }

    pub fn release_sampler(&mut self, sampler: &TextureSampler) -> Option<u32> {
        self.samplers.release(sampler)
    }

    #[must_use]
    pub fn get_sampler(&self, sampler: &TextureSampler) -> Option<&B::Sampler> {
        self.samplers.get(sampler).map(|gpu| &gpu.sampler)
    }

    fn ensure_sampler(&mut self, sampler: &TextureSampler) -> Result<ResourceId> {
        let backend = &self.backend;
        let entry = self.samplers.get_or_try_insert(*sampler, self.frame_index, || {
            log::debug!("Creating sampler {sampler:?}");
            Ok::<_, SigilError>(GpuSampler {
                sampler: backend.create_sampler(Some("Sampler"), sampler)?,
                id: generate_resource_id(),
            })
        })?;
        Ok(entry.handle.id)
    }

    // ========================================================================
    // Layouts
    // ========================================================================

    /// Realizes `layout` (shared by content hash), records the native id on
    /// it, and takes a lease.
    pub fn get_or_create_bind_group_layout(&mut self, layout: &BindGroupLayout) -> Result<u64> {
        let key = self.ensure_layout(layout)?;
        self.layouts.acquire(&key, self.frame_index);
        Ok(key)
    }

    pub fn release_bind_group_layout(&mut self, key: u64) -> Option<u32> {
        self.layouts.release(&key)
    }

    #[must_use]
    pub fn get_bind_group_layout(&self, key: u64) -> Option<&B::BindGroupLayout> {
        self.layouts.get(&key)
    }

    fn ensure_layout(&mut self, layout: &BindGroupLayout) -> Result<u64> {
        let key = layout.key();
        let backend = &self.backend;
        self.layouts.get_or_try_insert(key, self.frame_index, || {
            log::debug!("Creating bind group layout `{}` ({key:#x})", layout.name());
            backend.create_bind_group_layout(Some(layout.name()), layout.entries())
        })?;
        layout.set_native_id(key);
        Ok(key)
    }

    /// Pipeline layout over `layouts` in group order, keyed by their ids.
    pub fn get_or_create_pipeline_layout(&mut self, layouts: &[&BindGroupLayout]) -> Result<u64> {
        let keys = layouts
            .iter()
            .map(|layout| self.ensure_layout(layout))
            .collect::<Result<SmallVec<[u64; 4]>>>()?;
        let key = fx_hash_key(keys.as_slice());
        let frame = self.frame_index;

        if self.pipeline_layouts.acquire(&key, frame).is_some() {
            return Ok(key);
        }

        let handles = keys
            .iter()
            .map(|k| {
                self.layouts
                    .get(k)
                    .ok_or_else(|| SigilError::ResourceNotFound(format!("bind group layout {k:#x}")))
            })
            .collect::<Result<SmallVec<[&B::BindGroupLayout; 4]>>>()?;
        let native = self.backend.create_pipeline_layout(Some("Pipeline Layout"), &handles)?;
        self.pipeline_layouts.insert(key, native, frame);
        self.pipeline_layouts.acquire(&key, frame);
        Ok(key)
    }

    pub fn release_pipeline_layout(&mut self, key: u64) -> Option<u32> {
        self.pipeline_layouts.release(&key)
    }

    #[must_use]
    pub fn get_pipeline_layout(&self, key: u64) -> Option<&B::PipelineLayout> {
        self.pipeline_layouts.get(&key)
    }

    // ========================================================================
    // Pipelines
    // ========================================================================

    /// Returns the render pipeline cached under `key`, calling `build` on a
    /// miss, and takes a lease. The returned id is the hash of `key`.
    pub fn get_or_create_render_pipeline<K: Hash + ?Sized>(
        &mut self,
        key: &K,
        pipeline_layout: u64,
        build: impl FnOnce(&B, &B::PipelineLayout) -> Result<B::RenderPipeline>,
    ) -> Result<u64> {
        let key = fx_hash_key(key);
        let frame = self.frame_index;
        self.pipeline_layouts.mark_used(&pipeline_layout, frame);
        if self.render_pipelines.acquire(&key, frame).is_some() {
            return Ok(key);
        }

        let layout = self
            .pipeline_layouts
            .get(&pipeline_layout)
            .ok_or_else(|| SigilError::ResourceNotFound(format!("pipeline layout {pipeline_layout:#x}")))?;
        let pipeline = build(&self.backend, layout)?;
        log::debug!("Created render pipeline {key:#x}");
        self.render_pipelines.insert(key, pipeline, frame);
        self.render_pipelines.acquire(&key, frame);
        Ok(key)
    }

    pub fn get_or_create_compute_pipeline<K: Hash + ?Sized>(
        &mut self,
        key: &K,
        pipeline_layout: u64,
        build: impl FnOnce(&B, &B::PipelineLayout) -> Result<B::ComputePipeline>,
    ) -> Result<u64> {
        let key = fx_hash_key(key);
        let frame = self.frame_index;
        self.pipeline_layouts.mark_used(&pipeline_layout, frame);
        if self.compute_pipelines.acquire(&key, frame).is_some() {
            return Ok(key);
        }

        let layout = self
            .pipeline_layouts
            .get(&pipeline_layout)
            .ok_or_else(|| SigilError::ResourceNotFound(format!("pipeline layout {pipeline_layout:#x}")))?;
        let pipeline = build(&self.backend, layout)?;
        log::debug!("Created compute pipeline {key:#x}");
        self.compute_pipelines.insert(key, pipeline, frame);
        self.compute_pipelines.acquire(&key, frame);
        Ok(key)
    }

    #[must_use]
    pub fn get_render_pipeline(&self, key: u64) -> Option<&B::RenderPipeline> {
        self.render_pipelines.get(&key)
    }

    #[must_use]
    pub fn get_compute_pipeline(&self, key: u64) -> Option<&B::ComputePipeline> {
        self.compute_pipelines.get(&key)
    }

    pub fn release_render_pipeline(&mut self, key: u64) -> Option<u32> {
        self.render_pipelines.release(&key)
    }

    pub fn release_compute_pipeline(&mut self, key: u64) -> Option<u32> {
        self.compute_pipelines.release(&key)
    }

    // ========================================================================
    // Bind groups
    // ========================================================================

    /// Assembles a bind group for `layout` from `values` and takes a lease.
    ///
    /// Bindings are resolved in binding-index order and the native entries
    /// follow that order, whatever order `values` was filled in. Returns
    /// `Ok(None)` while any bound texture is still loading.
    pub fn create_bind_group(
        &mut self,
        layout: &BindGroupLayout,
        values: &BindingValues,
    ) -> Result<Option<ResourceId>> {
        let frame = self.frame_index;
        let layout_key = self.ensure_layout(layout)?;

        let mut ordered: SmallVec<[&Binding; 8]> = layout.bindings().iter().collect();
        ordered.sort_by_key(|binding| binding.index());

        let mut fingerprint = BindGroupFingerprint::new(layout_key);
        let mut slots: SmallVec<[(u32, Dependency, Option<NonZeroU64>); 8]> = SmallVec::new();

        for binding in ordered {
            let index = binding
                .index()
                .ok_or_else(|| SigilError::UnplacedBinding(binding.name().to_string()))?;
            let value = values
                .get(binding.name())
                .ok_or_else(|| mismatch(binding, "no value supplied".to_string()))?;

            let (dependency, size) = match (binding.kind(), value) {
                (
                    BindingKind::Buffer {
                        has_dynamic_offset,
                        min_binding_size,
                        ..
                    },
                    BindingValue::Buffer(id),
                ) => {
                    let key = BufferKey::User(*id);
                    if !self.buffers.mark_used(&key, frame) {
                        return Err(SigilError::ResourceNotFound(format!("buffer {id}")));
                    }
                    fingerprint.push(*id);
                    let size = if *has_dynamic_offset { *min_binding_size } else { None };
                    (Dependency::Buffer(key), size)
                }
                (BindingKind::Buffer { kind, .. }, BindingValue::Uniform(uniform)) => {
                    let expected = match kind {
                        BufferBindingKind::Uniform => UniformKind::Uniform,
                        BufferBindingKind::Storage | BufferBindingKind::ReadOnlyStorage => UniformKind::Storage,
                    };
                    if uniform.kind() != expected {
                        return Err(mismatch(
                            binding,
                            format!("{:?} set bound to a {kind:?} binding", uniform.kind()),
                        ));
                    }
                    let generation = self
                        .update_uniforms(uniform)?
                        .ok_or_else(|| mismatch(binding, "uniform set has no numeric fields".to_string()))?;
                    fingerprint.push(generation);
                    (Dependency::Buffer(BufferKey::Uniform(generation)), None)
                }
                (BindingKind::Texture(expected), BindingValue::Texture(texture)) => {
                    if expected.view_dimension != texture.view_dimension() {
                        return Err(mismatch(
                            binding,
                            format!(
                                "{:?} texture bound to a {:?} binding",
                                texture.view_dimension(),
                                expected.view_dimension
                            ),
                        ));
                    }
                    let Some(generation) = self.ensure_texture(texture)? else {
                        log::debug!(
                            "Bind group `{}` deferred: texture `{}` is still loading",
                            layout.name(),
                            texture.name()
                        );
                        return Ok(None);
                    };
                    fingerprint.push(generation);
                    (Dependency::Texture(generation), None)
                }
                (BindingKind::Sampler(expected), BindingValue::Sampler(sampler)) => {
                    let actual = sampler.binding_type();
                    let compatible = match expected {
                        wgpu::SamplerBindingType::Comparison => actual == wgpu::SamplerBindingType::Comparison,
                        wgpu::SamplerBindingType::Filtering => actual != wgpu::SamplerBindingType::Comparison,
                        wgpu::SamplerBindingType::NonFiltering => actual == wgpu::SamplerBindingType::NonFiltering,
                    };
                    if !compatible {
                        return Err(mismatch(binding, format!("{actual:?} sampler bound to a {expected:?} binding")));
                    }
                    fingerprint.push(self.ensure_sampler(sampler)?);
                    (Dependency::Sampler(*sampler), None)
                }
                (kind, value) => {
                    let expected = if kind.is_buffer() {
                        "buffer"
                    } else if kind.is_texture() {
                        "texture"
                    } else {
                        "sampler"
                    };
                    return Err(mismatch(
                        binding,
                        format!("{} value bound to a {expected} binding", value.kind_name()),
                    ));
                }
            };
            slots.push((index, dependency, size));
        }

        let key = fingerprint.key();
        if self.bind_groups.acquire(&key, frame).is_some() {
            self.layouts.mark_used(&layout_key, frame);
            return Ok(self.bind_groups.get(&key).map(|group| group.id));
        }

        let bind_group = {
            let not_found = |what: String| SigilError::ResourceNotFound(what);
            let native_layout = self
                .layouts
                .get(&layout_key)
                .ok_or_else(|| not_found(format!("bind group layout {layout_key:#x}")))?;

            let mut entries: Vec<BindGroupEntry<'_, B>> = Vec::with_capacity(slots.len());
            for (binding, dependency, size) in &slots {
                let resource = match dependency {
                    Dependency::Buffer(key) => BindGroupResource::Buffer {
                        buffer: &self
                            .buffers
                            .get(key)
                            .ok_or_else(|| not_found(format!("buffer {key:?}")))?
                            .buffer,
                        offset: 0,
                        size: *size,
                    },
                    Dependency::Texture(id) => BindGroupResource::Texture(
                        &self
                            .textures
                            .get(id)
                            .ok_or_else(|| not_found(format!("texture generation {id}")))?
                            .texture,
                    ),
                    Dependency::Sampler(sampler) => BindGroupResource::Sampler(
                        &self
                            .samplers
                            .get(sampler)
                            .ok_or_else(|| not_found(format!("sampler {sampler:?}")))?
                            .sampler,
                    ),
                };
                entries.push(BindGroupEntry {
                    binding: *binding,
                    resource,
                });
            }
            self.backend
                .create_bind_group(Some(layout.name()), native_layout, &entries)?
        };

        let id = generate_resource_id();
        let dependencies: SmallVec<[Dependency; 8]> = slots.iter().map(|(_, dependency, _)| *dependency).collect();
        for dependency in &dependencies {
            match dependency {
                Dependency::Buffer(dep) => self.buffers.acquire(dep, frame),
                Dependency::Texture(dep) => self.textures.acquire(dep, frame),
                Dependency::Sampler(dep) => self.samplers.acquire(dep, frame),
            };
        }
        self.layouts.acquire(&layout_key, frame);

        self.bind_groups.insert(
            key,
            GpuBindGroup {
                bind_group,
                id,
                layout_key,
                dependencies,
            },
            frame,
        );
        self.bind_groups.acquire(&key, frame);
        self.bind_group_ids.insert(id, key);
        log::debug!("Created bind group {id} for layout `{}`", layout.name());
        Ok(Some(id))
    }

    #[must_use]
    pub fn get_bind_group(&self, id: ResourceId) -> Option<&B::BindGroup> {
        let key = self.bind_group_ids.get(&id)?;
        self.bind_groups.get(key).map(|group| &group.bind_group)
    }

    // ========================================================================
    // Readback
    // ========================================================================

    /// Schedules a copy of the whole buffer back to the host. `callback`
    /// runs during a later [`begin_frame`](Self::begin_frame), never inside
    /// this call.
    pub fn request_readback(
        &mut self,
        id: ResourceId,
        callback: impl FnOnce(Result<Vec<u8>>) + 'static,
    ) -> Result<()> {
        let key = BufferKey::User(id);
        let gpu = self
            .buffers
            .get(&key)
            .ok_or_else(|| SigilError::ResourceNotFound(format!("buffer {id}")))?;
        let receiver = self.backend.read_buffer(&gpu.buffer, 0..gpu.size);
        self.buffers.mark_used(&key, self.frame_index);
        self.readbacks.push(PendingReadback {
            buffer: id,
            receiver,
            callback: Box::new(callback),
        });
        Ok(())
    }

    fn deliver_readbacks(&mut self) {
        for readback in std::mem::take(&mut self.readbacks) {
            match readback.receiver.try_recv() {
                Ok(result) => (readback.callback)(result),
                Err(flume::TryRecvError::Empty) => self.readbacks.push(readback),
                Err(flume::TryRecvError::Disconnected) => (readback.callback)(Err(SigilError::Readback(format!(
                    "buffer {} readback was dropped",
                    readback.buffer
                )))),
            }
        }
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            frame: self.frame_index,
            buffers: self.buffers.len(),
            textures: self.textures.len(),
            samplers: self.samplers.len(),
            bind_group_layouts: self.layouts.len(),
            bind_groups: self.bind_groups.len(),
            pipeline_layouts: self.pipeline_layouts.len(),
            render_pipelines: self.render_pipelines.len(),
            compute_pipelines: self.compute_pipelines.len(),
            pending_readbacks: self.readbacks.len(),
        }
    }
}

fn mismatch(binding: &Binding, reason: String) -> SigilError {
    SigilError::BindingMismatch {
        binding: binding.name().to_string(),
        reason,
    }
}
