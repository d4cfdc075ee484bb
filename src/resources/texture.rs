//! CPU-side textures with an asynchronous "loaded" edge.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::binding::TextureBindingLayout;
use crate::errors::{Result, SigilError};
use crate::gpu::{ResourceId, generate_resource_id};

// ============================================================================
// Sampler
// ============================================================================

/// Sampler configuration. Hashable so equal configurations share one native
/// sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSampler {
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub address_mode_w: wgpu::AddressMode,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::MipmapFilterMode,
    /// Comparison function for shadow map sampling.
    pub compare: Option<wgpu::CompareFunction>,
    /// Anisotropic filtering level (1 = off).
    pub anisotropy_clamp: u16,
}

impl Default for TextureSampler {
    fn default() -> Self {
        Self {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            compare: None,
            anisotropy_clamp: 1,
        }
    }
}

impl TextureSampler {
    #[must_use]
    pub fn clamped() -> Self {
        Self {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn comparison(compare: wgpu::CompareFunction) -> Self {
        Self {
            compare: Some(compare),
            ..Self::clamped()
        }
    }

    /// Sampler kind a bind group layout needs for this configuration.
    #[must_use]
    pub fn binding_type(&self) -> wgpu::SamplerBindingType {
        if self.compare.is_some() {
            wgpu::SamplerBindingType::Comparison
        } else if self.mag_filter == wgpu::FilterMode::Nearest
            && self.min_filter == wgpu::FilterMode::Nearest
            && self.mipmap_filter == wgpu::MipmapFilterMode::Nearest
        {
            wgpu::SamplerBindingType::NonFiltering
        } else {
            wgpu::SamplerBindingType::Filtering
        }
    }

    #[must_use]
    pub fn descriptor<'a>(&self, label: Option<&'a str>) -> wgpu::SamplerDescriptor<'a> {
        wgpu::SamplerDescriptor {
            label,
            address_mode_u: self.address_mode_u,
            address_mode_v: self.address_mode_v,
            address_mode_w: self.address_mode_w,
            mag_filter: self.mag_filter,
            min_filter: self.min_filter,
            mipmap_filter: self.mipmap_filter,
            compare: self.compare,
            anisotropy_clamp: self.anisotropy_clamp,
            ..Default::default()
        }
    }
}

// ============================================================================
// Source
// ============================================================================

/// Pixel payload and physical shape of a loaded texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSource {
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, layer count for arrays and cube maps.
    pub depth_or_array_layers: u32,
    pub dimension: wgpu::TextureDimension,
    pub format: wgpu::TextureFormat,
    pub mip_level_count: u32,
    pub data: Option<Vec<u8>>,
}

impl TextureSource {
    #[must_use]
    pub fn new_2d(width: u32, height: u32, format: wgpu::TextureFormat, data: Option<Vec<u8>>) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            mip_level_count: 1,
            data,
        }
    }

    /// Six square layers.
    #[must_use]
    pub fn new_cube(size: u32, format: wgpu::TextureFormat, data: Option<Vec<u8>>) -> Self {
        Self {
            depth_or_array_layers: 6,
            ..Self::new_2d(size, size, format, data)
        }
    }

    #[must_use]
    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: self.depth_or_array_layers,
        }
    }

    #[must_use]
    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.format.block_copy_size(None).unwrap_or(4)
    }
}

// ============================================================================
// Texture
// ============================================================================

/// Called once when a texture finishes loading.
pub type LoadedCallback = Box<dyn FnOnce(&Texture)>;

struct TextureState {
    source: Option<TextureSource>,
    version: u64,
    listeners: Vec<LoadedCallback>,
}

struct TextureInner {
    id: ResourceId,
    name: String,
    view_dimension: wgpu::TextureViewDimension,
    sampler: Cell<TextureSampler>,
    state: RefCell<TextureState>,
}

/// Shared handle to a texture whose pixels may still be loading.
///
/// The "loaded" transition is edge-triggered: [`finish_loading`] fires
/// every pending [`on_loaded`] listener exactly once. Listeners registered
/// after the texture is loaded run immediately.
///
/// [`finish_loading`]: Self::finish_loading
/// [`on_loaded`]: Self::on_loaded
#[derive(Clone)]
pub struct Texture(Rc<TextureInner>);

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Texture {}

impl Texture {
    /// A texture whose pixels have not arrived yet.
    #[must_use]
    pub fn pending(name: impl Into<String>, view_dimension: wgpu::TextureViewDimension) -> Self {
        Self(Rc::new(TextureInner {
            id: generate_resource_id(),
            name: name.into(),
            view_dimension,
            sampler: Cell::new(TextureSampler::default()),
            state: RefCell::new(TextureState {
                source: None,
                version: 0,
                listeners: Vec::new(),
            }),
        }))
    }

    #[must_use]
    pub fn from_source(
        name: impl Into<String>,
        source: TextureSource,
        view_dimension: wgpu::TextureViewDimension,
    ) -> Self {
        let texture = Self::pending(name, view_dimension);
        {
            let mut state = texture.0.state.borrow_mut();
            state.source = Some(source);
            state.version = 1;
        }
        texture
    }

    #[must_use]
    pub fn new_2d(
        name: impl Into<String>,
        width: u32,
        height: u32,
        data: Option<Vec<u8>>,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self::from_source(
            name,
            TextureSource::new_2d(width, height, format, data),
            wgpu::TextureViewDimension::D2,
        )
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.0.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    #[must_use]
    pub fn view_dimension(&self) -> wgpu::TextureViewDimension {
        self.0.view_dimension
    }

    #[inline]
    #[must_use]
    pub fn sampler(&self) -> TextureSampler {
        self.0.sampler.get()
    }

    pub fn set_sampler(&self, sampler: TextureSampler) {
        self.0.sampler.set(sampler);
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.0.state.borrow().source.is_some()
    }

    /// Bumped every time new pixels arrive.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.0.state.borrow().version
    }

    /// Runs `f` against the loaded source, or returns `None` while pending.
    pub fn with_source<R>(&self, f: impl FnOnce(&TextureSource) -> R) -> Option<R> {
        self.0.state.borrow().source.as_ref().map(f)
    }

    #[must_use]
    pub fn sample_type(&self) -> wgpu::TextureSampleType {
        match self.with_source(|s| s.format.is_depth_stencil_format()) {
            Some(true) => wgpu::TextureSampleType::Depth,
            _ => wgpu::TextureSampleType::Float { filterable: true },
        }
    }

    #[must_use]
    pub fn binding_layout(&self) -> TextureBindingLayout {
        TextureBindingLayout {
            sample_type: self.sample_type(),
            view_dimension: self.view_dimension(),
            multisampled: false,
        }
    }

    /// Registers a listener for the loaded edge.
    pub fn on_loaded(&self, callback: Option<LoadedCallback>) -> Result<()> {
        let callback = callback.ok_or(SigilError::MissingCallback("Texture::on_loaded"))?;
        if self.is_loaded() {
            callback(self);
        } else {
            self.0.state.borrow_mut().listeners.push(callback);
        }
        Ok(())
    }

    /// Installs the pixel payload and fires pending listeners.
    pub fn finish_loading(&self, source: TextureSource) {
        let listeners = {
            let mut state = self.0.state.borrow_mut();
            state.source = Some(source);
            state.version += 1;
            std::mem::take(&mut state.listeners)
        };
        log::debug!("Texture `{}` loaded, notifying {} listeners", self.0.name, listeners.len());
        for listener in listeners {
            listener(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_fire_once_on_load() {
        let texture = Texture::pending("albedo", wgpu::TextureViewDimension::D2);
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        texture
            .on_loaded(Some(Box::new(move |_| counter.set(counter.get() + 1))))
            .unwrap();

        texture.finish_loading(TextureSource::new_2d(1, 1, wgpu::TextureFormat::Rgba8Unorm, None));
        texture.finish_loading(TextureSource::new_2d(1, 1, wgpu::TextureFormat::Rgba8Unorm, None));
        assert_eq!(hits.get(), 1);
        assert_eq!(texture.version(), 2);
    }

    #[test]
    fn late_listener_runs_immediately() {
        let texture = Texture::new_2d("white", 1, 1, Some(vec![255; 4]), wgpu::TextureFormat::Rgba8Unorm);
        let hit = Rc::new(Cell::new(false));
        let flag = hit.clone();
        texture.on_loaded(Some(Box::new(move |_| flag.set(true)))).unwrap();
        assert!(hit.get());
    }

    #[test]
    fn missing_listener_is_an_error() {
        let texture = Texture::pending("t", wgpu::TextureViewDimension::D2);
        assert_eq!(
            texture.on_loaded(None),
            Err(SigilError::MissingCallback("Texture::on_loaded"))
        );
    }

    #[test]
    fn depth_formats_sample_as_depth() {
        let shadow = Texture::new_2d("shadow", 4, 4, None, wgpu::TextureFormat::Depth32Float);
        assert_eq!(shadow.sample_type(), wgpu::TextureSampleType::Depth);
        assert_eq!(
            TextureSampler::comparison(wgpu::CompareFunction::LessEqual).binding_type(),
            wgpu::SamplerBindingType::Comparison
        );
    }
}
