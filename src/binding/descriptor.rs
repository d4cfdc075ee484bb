//! `Binding` descriptors and their builder.

use std::num::NonZeroU64;

use wgpu::ShaderStages;

use crate::binding::BindingRegistry;
use crate::errors::{Result, SigilError};

/// Buffer binding sub-kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferBindingKind {
    #[default]
    Uniform,
    Storage,
    ReadOnlyStorage,
}

/// Access mode requested for a storage buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageAccess {
    #[default]
    Read,
    ReadWrite,
}

/// Shape of a sampled texture binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBindingLayout {
    pub sample_type: wgpu::TextureSampleType,
    pub view_dimension: wgpu::TextureViewDimension,
    pub multisampled: bool,
}

impl Default for TextureBindingLayout {
    fn default() -> Self {
        Self {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        }
    }
}

impl TextureBindingLayout {
    /// WGSL type of a texture variable with this layout.
    #[must_use]
    pub fn wgsl_type(&self) -> &'static str {
        use wgpu::TextureSampleType as S;
        use wgpu::TextureViewDimension as D;
        match (self.view_dimension, self.sample_type, self.multisampled) {
            (D::D2, S::Depth, true) => "texture_depth_multisampled_2d",
            (D::D2, S::Depth, false) => "texture_depth_2d",
            (D::D2Array, S::Depth, _) => "texture_depth_2d_array",
            (D::Cube, S::Depth, _) => "texture_depth_cube",
            (D::D2, S::Sint, _) => "texture_2d<i32>",
            (D::D2, S::Uint, _) => "texture_2d<u32>",
            (D::D2, _, true) => "texture_multisampled_2d<f32>",
            (D::D1, ..) => "texture_1d<f32>",
            (D::D2Array, ..) => "texture_2d_array<f32>",
            (D::Cube, ..) => "texture_cube<f32>",
            (D::CubeArray, ..) => "texture_cube_array<f32>",
            (D::D3, ..) => "texture_3d<f32>",
            _ => "texture_2d<f32>",
        }
    }
}

/// Resource kind of a binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Buffer {
        kind: BufferBindingKind,
        has_dynamic_offset: bool,
        min_binding_size: Option<NonZeroU64>,
    },
    Texture(TextureBindingLayout),
    Sampler(wgpu::SamplerBindingType),
}

impl Default for BindingKind {
    fn default() -> Self {
        Self::Buffer {
            kind: BufferBindingKind::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        }
    }
}

impl BindingKind {
    #[must_use]
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer { .. })
    }

    #[must_use]
    pub fn is_texture(&self) -> bool {
        matches!(self, Self::Texture(_))
    }

    #[must_use]
    pub fn is_sampler(&self) -> bool {
        matches!(self, Self::Sampler(_))
    }

    #[must_use]
    pub fn to_wgpu(&self) -> wgpu::BindingType {
        match *self {
            Self::Buffer {
                kind,
                has_dynamic_offset,
                min_binding_size,
            } => wgpu::BindingType::Buffer {
                ty: match kind {
                    BufferBindingKind::Uniform => wgpu::BufferBindingType::Uniform,
                    BufferBindingKind::Storage => wgpu::BufferBindingType::Storage { read_only: false },
                    BufferBindingKind::ReadOnlyStorage => wgpu::BufferBindingType::Storage { read_only: true },
                },
                has_dynamic_offset,
                min_binding_size,
            },
            Self::Texture(layout) => wgpu::BindingType::Texture {
                sample_type: layout.sample_type,
                view_dimension: layout.view_dimension,
                multisampled: layout.multisampled,
            },
            Self::Sampler(ty) => wgpu::BindingType::Sampler(ty),
        }
    }
}

/// One resource slot inside a bind group.
///
/// Group and binding indices are unset until a
/// [`BindGroupLayout`](crate::binding::BindGroupLayout) places the binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    name: String,
    kind: BindingKind,
    visibility: ShaderStages,
    struct_name: Option<String>,
    var_name: String,
    var_type: Option<String>,
    group_name: Option<String>,
    group: Option<u32>,
    index: Option<u32>,
}

impl Binding {
    /// Starts a builder with the defaults: uniform buffer, read access,
    /// vertex + fragment visibility, variable named after the binding.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> BindingBuilder {
        BindingBuilder::new(name)
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &BindingKind {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub fn visibility(&self) -> ShaderStages {
        self.visibility
    }

    #[inline]
    #[must_use]
    pub fn struct_name(&self) -> Option<&str> {
        self.struct_name.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn var_name(&self) -> &str {
        &self.var_name
    }

    #[inline]
    #[must_use]
    pub fn group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn group(&self) -> Option<u32> {
        self.group
    }

    #[inline]
    #[must_use]
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// The WGSL type of the variable. Textures and samplers fall back to the
    /// type implied by their layout, buffers to their backing struct.
    #[must_use]
    pub fn var_type(&self) -> Option<String> {
        if let Some(ty) = &self.var_type {
            return Some(ty.clone());
        }
        match &self.kind {
            BindingKind::Buffer { .. } => self.struct_name.clone(),
            BindingKind::Texture(layout) => Some(layout.wgsl_type().to_string()),
            BindingKind::Sampler(wgpu::SamplerBindingType::Comparison) => Some("sampler_comparison".to_string()),
            BindingKind::Sampler(_) => Some("sampler".to_string()),
        }
    }

    pub(crate) fn place(&mut self, group_name: &str, group: u32, index: u32) {
        self.group_name = Some(group_name.to_string());
        self.group = Some(group);
        self.index = Some(index);
    }

    /// Layout entry at the binding's placed index.
    pub fn layout_entry(&self) -> Result<wgpu::BindGroupLayoutEntry> {
        let index = self
            .index
            .ok_or_else(|| SigilError::UnplacedBinding(self.name.clone()))?;
        Ok(wgpu::BindGroupLayoutEntry {
            binding: index,
            visibility: self.visibility,
            ty: self.kind.to_wgpu(),
            count: None,
        })
    }

    /// `@group(G) @binding(B) var<...> name: Type;`
    pub fn to_wgsl(&self) -> Result<String> {
        let (Some(group), Some(index)) = (self.group, self.index) else {
            return Err(SigilError::UnplacedBinding(self.name.clone()));
        };
        let var_type = self.var_type().ok_or_else(|| {
            SigilError::InvalidType(format!("binding `{}` has no variable type", self.name))
        })?;

        let storage_class = match self.kind {
            BindingKind::Buffer {
                kind: BufferBindingKind::Uniform,
                ..
            } => "<uniform>",
            BindingKind::Buffer {
                kind: BufferBindingKind::ReadOnlyStorage,
                ..
            } => "<storage, read>",
            BindingKind::Buffer {
                kind: BufferBindingKind::Storage,
                ..
            } => "<storage, read_write>",
            BindingKind::Texture(_) | BindingKind::Sampler(_) => "",
        };

        Ok(format!(
            "@group({group}) @binding({index}) var{storage_class} {}: {var_type};",
            self.var_name
        ))
    }
}

/// Chainable configuration for a [`Binding`].
///
/// [`build`](Self::build) registers the finished binding by name;
/// [`finish`](Self::finish) returns it without registering.
#[derive(Debug, Clone)]
pub struct BindingBuilder {
    binding: Binding,
}

impl BindingBuilder {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            binding: Binding {
                var_name: name.clone(),
                name,
                kind: BindingKind::default(),
                visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                struct_name: None,
                var_type: None,
                group_name: None,
                group: None,
                index: None,
            },
        }
    }

    #[must_use]
    pub fn uniform(mut self) -> Self {
        self.binding.kind = BindingKind::Buffer {
            kind: BufferBindingKind::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        self
    }

    #[must_use]
    pub fn storage(mut self, access: StorageAccess) -> Self {
        let kind = match access {
            StorageAccess::Read => BufferBindingKind::ReadOnlyStorage,
            StorageAccess::ReadWrite => BufferBindingKind::Storage,
        };
        self.binding.kind = BindingKind::Buffer {
            kind,
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        self
    }

    #[must_use]
    pub fn texture(mut self, layout: TextureBindingLayout) -> Self {
        self.binding.kind = BindingKind::Texture(layout);
        self
    }

    #[must_use]
    pub fn sampler(mut self, ty: wgpu::SamplerBindingType) -> Self {
        self.binding.kind = BindingKind::Sampler(ty);
        self
    }

    /// Only meaningful for buffer bindings.
    #[must_use]
    pub fn dynamic_offset(mut self, min_binding_size: Option<NonZeroU64>) -> Self {
        if let BindingKind::Buffer { kind, .. } = self.binding.kind {
            self.binding.kind = BindingKind::Buffer {
                kind,
                has_dynamic_offset: true,
                min_binding_size,
            };
        }
        self
    }

    #[must_use]
    pub fn visibility(mut self, stages: ShaderStages) -> Self {
        self.binding.visibility = stages;
        self
    }

    /// Backing struct of a buffer binding; also the default variable type.
    #[must_use]
    pub fn with_struct(mut self, struct_name: impl Into<String>) -> Self {
        self.binding.struct_name = Some(struct_name.into());
        self
    }

    #[must_use]
    pub fn var(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.binding.var_name = name.into();
        self.binding.var_type = Some(ty.into());
        self
    }

    /// Finishes the binding and registers it by name.
    pub fn build(self, registry: &mut BindingRegistry) -> Binding {
        registry.register(self.binding.clone());
        self.binding
    }

    #[must_use]
    pub fn finish(self) -> Binding {
        self.binding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let b = Binding::builder("camera").finish();
        assert_eq!(b.visibility(), ShaderStages::VERTEX | ShaderStages::FRAGMENT);
        assert!(matches!(
            b.kind(),
            BindingKind::Buffer {
                kind: BufferBindingKind::Uniform,
                ..
            }
        ));
        assert_eq!(b.var_name(), "camera");
        assert!(b.group().is_none());
    }

    #[test]
    fn unplaced_binding_has_no_declaration() {
        let b = Binding::builder("camera").with_struct("Camera").finish();
        assert_eq!(b.to_wgsl(), Err(SigilError::UnplacedBinding("camera".into())));
    }

    #[test]
    fn declarations_per_kind() {
        let mut uniform = Binding::builder("camera").with_struct("Camera").var("u_camera", "Camera").finish();
        uniform.place("Global", 0, 0);
        assert_eq!(
            uniform.to_wgsl().unwrap(),
            "@group(0) @binding(0) var<uniform> u_camera: Camera;"
        );

        let mut lights = Binding::builder("lights")
            .storage(StorageAccess::Read)
            .var("st_lights", "array<Light>")
            .finish();
        lights.place("Global", 0, 1);
        assert_eq!(
            lights.to_wgsl().unwrap(),
            "@group(0) @binding(1) var<storage, read> st_lights: array<Light>;"
        );

        let mut map = Binding::builder("map").texture(TextureBindingLayout::default()).var("t_map", "texture_2d<f32>").finish();
        map.place("Material", 2, 1);
        assert_eq!(map.to_wgsl().unwrap(), "@group(2) @binding(1) var t_map: texture_2d<f32>;");

        let mut sampler = Binding::builder("s_map")
            .sampler(wgpu::SamplerBindingType::Filtering)
            .finish();
        sampler.place("Material", 2, 2);
        assert_eq!(sampler.to_wgsl().unwrap(), "@group(2) @binding(2) var s_map: sampler;");
    }

    #[test]
    fn buffer_without_type_is_rejected() {
        let mut b = Binding::builder("anon").finish();
        b.place("Mesh", 1, 0);
        assert!(matches!(b.to_wgsl(), Err(SigilError::InvalidType(_))));
    }

    #[test]
    fn read_write_storage_layout_entry() {
        let mut b = Binding::builder("particles")
            .storage(StorageAccess::ReadWrite)
            .visibility(ShaderStages::COMPUTE)
            .finish();
        b.place("Global", 0, 3);
        let entry = b.layout_entry().unwrap();
        assert_eq!(entry.binding, 3);
        assert_eq!(entry.visibility, ShaderStages::COMPUTE);
        assert!(matches!(
            entry.ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                ..
            }
        ));
    }
}
