//! Values bound to the slots of a bind group layout.

use rustc_hash::FxHashMap;

use crate::gpu::ResourceId;
use crate::resources::{Texture, TextureSampler, UniformData};

/// What a single layout binding is bound to.
#[derive(Debug, Clone)]
pub enum BindingValue {
    /// A buffer created with
    /// [`ResourceManager::get_or_create_buffer`](crate::gpu::ResourceManager::get_or_create_buffer).
    Buffer(ResourceId),
    /// The numeric buffer of a uniform set, uploaded on demand.
    Uniform(UniformData),
    Texture(Texture),
    Sampler(TextureSampler),
}

impl BindingValue {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Uniform(_) => "uniform",
            Self::Texture(_) => "texture",
            Self::Sampler(_) => "sampler",
        }
    }
}

/// Binding name to value. Iteration order is irrelevant: bind groups are
/// always assembled in the layout's binding-index order.
#[derive(Debug, Clone, Default)]
pub struct BindingValues {
    values: FxHashMap<String, BindingValue>,
}

impl BindingValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: BindingValue) -> Option<BindingValue> {
        self.values.insert(name.into(), value)
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: BindingValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Copies every value of `other` over this one.
    pub fn merge(&mut self, other: BindingValues) {
        self.values.extend(other.values);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
