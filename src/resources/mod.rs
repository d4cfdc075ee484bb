//! CPU-side resources that feed the binding core.
//!
//! - [`Texture`]: shared texture handle whose pixels may arrive later
//! - [`UniformData`]: reactive set of numeric and texture fields
//! - [`InstanceArray`]: fixed-capacity array of struct elements

pub(crate) mod field;
mod instances;
mod texture;
mod uniforms;

pub use field::FieldValue;
pub use instances::InstanceArray;
pub use texture::{LoadedCallback, Texture, TextureSampler, TextureSource};
pub use uniforms::{
    ChangeListener, RebuildListener, UniformBufferDescriptor, UniformData, UniformKind, UniformRegistry,
};
