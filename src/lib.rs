//! Sigil: the binding, layout and resource core of a wgpu renderer.
//!
//! - [`layout`]: WGSL memory layout of host-shareable structs
//! - [`buffer`]: numeric buffers that notify subscribers on real changes
//! - [`binding`]: binding slots, bind group layouts and WGSL declarations
//! - [`resources`]: textures, reactive uniform sets, instance arrays
//! - [`gpu`]: the cached, reference-counted [`ResourceManager`]

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod binding;
pub mod buffer;
pub mod errors;
pub mod gpu;
pub mod layout;
pub mod resources;
pub mod settings;

pub use binding::{BindGroupLayout, Binding, BindingContext, BindingKind};
pub use buffer::{BufferData, ChangeMonitor};
pub use errors::{Result, SigilError};
pub use gpu::{BindingValue, BindingValues, GpuBackend, HeadlessBackend, ResourceKey, ResourceManager, WgpuBackend};
pub use layout::{Struct, StructRegistry, TypeDescriptor};
pub use resources::{FieldValue, InstanceArray, Texture, TextureSampler, UniformData};
pub use settings::ResourceSettings;
