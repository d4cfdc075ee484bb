//! Binding Descriptor
//!
//! Declares resource slots ([`Binding`]) and groups them into
//! [`BindGroupLayout`]s.
//!
//! # Placement
//!
//! A binding carries no indices until a layout places it: the layout
//! resolves its group name through the [`GroupPolicy`] (`Global` → 0,
//! `Mesh` → 1, `Material` → 2, others in order of first use) and gives each
//! binding the index of its position. The placement is stamped back onto
//! the registered binding so shader composition can find it by name or by
//! `(group, binding)`.
//!
//! ```rust,ignore
//! let mut ctx = BindingContext::default();
//! let camera = Binding::builder("camera").with_struct("Camera").build(&mut ctx.bindings);
//! let layout = BindGroupLayout::new("frame", "Global", vec![camera], &mut ctx)?;
//! assert_eq!(ctx.bindings.get_by_indices(0, 0).unwrap().name(), "camera");
//! ```

mod context;
mod descriptor;
mod group;
mod registry;

pub use context::BindingContext;
pub use descriptor::{
    Binding, BindingBuilder, BindingKind, BufferBindingKind, StorageAccess, TextureBindingLayout,
};
pub use group::{BindGroupLayout, GLOBAL_GROUP, GroupPolicy, MATERIAL_GROUP, MESH_GROUP};
pub use registry::BindingRegistry;
