//! Layout Engine
//!
//! Computes size, alignment and member offsets for WGSL host-shareable
//! types and renders struct declarations for shader composition.
//!
//! - [`TypeDescriptor`]: recursive shape of a value (scalar, vector, matrix,
//!   named struct, array)
//! - [`Struct`]: a named, laid-out struct
//! - [`StructRegistry`]: name → struct table used to resolve nested structs

mod structs;
mod types;

pub use structs::{LayoutEntry, Struct, StructRegistry};
pub use types::{ScalarType, TypeDescriptor, TypeLayout, align_to};
