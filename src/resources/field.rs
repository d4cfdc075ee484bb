//! Values stored in a uniform set.

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use crate::errors::{Result, SigilError};
use crate::layout::{ScalarType, TypeDescriptor};
use crate::resources::Texture;

/// A uniform field value.
///
/// Numeric values are flat `f32` lists whose length determines the WGSL
/// type: 1 → `f32`, 2..=4 → `vecN<f32>`, 9 → `mat3x3<f32>`,
/// 16 → `mat4x4<f32>`, any other non-zero length → `array<f32, N>`.
/// Matrices are column-major.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(f32),
    Vector(SmallVec<[f32; 16]>),
    Texture(Texture),
}

impl FieldValue {
    #[must_use]
    pub fn vector(values: &[f32]) -> Self {
        Self::Vector(SmallVec::from_slice(values))
    }

    #[must_use]
    pub fn is_texture(&self) -> bool {
        matches!(self, Self::Texture(_))
    }

    #[must_use]
    pub fn as_texture(&self) -> Option<&Texture> {
        match self {
            Self::Texture(t) => Some(t),
            _ => None,
        }
    }

    /// Number of `f32` components, or `None` for textures.
    #[must_use]
    pub fn component_count(&self) -> Option<usize> {
        match self {
            Self::Scalar(_) => Some(1),
            Self::Vector(v) => Some(v.len()),
            Self::Texture(_) => None,
        }
    }

    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn components(&self) -> Option<&[f32]> {
        match self {
            Self::Scalar(v) => Some(std::slice::from_ref(v)),
            Self::Vector(v) => Some(v),
            Self::Texture(_) => None,
        }
    }

    /// WGSL type of a numeric value.
    pub fn type_descriptor(&self) -> Result<TypeDescriptor> {
        let count = self
            .component_count()
            .ok_or_else(|| SigilError::InvalidType("textures have no numeric layout".to_string()))?;
        type_for_components(count)
    }
}

pub(crate) fn type_for_components(count: usize) -> Result<TypeDescriptor> {
    Ok(match count {
        0 => return Err(SigilError::InvalidType("empty numeric value".to_string())),
        1 => TypeDescriptor::Scalar(ScalarType::F32),
        2..=4 => TypeDescriptor::vec(count as u8),
        9 => TypeDescriptor::mat(3),
        16 => TypeDescriptor::mat(4),
        n => TypeDescriptor::array(TypeDescriptor::f32(), n as u32),
    })
}

/// Positions, in `f32` units relative to the field offset, of each component
/// of a value of `count` components. Only `mat3` is sparse: each column is
/// padded to 16 bytes.
pub(crate) fn component_slots(count: usize) -> SmallVec<[usize; 16]> {
    if count == 9 {
        (0..9).map(|i| (i / 3) * 4 + i % 3).collect()
    } else {
        (0..count).collect()
    }
}

/// Writes `components` into `dst` at their layout slots.
pub(crate) fn scatter(components: &[f32], dst: &mut [f32]) {
    for (value, slot) in components.iter().zip(component_slots(components.len())) {
        if let Some(d) = dst.get_mut(slot) {
            *d = *value;
        }
    }
}

/// Reads `count` components back out of their layout slots.
pub(crate) fn gather(src: &[f32], count: usize) -> SmallVec<[f32; 16]> {
    component_slots(count)
        .into_iter()
        .map(|slot| src.get(slot).copied().unwrap_or(0.0))
        .collect()
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        Self::Scalar(v)
    }
}

impl From<Vec2> for FieldValue {
    fn from(v: Vec2) -> Self {
        Self::vector(&v.to_array())
    }
}

impl From<Vec3> for FieldValue {
    fn from(v: Vec3) -> Self {
        Self::vector(&v.to_array())
    }
}

impl From<Vec4> for FieldValue {
    fn from(v: Vec4) -> Self {
        Self::vector(&v.to_array())
    }
}

impl From<Mat3> for FieldValue {
    fn from(m: Mat3) -> Self {
        Self::vector(&m.to_cols_array())
    }
}

impl From<Mat4> for FieldValue {
    fn from(m: Mat4) -> Self {
        Self::vector(&m.to_cols_array())
    }
}

impl<const N: usize> From<[f32; N]> for FieldValue {
    fn from(v: [f32; N]) -> Self {
        if N == 1 {
            Self::Scalar(v[0])
        } else {
            Self::vector(&v)
        }
    }
}

impl From<&[f32]> for FieldValue {
    fn from(v: &[f32]) -> Self {
        if v.len() == 1 {
            Self::Scalar(v[0])
        } else {
            Self::vector(v)
        }
    }
}

impl From<Texture> for FieldValue {
    fn from(t: Texture) -> Self {
        Self::Texture(t)
    }
}

impl From<&Texture> for FieldValue {
    fn from(t: &Texture) -> Self {
        Self::Texture(t.clone())
    }
}
