//! Type descriptors and the memory layout rules for WGSL host-shareable types.

use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, SigilError};
use crate::layout::StructRegistry;

/// Rounds `offset` up to the next multiple of `alignment`.
///
/// An alignment of 0 or 1 leaves the offset untouched.
#[inline]
#[must_use]
pub fn align_to(offset: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return offset;
    }
    offset.div_ceil(alignment) * alignment
}

/// 32-bit scalar component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// 32-bit float
    F32,
    /// 32-bit signed integer
    I32,
    /// 32-bit unsigned integer
    U32,
}

impl ScalarType {
    /// WGSL spelling of the scalar (`f32`, `i32`, `u32`).
    #[must_use]
    pub fn wgsl_name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::I32 => "i32",
            Self::U32 => "u32",
        }
    }

    /// Shorthand suffix used by predeclared aliases such as `vec3f`.
    #[must_use]
    pub fn suffix(self) -> char {
        match self {
            Self::F32 => 'f',
            Self::I32 => 'i',
            Self::U32 => 'u',
        }
    }

    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'f' => Some(Self::F32),
            'i' => Some(Self::I32),
            'u' => Some(Self::U32),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "f32" => Some(Self::F32),
            "i32" => Some(Self::I32),
            "u32" => Some(Self::U32),
            _ => None,
        }
    }
}

/// Recursive description of a value's shape.
///
/// Struct members are referenced by name and resolved through a
/// [`StructRegistry`] when the layout is computed, so a descriptor may name a
/// struct that is registered later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A single 32-bit component.
    Scalar(ScalarType),
    /// `vecN<scalar>` with 2 to 4 components.
    Vector { scalar: ScalarType, components: u8 },
    /// Square `f32` matrix with `columns` columns of `columns` rows.
    Matrix { columns: u8 },
    /// A struct registered under this name.
    Struct(String),
    /// Fixed-length array. A `count` of 0 denotes a runtime-sized array.
    Array { element: Box<TypeDescriptor>, count: u32 },
}

/// Size and alignment of a type, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeLayout {
    /// Bytes occupied, excluding trailing stride padding.
    pub size: u64,
    /// Required offset multiple.
    pub alignment: u64,
}

impl TypeLayout {
    /// Distance between consecutive array elements of this type.
    #[inline]
    #[must_use]
    pub fn stride(&self) -> u64 {
        align_to(self.size, self.alignment)
    }
}

impl TypeDescriptor {
    #[must_use]
    pub fn f32() -> Self {
        Self::Scalar(ScalarType::F32)
    }

    #[must_use]
    pub fn i32() -> Self {
        Self::Scalar(ScalarType::I32)
    }

    #[must_use]
    pub fn u32() -> Self {
        Self::Scalar(ScalarType::U32)
    }

    /// `f32` vector with `components` lanes.
    #[must_use]
    pub fn vec(components: u8) -> Self {
        Self::Vector {
            scalar: ScalarType::F32,
            components,
        }
    }

    /// Square `f32` matrix.
    #[must_use]
    pub fn mat(columns: u8) -> Self {
        Self::Matrix { columns }
    }

    #[must_use]
    pub fn array(element: TypeDescriptor, count: u32) -> Self {
        Self::Array {
            element: Box::new(element),
            count,
        }
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Struct(name.into())
    }

    /// Returns `true` for arrays whose length is only known at runtime.
    #[must_use]
    pub fn is_runtime_sized(&self) -> bool {
        matches!(self, Self::Array { count: 0, .. })
    }

    /// The WGSL spelling of this type.
    #[must_use]
    pub fn wgsl_name(&self) -> String {
        match self {
            Self::Scalar(s) => s.wgsl_name().to_string(),
            Self::Vector { scalar, components } => format!("vec{}{}", components, scalar.suffix()),
            Self::Matrix { columns } => format!("mat{columns}x{columns}f"),
            Self::Struct(name) => name.clone(),
            Self::Array { element, count: 0 } => format!("array<{}>", element.wgsl_name()),
            Self::Array { element, count } => format!("array<{}, {}>", element.wgsl_name(), count),
        }
    }

    /// Computes size and alignment following the WGSL host-shareable rules.
    ///
    /// | Type          | Size                 | Alignment            |
    /// |---------------|----------------------|----------------------|
    /// | scalar        | 4                    | 4                    |
    /// | `vec2`        | 8                    | 8                    |
    /// | `vec3`        | 12                   | 16                   |
    /// | `vec4`        | 16                   | 16                   |
    /// | `matNxN`      | N × stride(vecN)     | align(vecN)          |
    /// | struct        | its padded size      | max member alignment |
    /// | `array<T, n>` | n × stride(T)        | align(T)             |
    pub fn layout(&self, structs: &StructRegistry) -> Result<TypeLayout> {
        match self {
            Self::Scalar(_) => Ok(TypeLayout {
                size: 4,
                alignment: 4,
            }),
            Self::Vector { components, .. } => vector_layout(*components),
            Self::Matrix { columns } => {
                let column = vector_layout(*columns)?;
                Ok(TypeLayout {
                    size: u64::from(*columns) * column.stride(),
                    alignment: column.alignment,
                })
            }
            Self::Struct(name) => structs
                .get(name)
                .map(|s| TypeLayout {
                    size: s.size(),
                    alignment: s.alignment(),
                })
                .ok_or_else(|| SigilError::InvalidType(format!("unknown struct `{name}`"))),
            Self::Array { element, count } => {
                if element.is_runtime_sized() {
                    return Err(SigilError::InvalidType(format!(
                        "runtime-sized array cannot be an array element: {}",
                        self.wgsl_name()
                    )));
                }
                let element = element.layout(structs)?;
                Ok(TypeLayout {
                    size: element.stride() * u64::from(*count),
                    alignment: element.alignment,
                })
            }
        }
    }
}

fn vector_layout(components: u8) -> Result<TypeLayout> {
    let alignment = match components {
        2 => 8,
        3 | 4 => 16,
        n => return Err(SigilError::InvalidType(format!("vectors have 2 to 4 components, got {n}"))),
    };
    Ok(TypeLayout {
        size: 4 * u64::from(components),
        alignment,
    })
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wgsl_name())
    }
}

impl FromStr for TypeDescriptor {
    type Err = SigilError;

    /// Parses WGSL type spellings: `f32`, `vec3f`, `vec3<f32>`, `mat4x4f`,
    /// `mat3x3<f32>`, `array<T, N>`, `array<T>` and struct identifiers.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || SigilError::InvalidType(s.to_string());

        if let Some(scalar) = ScalarType::from_name(s) {
            return Ok(Self::Scalar(scalar));
        }

        if let Some(inner) = s.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
            return match split_top_level_comma(inner) {
                Some((element, count)) => {
                    let count = count.trim().parse::<u32>().map_err(|_| invalid())?;
                    Ok(Self::array(element.parse()?, count))
                }
                None => Ok(Self::array(inner.parse()?, 0)),
            };
        }

        if let Some(rest) = s.strip_prefix("vec").filter(|r| r.starts_with(|c: char| c.is_ascii_digit())) {
            let mut chars = rest.chars();
            let components = chars
                .next()
                .and_then(|c| c.to_digit(10))
                .ok_or_else(invalid)? as u8;
            let scalar = parse_component_suffix(chars.as_str()).ok_or_else(invalid)?;
            if !(2..=4).contains(&components) {
                return Err(invalid());
            }
            return Ok(Self::Vector { scalar, components });
        }

        if let Some(rest) = s.strip_prefix("mat").filter(|r| is_matrix_shape(r)) {
            let bytes = rest.as_bytes();
            let columns = bytes[0] - b'0';
            let rows = bytes[2] - b'0';
            if columns != rows || !(2..=4).contains(&columns) {
                return Err(invalid());
            }
            return match parse_component_suffix(&rest[3..]) {
                Some(ScalarType::F32) => Ok(Self::Matrix { columns }),
                _ => Err(invalid()),
            };
        }

        if is_identifier(s) {
            return Ok(Self::Struct(s.to_string()));
        }
        Err(invalid())
    }
}

/// Accepts `f`, `i`, `u`, `<f32>`, `<i32>` and `<u32>`.
fn parse_component_suffix(rest: &str) -> Option<ScalarType> {
    if let Some(name) = rest.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
        return ScalarType::from_name(name.trim());
    }
    let mut chars = rest.chars();
    let suffix = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    ScalarType::from_suffix(suffix)
}

/// `<digit>x<digit>` prefix of a matrix spelling.
fn is_matrix_shape(rest: &str) -> bool {
    let bytes = rest.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_digit() && bytes[1] == b'x' && bytes[2].is_ascii_digit()
}

fn split_top_level_comma(inner: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut split = None;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => split = Some(i),
            _ => {}
        }
    }
    split.map(|i| (&inner[..i], &inner[i + 1..]))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_of(name: &str) -> TypeLayout {
        let ty: TypeDescriptor = name.parse().unwrap();
        ty.layout(&StructRegistry::default()).unwrap()
    }

    #[test]
    fn align_to_is_idempotent_and_bounded() {
        for alignment in [1u64, 4, 8, 16, 32] {
            for offset in 0u64..70 {
                let aligned = align_to(offset, alignment);
                assert_eq!(align_to(aligned, alignment), aligned);
                assert!(offset <= aligned && aligned < offset + alignment);
                assert_eq!(aligned % alignment, 0);
            }
        }
    }

    #[test]
    fn scalar_and_vector_layouts() {
        assert_eq!(layout_of("f32"), TypeLayout { size: 4, alignment: 4 });
        assert_eq!(layout_of("vec2f"), TypeLayout { size: 8, alignment: 8 });
        assert_eq!(layout_of("vec3<f32>"), TypeLayout { size: 12, alignment: 16 });
        assert_eq!(layout_of("vec4u"), TypeLayout { size: 16, alignment: 16 });
    }

    #[test]
    fn matrix_columns_are_padded() {
        assert_eq!(layout_of("mat2x2f"), TypeLayout { size: 16, alignment: 8 });
        assert_eq!(layout_of("mat3x3f"), TypeLayout { size: 48, alignment: 16 });
        assert_eq!(layout_of("mat4x4<f32>"), TypeLayout { size: 64, alignment: 16 });
    }

    #[test]
    fn array_stride_uses_element_alignment() {
        assert_eq!(layout_of("array<f32, 5>"), TypeLayout { size: 20, alignment: 4 });
        assert_eq!(layout_of("array<vec3f, 2>"), TypeLayout { size: 32, alignment: 16 });
        assert_eq!(layout_of("array<array<vec2f, 2>, 3>"), TypeLayout { size: 48, alignment: 8 });
        assert_eq!(layout_of("array<vec4f>"), TypeLayout { size: 0, alignment: 16 });
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for bad in ["vec5f", "vec3x", "mat3x4f", "mat4x4i", "array<f32, n>", "3d", ""] {
            assert!(
                matches!(bad.parse::<TypeDescriptor>(), Err(SigilError::InvalidType(_))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn struct_names_may_start_like_builtins() {
        assert_eq!("material".parse::<TypeDescriptor>().unwrap(), TypeDescriptor::named("material"));
        assert_eq!("vector_data".parse::<TypeDescriptor>().unwrap(), TypeDescriptor::named("vector_data"));
    }

    #[test]
    fn unknown_struct_is_invalid_type() {
        let ty = TypeDescriptor::named("Missing");
        assert!(matches!(
            ty.layout(&StructRegistry::default()),
            Err(SigilError::InvalidType(_))
        ));
    }

    #[test]
    fn wgsl_names_round_trip_through_parse() {
        for name in ["f32", "vec3f", "mat4x4f", "array<vec4f, 8>", "array<Light>"] {
            let ty: TypeDescriptor = name.parse().unwrap();
            assert_eq!(ty.wgsl_name(), name);
        }
    }
}
