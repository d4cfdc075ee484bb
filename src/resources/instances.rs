//! Fixed-capacity instance arrays.
//!
//! An [`InstanceArray`] stores up to `capacity` elements of a registered
//! [`Struct`] back to back in one reactive buffer, ready to be bound as a
//! read-only storage array (`array<Element>`). The capacity never grows:
//! pushing into a full array is reported and leaves the array untouched.

use std::ops::Range;
use std::sync::Arc;

use crate::binding::{Binding, StorageAccess};
use crate::buffer::{BufferData, ChangeCallback};
use crate::errors::{Result, SigilError};
use crate::layout::{LayoutEntry, ScalarType, Struct, TypeDescriptor};
use crate::resources::FieldValue;
use crate::resources::field::{gather, scatter};

#[derive(Debug)]
pub struct InstanceArray {
    name: String,
    element: Arc<Struct>,
    capacity: usize,
    len: usize,
    /// Element stride in `f32` units.
    stride: usize,
    buffer: BufferData<f32>,
}

impl InstanceArray {
    pub fn new(name: impl Into<String>, element: Arc<Struct>, capacity: usize) -> Result<Self> {
        let name = name.into();
        for member in element.members() {
            if component_count(&member.ty).is_none() {
                return Err(SigilError::InvalidType(format!(
                    "instance member `{}.{}` of type {} is not f32-based",
                    element.name(),
                    member.name,
                    member.ty
                )));
            }
        }
        let stride = (element.size() / 4) as usize;
        Ok(Self {
            buffer: BufferData::new(stride * capacity),
            name,
            element,
            capacity,
            len: 0,
            stride,
        })
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    #[inline]
    #[must_use]
    pub fn element(&self) -> &Arc<Struct> {
        &self.element
    }

    /// Bytes of the live elements.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.len * self.stride * 4;
        &self.buffer.as_bytes()[..end]
    }

    /// Appends an element. Fields not listed are zero.
    ///
    /// Returns the new element's index, or
    /// [`SigilError::CapacityExceeded`] when the array is full.
    pub fn push(&mut self, fields: &[(&str, FieldValue)]) -> Result<usize> {
        if self.is_full() {
            log::warn!("InstanceArray `{}` is full ({} elements)", self.name, self.capacity);
            return Err(SigilError::CapacityExceeded {
                what: format!("instance array `{}`", self.name),
                capacity: self.capacity,
            });
        }

        let mut element = vec![0.0f32; self.stride];
        for (field, value) in fields {
            let member = self.member(field)?;
            let components = numeric_components(member, value)?;
            let start = (member.offset / 4) as usize;
            scatter(components, &mut element[start..start + (member.size / 4) as usize]);
        }

        let index = self.len;
        self.buffer.set(&element, index * self.stride)?;
        self.len += 1;
        Ok(index)
    }

    /// Overwrites one field of element `index`. Returns whether the stored
    /// bytes changed.
    pub fn set(&mut self, index: usize, field: &str, value: impl Into<FieldValue>) -> Result<bool> {
        let value = value.into();
        self.check_index(index)?;
        let member = self.member(field)?;
        let components = numeric_components(member, &value)?;
        let start = index * self.stride + (member.offset / 4) as usize;
        let len = (member.size / 4) as usize;

        let mut window = self
            .buffer
            .window(start..start + len)
            .map(<[f32]>::to_vec)
            .unwrap_or_default();
        scatter(components, &mut window);
        self.buffer.set(&window, start)
    }

    #[must_use]
    pub fn get(&self, index: usize, field: &str) -> Option<FieldValue> {
        if index >= self.len {
            return None;
        }
        let member = self.element.member(field)?;
        let count = component_count(&member.ty)?;
        let start = index * self.stride + (member.offset / 4) as usize;
        let values = gather(self.buffer.window(start..start + (member.size / 4) as usize)?, count);
        Some(if count == 1 {
            FieldValue::Scalar(values[0])
        } else {
            FieldValue::Vector(values)
        })
    }

    /// Removes element `index` by moving the last element into its place.
    pub fn swap_remove(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let last = self.len - 1;
        if index != last {
            let src = last * self.stride..(last + 1) * self.stride;
            self.buffer.copy_within(src, index * self.stride)?;
        }
        self.buffer
            .fill(0.0, last * self.stride..(last + 1) * self.stride)?;
        self.len -= 1;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        let end = self.len * self.stride;
        self.buffer.fill(0.0, 0..end)?;
        self.len = 0;
        Ok(())
    }

    /// Subscribes to element writes; ranges are in `f32` units.
    pub fn subscribe(&mut self, callback: ChangeCallback<f32>) -> bool {
        self.buffer.subscribe(callback)
    }

    /// Byte range of the live elements.
    #[must_use]
    pub fn live_range(&self) -> Range<u64> {
        0..(self.len * self.stride * 4) as u64
    }

    /// Read-only storage binding declaring `array<Element>`.
    #[must_use]
    pub fn storage_binding(&self) -> Binding {
        Binding::builder(self.name.clone())
            .storage(StorageAccess::Read)
            .with_struct(self.element.name())
            .var(format!("st_{}", self.name), format!("array<{}>", self.element.name()))
            .finish()
    }

    fn member(&self, field: &str) -> Result<&LayoutEntry> {
        self.element.member(field).ok_or_else(|| {
            SigilError::ResourceNotFound(format!("field `{field}` of `{}`", self.element.name()))
        })
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(SigilError::ResourceNotFound(format!(
                "element {index} of instance array `{}` ({} live)",
                self.name, self.len
            )));
        }
        Ok(())
    }
}

fn component_count(ty: &TypeDescriptor) -> Option<usize> {
    match ty {
        TypeDescriptor::Scalar(ScalarType::F32) => Some(1),
        TypeDescriptor::Vector {
            scalar: ScalarType::F32,
            components,
        } => Some(usize::from(*components)),
        TypeDescriptor::Matrix { columns } => Some(usize::from(*columns) * usize::from(*columns)),
        _ => None,
    }
}

fn numeric_components<'a>(member: &LayoutEntry, value: &'a FieldValue) -> Result<&'a [f32]> {
    let expected = component_count(&member.ty).unwrap_or(0);
    match value.components() {
        Some(c) if c.len() == expected => Ok(c),
        _ => Err(SigilError::InvalidType(format!(
            "field `{}` expects {} ({} components)",
            member.name, member.ty, expected
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StructRegistry;

    fn sprite() -> Arc<Struct> {
        let mut structs = StructRegistry::new();
        structs
            .define_from_type_names("Sprite", [("offset", "vec2f"), ("scale", "f32")])
            .unwrap()
    }

    #[test]
    fn push_past_capacity_is_rejected() {
        let mut sprites = InstanceArray::new("sprites", sprite(), 2).unwrap();
        sprites.push(&[("scale", 1.0f32.into())]).unwrap();
        sprites.push(&[("scale", 2.0f32.into())]).unwrap();
        let before = sprites.as_bytes().to_vec();

        let err = sprites.push(&[("scale", 3.0f32.into())]).unwrap_err();
        assert!(matches!(err, SigilError::CapacityExceeded { capacity: 2, .. }));
        assert_eq!(sprites.len(), 2);
        assert_eq!(sprites.as_bytes(), before.as_slice());
    }

    #[test]
    fn swap_remove_moves_last_element() {
        let mut sprites = InstanceArray::new("sprites", sprite(), 4).unwrap();
        for scale in [1.0f32, 2.0, 3.0] {
            sprites.push(&[("scale", scale.into())]).unwrap();
        }
        sprites.swap_remove(0).unwrap();
        assert_eq!(sprites.len(), 2);
        assert_eq!(sprites.get(0, "scale"), Some(FieldValue::Scalar(3.0)));
        assert_eq!(sprites.get(2, "scale"), None);
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let mut sprites = InstanceArray::new("sprites", sprite(), 1).unwrap();
        let err = sprites.push(&[("offset", 1.0f32.into())]).unwrap_err();
        assert!(matches!(err, SigilError::InvalidType(_)));
        assert!(sprites.is_empty());
    }
}
