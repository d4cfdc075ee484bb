//! Named structs, their member layout and the struct registry.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::{Result, SigilError};
use crate::layout::types::{TypeDescriptor, align_to};

/// Placement of one struct member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutEntry {
    /// Member name as declared.
    pub name: String,
    /// Byte offset from the start of the struct.
    pub offset: u64,
    /// Byte size of the member itself; a `vec3f` reports 12.
    pub size: u64,
    /// Byte alignment of the member's type.
    pub alignment: u64,
    /// Declared type.
    pub ty: TypeDescriptor,
}

/// A named struct with its members laid out in declaration order.
///
/// Immutable once built. Nested structs are referenced by name and must be
/// present in the [`StructRegistry`] the struct is built against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Struct {
    name: String,
    members: Vec<LayoutEntry>,
    size: u64,
    alignment: u64,
}

impl Struct {
    /// Lays out `members` in declaration order.
    ///
    /// Each member's offset is the running offset aligned to the member's
    /// alignment, and the running offset then advances by the member's stride
    /// (its size rounded up to its alignment), so a `vec3` reserves the full
    /// 16 bytes it aligns to. The struct size is the final offset aligned to
    /// the largest member alignment. A runtime-sized array is only accepted
    /// as the last member and contributes no size.
    pub fn new<N, I>(name: impl Into<String>, members: I, structs: &StructRegistry) -> Result<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, TypeDescriptor)>,
    {
        let name = name.into();
        let members: Vec<(String, TypeDescriptor)> =
            members.into_iter().map(|(n, ty)| (n.into(), ty)).collect();

        if members.is_empty() {
            return Err(SigilError::InvalidType(format!("struct `{name}` has no members")));
        }

        let mut seen = FxHashSet::default();
        let mut entries = Vec::with_capacity(members.len());
        let mut offset = 0u64;
        let mut alignment = 1u64;
        let last = members.len() - 1;

        for (index, (member_name, ty)) in members.into_iter().enumerate() {
            if !seen.insert(member_name.clone()) {
                return Err(SigilError::InvalidType(format!(
                    "struct `{name}` declares `{member_name}` twice"
                )));
            }
            if ty.is_runtime_sized() && index != last {
                return Err(SigilError::InvalidType(format!(
                    "runtime-sized member `{member_name}` must be the last member of `{name}`"
                )));
            }
            if structs.references(&ty, &name) {
                return Err(SigilError::InvalidType(format!(
                    "struct `{name}` contains itself through `{member_name}`"
                )));
            }

            let layout = ty.layout(structs)?;
            offset = align_to(offset, layout.alignment);
            entries.push(LayoutEntry {
                name: member_name,
                offset,
                size: layout.size,
                alignment: layout.alignment,
                ty,
            });
            offset += layout.stride();
            alignment = alignment.max(layout.alignment);
        }

        Ok(Self {
            name,
            members: entries,
            size: align_to(offset, alignment),
            alignment,
        })
    }

    /// Builds a struct from WGSL type spellings, e.g. `("color", "vec4f")`.
    pub fn from_type_names<'a, I>(name: impl Into<String>, members: I, structs: &StructRegistry) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let members = members
            .into_iter()
            .map(|(n, ty)| ty.parse::<TypeDescriptor>().map(|ty| (n, ty)))
            .collect::<Result<Vec<_>>>()?;
        Self::new(name, members, structs)
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    #[inline]
    #[must_use]
    pub fn members(&self) -> &[LayoutEntry] {
        &self.members
    }

    #[must_use]
    pub fn member(&self, name: &str) -> Option<&LayoutEntry> {
        self.members.iter().find(|m| m.name == name)
    }

    /// The struct's own declaration, without nested structs.
    ///
    /// Members whose reserved space exceeds their size (`vec3`) carry an
    /// explicit `@size` so the shader sees the same offsets as the host.
    #[must_use]
    pub fn wgsl_body(&self) -> String {
        let mut code = format!("struct {} {{\n", self.name);
        for member in &self.members {
            let reserved = align_to(member.size, member.alignment);
            if reserved > member.size {
                code.push_str(&format!(
                    "    @size({}) {}: {},\n",
                    reserved,
                    member.name,
                    member.ty.wgsl_name()
                ));
            } else {
                code.push_str(&format!("    {}: {},\n", member.name, member.ty.wgsl_name()));
            }
        }
        code.push_str("}\n");
        code
    }

    /// WGSL declarations for every struct this one depends on, followed by
    /// this struct. Each nested struct is emitted once, before its first user.
    #[must_use]
    pub fn to_wgsl(&self, structs: &StructRegistry) -> String {
        let mut defs = Vec::new();
        let mut inserted = FxHashSet::default();
        inserted.insert(self.name.clone());
        for member in &self.members {
            collect_wgsl_defs(&member.ty, structs, &mut defs, &mut inserted);
        }
        defs.push(self.wgsl_body());
        defs.join("\n")
    }

    /// Hash of the declaration, stable across processes.
    #[must_use]
    pub fn schema_hash(&self) -> u64 {
        xxh3_64(self.wgsl_body().as_bytes())
    }
}

fn collect_wgsl_defs(
    ty: &TypeDescriptor,
    structs: &StructRegistry,
    defs: &mut Vec<String>,
    inserted: &mut FxHashSet<String>,
) {
    match ty {
        TypeDescriptor::Array { element, .. } => collect_wgsl_defs(element, structs, defs, inserted),
        TypeDescriptor::Struct(name) => {
            if inserted.contains(name) {
                return;
            }
            inserted.insert(name.clone());
            let Some(nested) = structs.get(name) else {
                log::warn!("Struct `{name}` is no longer registered; skipping its declaration");
                return;
            };
            for member in nested.members() {
                collect_wgsl_defs(&member.ty, structs, defs, inserted);
            }
            defs.push(nested.wgsl_body());
        }
        _ => {}
    }
}

/// Name → struct table shared by layout computation and shader composition.
///
/// Registering a name twice through [`set`](Self::set) replaces the earlier
/// struct and logs a warning; [`set_unique`](Self::set_unique) refuses.
#[derive(Debug, Default, Clone)]
pub struct StructRegistry {
    structs: FxHashMap<String, Arc<Struct>>,
}

impl StructRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Struct>> {
        self.structs.get(name)
    }

    #[inline]
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.structs.contains_key(name)
    }

    /// Registers `s`, replacing any struct of the same name.
    pub fn set(&mut self, s: Struct) -> Arc<Struct> {
        let s = Arc::new(s);
        if let Some(previous) = self.structs.insert(s.name.clone(), Arc::clone(&s))
            && previous.as_ref() != s.as_ref()
        {
            log::warn!("Struct `{}` re-registered with a different layout", s.name);
        }
        s
    }

    /// Registers `s`, failing with [`SigilError::SchemaConflict`] if the
    /// name is taken.
    pub fn set_unique(&mut self, s: Struct) -> Result<Arc<Struct>> {
        if self.has(&s.name) {
            return Err(SigilError::SchemaConflict(s.name));
        }
        Ok(self.set(s))
    }

    /// Builds and registers a struct in one step.
    pub fn define<N, I>(&mut self, name: impl Into<String>, members: I) -> Result<Arc<Struct>>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, TypeDescriptor)>,
    {
        let s = Struct::new(name, members, self)?;
        Ok(self.set(s))
    }

    /// [`define`](Self::define) from WGSL type spellings.
    pub fn define_from_type_names<'a, I>(&mut self, name: impl Into<String>, members: I) -> Result<Arc<Struct>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let s = Struct::from_type_names(name, members, self)?;
        Ok(self.set(s))
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Struct>> {
        self.structs.remove(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.structs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    /// Declarations for several structs and everything they depend on, with
    /// each struct emitted once, dependencies first.
    pub fn declarations<'a, I>(&self, names: I) -> Result<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut defs = Vec::new();
        let mut inserted = FxHashSet::default();
        for name in names {
            if !self.has(name) {
                return Err(SigilError::InvalidType(format!("unknown struct `{name}`")));
            }
            collect_wgsl_defs(&TypeDescriptor::named(name), self, &mut defs, &mut inserted);
        }
        Ok(defs.join("\n"))
    }

    /// Returns `true` if `ty` reaches the struct called `target`.
    fn references(&self, ty: &TypeDescriptor, target: &str) -> bool {
        let mut visited = FxHashSet::default();
        self.references_inner(ty, target, &mut visited)
    }

    fn references_inner<'a>(&'a self, ty: &'a TypeDescriptor, target: &str, visited: &mut FxHashSet<&'a str>) -> bool {
        match ty {
            TypeDescriptor::Array { element, .. } => self.references_inner(element, target, visited),
            TypeDescriptor::Struct(name) => {
                if name == target {
                    return true;
                }
                if !visited.insert(name.as_str()) {
                    return false;
                }
                self.get(name).is_some_and(|s| {
                    s.members()
                        .iter()
                        .any(|m| self.references_inner(&m.ty, target, visited))
                })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_reserves_its_alignment() {
        let registry = StructRegistry::new();
        let s = Struct::from_type_names("Probe", [("a", "vec3f"), ("b", "f32")], &registry).unwrap();
        assert_eq!(s.member("a").unwrap().offset, 0);
        assert_eq!(s.member("a").unwrap().size, 12);
        assert_eq!(s.member("a").unwrap().alignment, 16);
        assert_eq!(s.member("b").unwrap().offset, 16);
        assert_eq!(s.size(), 32);
        assert!(s.wgsl_body().contains("@size(16) a: vec3f,"));
    }

    #[test]
    fn scalar_after_vec3_struct_member_lands_on_sixteen() {
        let mut registry = StructRegistry::new();
        registry.define_from_type_names("Inner", [("a", "vec3f")]).unwrap();
        let s = Struct::from_type_names("Outer", [("inner", "Inner"), ("b", "f32")], &registry).unwrap();
        assert_eq!(s.member("b").unwrap().offset, 16);
        assert_eq!(s.size(), 32);
    }

    #[test]
    fn offsets_are_multiples_of_alignment() {
        let registry = StructRegistry::new();
        let s = Struct::from_type_names(
            "Mixed",
            [("a", "f32"), ("b", "vec2f"), ("c", "f32"), ("d", "mat3x3f"), ("e", "vec3f"), ("f", "u32")],
            &registry,
        )
        .unwrap();
        for m in s.members() {
            assert_eq!(m.offset % m.alignment, 0, "{} misaligned", m.name);
        }
        assert_eq!(s.member("b").unwrap().offset, 8);
        assert_eq!(s.member("d").unwrap().offset, 32);
        assert_eq!(s.member("e").unwrap().offset, 80);
        assert_eq!(s.member("f").unwrap().offset, 96);
        assert_eq!(s.size(), 112);
        assert_eq!(s.alignment(), 16);
    }

    #[test]
    fn runtime_array_must_be_last() {
        let registry = StructRegistry::new();
        let ok = Struct::from_type_names("Lights", [("count", "u32"), ("items", "array<vec4f>")], &registry).unwrap();
        assert_eq!(ok.member("items").unwrap().offset, 16);
        assert_eq!(ok.size(), 16);

        let err = Struct::from_type_names("Bad", [("items", "array<vec4f>"), ("count", "u32")], &registry);
        assert!(matches!(err, Err(SigilError::InvalidType(_))));
    }

    #[test]
    fn self_reference_is_rejected_even_with_stale_entry() {
        let mut registry = StructRegistry::new();
        registry.define_from_type_names("Node", [("value", "f32")]).unwrap();
        let err = Struct::from_type_names("Node", [("next", "array<Node, 2>")], &registry);
        assert!(matches!(err, Err(SigilError::InvalidType(_))));
    }

    #[test]
    fn set_replaces_and_set_unique_refuses() {
        let mut registry = StructRegistry::new();
        registry.define_from_type_names("A", [("x", "f32")]).unwrap();
        let replacement = Struct::from_type_names("A", [("x", "vec4f")], &registry).unwrap();
        registry.set(replacement);
        assert_eq!(registry.get("A").unwrap().size(), 16);

        let again = Struct::from_type_names("A", [("y", "f32")], &registry).unwrap();
        assert_eq!(registry.set_unique(again), Err(SigilError::SchemaConflict("A".into())));
    }

    #[test]
    fn nested_declarations_emitted_once_and_first() {
        let mut registry = StructRegistry::new();
        registry.define_from_type_names("Light", [("color", "vec4f"), ("intensity", "f32")]).unwrap();
        let scene = registry
            .define_from_type_names("Scene", [("key", "Light"), ("fill", "Light"), ("extra", "array<Light, 4>")])
            .unwrap();
        let wgsl = scene.to_wgsl(&registry);
        assert_eq!(wgsl.matches("struct Light {").count(), 1);
        assert!(wgsl.find("struct Light {").unwrap() < wgsl.find("struct Scene {").unwrap());
        assert!(wgsl.contains("extra: array<Light, 4>,"));
    }

    #[test]
    fn schema_hash_tracks_declaration() {
        let registry = StructRegistry::new();
        let a = Struct::from_type_names("S", [("x", "f32")], &registry).unwrap();
        let b = Struct::from_type_names("S", [("x", "f32")], &registry).unwrap();
        let c = Struct::from_type_names("S", [("x", "vec2f")], &registry).unwrap();
        assert_eq!(a.schema_hash(), b.schema_hash());
        assert_ne!(a.schema_hash(), c.schema_hash());
    }
}
