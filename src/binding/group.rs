//! Bind group naming policy and `BindGroupLayout`.

use std::cell::Cell;

use rustc_hash::FxHashMap;

use crate::binding::{Binding, BindingContext};
use crate::errors::{Result, SigilError};
use crate::gpu::{ResourceId, hash_layout_entries};
use crate::layout::StructRegistry;

pub const GLOBAL_GROUP: &str = "Global";
pub const MESH_GROUP: &str = "Mesh";
pub const MATERIAL_GROUP: &str = "Material";

// ============================================================================
// Group Policy
// ============================================================================

/// Maps group names to stable bind group indices.
///
/// `Global`, `Mesh` and `Material` are fixed at 0, 1 and 2. Any other name
/// receives the next free index on first use, up to `max_groups`.
#[derive(Debug, Clone)]
pub struct GroupPolicy {
    indices: FxHashMap<String, u32>,
    next: u32,
    max_groups: u32,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self::new(crate::settings::DEFAULT_MAX_BIND_GROUPS)
    }
}

impl GroupPolicy {
    #[must_use]
    pub fn new(max_groups: u32) -> Self {
        let mut indices = FxHashMap::default();
        indices.insert(GLOBAL_GROUP.to_string(), 0);
        indices.insert(MESH_GROUP.to_string(), 1);
        indices.insert(MATERIAL_GROUP.to_string(), 2);
        Self {
            indices,
            next: 3,
            max_groups,
        }
    }

    #[must_use]
    pub fn index_of(&self, group_name: &str) -> Option<u32> {
        self.indices.get(group_name).copied()
    }

    /// Index for `group_name`, assigning the next free one if needed.
    pub fn resolve(&mut self, group_name: &str) -> Result<u32> {
        if let Some(index) = self.index_of(group_name) {
            return Ok(index);
        }
        if self.next >= self.max_groups {
            log::warn!("No bind group slot left for `{group_name}`");
            return Err(SigilError::CapacityExceeded {
                what: format!("bind groups (requested by `{group_name}`)"),
                capacity: self.max_groups as usize,
            });
        }
        let index = self.next;
        self.next += 1;
        self.indices.insert(group_name.to_string(), index);
        log::debug!("Bind group `{group_name}` assigned index {index}");
        Ok(index)
    }
}

// ============================================================================
// Bind Group Layout
// ============================================================================

/// Ordered bindings of one bind group. A binding's index is its position.
#[derive(Debug, Clone)]
pub struct BindGroupLayout {
    name: String,
    group_name: String,
    group_index: u32,
    bindings: Vec<Binding>,
    entries: Vec<wgpu::BindGroupLayoutEntry>,
    key: u64,
    native: Cell<Option<ResourceId>>,
}

impl BindGroupLayout {
    /// Places `bindings` in `group_name` at indices 0..n and stamps the
    /// placement back onto registered bindings of the same name.
    pub fn new(
        name: impl Into<String>,
        group_name: impl Into<String>,
        mut bindings: Vec<Binding>,
        ctx: &mut BindingContext,
    ) -> Result<Self> {
        let name = name.into();
        let group_name = group_name.into();
        let group_index = ctx.groups.resolve(&group_name)?;

        let mut entries = Vec::with_capacity(bindings.len());
        for (index, binding) in bindings.iter_mut().enumerate() {
            let index = index as u32;
            binding.place(&group_name, group_index, index);
            entries.push(binding.layout_entry()?);
            ctx.bindings.place(binding.name(), &group_name, group_index, index);
        }

        let key = hash_layout_entries(&entries);
        log::debug!(
            "BindGroupLayout `{name}` placed {} bindings in group {group_index} ({group_name})",
            bindings.len()
        );
        Ok(Self {
            name,
            group_name,
            group_index,
            bindings,
            entries,
            key,
            native: Cell::new(None),
        })
    }

    /// A new layout with the same name and group whose bindings are the
    /// existing ones followed by `extra`. Existing indices are unchanged.
    pub fn extend_copy(&self, extra: Vec<Binding>, ctx: &mut BindingContext) -> Result<Self> {
        let mut bindings = self.bindings.clone();
        bindings.extend(extra);
        Self::new(self.name.clone(), self.group_name.clone(), bindings, ctx)
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    #[inline]
    #[must_use]
    pub fn group_index(&self) -> u32 {
        self.group_index
    }

    #[inline]
    #[must_use]
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[wgpu::BindGroupLayoutEntry] {
        &self.entries
    }

    /// Content hash of the layout entries; equal layouts share one native
    /// layout object.
    #[inline]
    #[must_use]
    pub fn key(&self) -> u64 {
        self.key
    }

    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name() == name)
    }

    /// Id of the realized native layout, once
    /// [`ResourceManager::create_bind_group_layout`](crate::gpu::ResourceManager::create_bind_group_layout)
    /// has run for this layout.
    #[inline]
    #[must_use]
    pub fn native_id(&self) -> Option<ResourceId> {
        self.native.get()
    }

    pub(crate) fn set_native_id(&self, id: ResourceId) {
        self.native.set(Some(id));
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.group_name == GLOBAL_GROUP
    }

    #[must_use]
    pub fn is_mesh(&self) -> bool {
        self.group_name == MESH_GROUP
    }

    #[must_use]
    pub fn is_material(&self) -> bool {
        self.group_name == MATERIAL_GROUP
    }

    /// Struct declarations used by the buffer bindings, followed by one
    /// variable declaration per binding.
    pub fn wgsl_declarations(&self, structs: &StructRegistry) -> Result<String> {
        let struct_names: Vec<&str> = self.bindings.iter().filter_map(Binding::struct_name).collect();
        let mut code = format!("// --- Bindings: {} (Group {}) ---\n", self.name, self.group_index);
        if !struct_names.is_empty() {
            code.push_str(&structs.declarations(struct_names)?);
            code.push('\n');
        }
        for binding in &self.bindings {
            code.push_str(&binding.to_wgsl()?);
            code.push('\n');
        }
        Ok(code)
    }
}
