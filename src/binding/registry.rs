//! Name and slot lookup for bindings.

use rustc_hash::FxHashMap;

use crate::binding::Binding;

/// Bindings indexed by name and, once placed, by `(group, binding)`.
///
/// Shader composition resolves bindings through this table purely by name.
#[derive(Debug, Default, Clone)]
pub struct BindingRegistry {
    by_name: FxHashMap<String, Binding>,
    by_slot: FxHashMap<(u32, u32), String>,
}

impl BindingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `binding` under its name, replacing an earlier binding of
    /// the same name.
    pub fn register(&mut self, binding: Binding) {
        if let (Some(group), Some(index)) = (binding.group(), binding.index()) {
            self.by_slot.insert((group, index), binding.name().to_string());
        }
        if let Some(previous) = self.by_name.insert(binding.name().to_string(), binding) {
            log::debug!("Binding `{}` re-registered", previous.name());
            self.forget_slot(&previous);
        }
    }

    /// Stamps a placement onto a registered binding. Returns `false` if no
    /// binding of that name is registered.
    pub(crate) fn place(&mut self, name: &str, group_name: &str, group: u32, index: u32) -> bool {
        let Some(binding) = self.by_name.get_mut(name) else {
            return false;
        };
        let previous = (binding.group(), binding.index());
        binding.place(group_name, group, index);
        if let (Some(g), Some(i)) = previous
            && (g, i) != (group, index)
            && self.by_slot.get(&(g, i)).is_some_and(|n| n == name)
        {
            self.by_slot.remove(&(g, i));
        }
        self.by_slot.insert((group, index), name.to_string());
        true
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Binding> {
        self.by_name.get(name)
    }

    /// Bindings for each known name, in the order asked. Unknown names are
    /// skipped.
    #[must_use]
    pub fn get_by_names(&self, names: &[&str]) -> Vec<&Binding> {
        names.iter().filter_map(|n| self.by_name.get(*n)).collect()
    }

    #[must_use]
    pub fn get_by_indices(&self, group: u32, binding: u32) -> Option<&Binding> {
        self.by_slot
            .get(&(group, binding))
            .and_then(|name| self.by_name.get(name))
    }

    #[inline]
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        let binding = self.by_name.remove(name)?;
        self.forget_slot(&binding);
        Some(binding)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn forget_slot(&mut self, binding: &Binding) {
        if let (Some(group), Some(index)) = (binding.group(), binding.index())
            && self.by_slot.get(&(group, index)).is_some_and(|n| n == binding.name())
            && !self.by_name.get(binding.name()).is_some_and(|b| b.group() == Some(group) && b.index() == Some(index))
        {
            self.by_slot.remove(&(group, index));
        }
    }
}
