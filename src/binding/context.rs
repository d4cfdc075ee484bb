use crate::binding::{BindingRegistry, GroupPolicy};
use crate::layout::StructRegistry;
use crate::settings::ResourceSettings;

/// The name tables shared by layout computation, binding placement and
/// shader composition.
///
/// Passed by reference instead of living in process-wide statics, so
/// several renderers (or tests) can hold independent tables.
#[derive(Debug, Clone, Default)]
pub struct BindingContext {
    pub structs: StructRegistry,
    pub bindings: BindingRegistry,
    pub groups: GroupPolicy,
}

impl BindingContext {
    #[must_use]
    pub fn new(settings: &ResourceSettings) -> Self {
        Self {
            structs: StructRegistry::new(),
            bindings: BindingRegistry::new(),
            groups: GroupPolicy::new(settings.max_bind_groups),
        }
    }
}
