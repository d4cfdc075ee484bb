//! Reactive Uniform Set
//!
//! [`UniformData`] is a named bag of numeric and texture fields. Numeric
//! fields share one contiguous `f32` buffer laid out with the WGSL rules;
//! textures live beside it.
//!
//! # Value update vs. rebuild
//!
//! Writing a field that already exists with the same shape writes straight
//! into its slot and raises `on_change` if the bytes changed. The buffer is
//! never reallocated on this path.
//!
//! Adding or removing a field, or changing a field's shape, is a *rebuild*:
//! the layout is recomputed in encounter order, a new buffer is allocated
//! when the numeric layout changed (values of surviving fields are copied,
//! truncated to the smaller size), and `on_rebuild` is raised so owners can
//! request new bind groups.
//!
//! A texture that is still loading is kept aside until its loaded edge
//! fires; only then is it added to the schema, with a single rebuild.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Range;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::binding::{BindGroupLayout, Binding, BindingContext, StorageAccess};
use crate::buffer::{BufferData, ChangeCallback};
use crate::errors::{Result, SigilError};
use crate::gpu::{BindingValue, BindingValues, ResourceId, generate_resource_id};
use crate::layout::{Struct, StructRegistry};
use crate::resources::field::{gather, scatter, type_for_components};
use crate::resources::{FieldValue, Texture};
use crate::settings::ResourceSettings;

/// `on_change` listener: `(uniform id, field name, new value)`.
pub type ChangeListener = Rc<dyn Fn(ResourceId, &str, &FieldValue)>;

/// `on_rebuild` listener: `(uniform id)`.
pub type RebuildListener = Rc<dyn Fn(ResourceId)>;

/// Address space of the numeric buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UniformKind {
    #[default]
    Uniform,
    Storage,
}

impl UniformKind {
    #[must_use]
    pub fn buffer_usage(self) -> wgpu::BufferUsages {
        match self {
            Self::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            Self::Storage => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
            }
        }
    }
}

/// Everything needed to create the native buffer of a uniform set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBufferDescriptor {
    pub label: String,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
    pub offset: u64,
    pub data: Vec<u8>,
}

enum Outcome {
    Unchanged,
    Changed,
    Rebuilt,
}

struct UniformInner {
    id: ResourceId,
    name: String,
    global: bool,
    kind: UniformKind,
    settings: ResourceSettings,

    /// Numeric fields in encounter order, with their component counts.
    fields: Vec<(String, usize)>,
    layout: Option<Struct>,
    buffer: BufferData<f32>,
    generation: u64,
    schema_version: u64,

    textures: Vec<(String, Texture)>,
    pending: Vec<(String, Texture)>,

    dirty: Rc<Cell<Option<Range<usize>>>>,
    dirty_listener: ChangeCallback<f32>,

    on_change: Vec<ChangeListener>,
    on_rebuild: Vec<RebuildListener>,
}

impl UniformInner {
    fn has_numeric(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    fn fields_without(&self, name: &str) -> Vec<(String, usize)> {
        self.fields.iter().filter(|(n, _)| n != name).cloned().collect()
    }

    /// Recomputes the numeric layout for `fields`. The buffer is only
    /// replaced when the layout differs from the current one.
    fn rebuild(&mut self, fields: Vec<(String, usize)>) -> Result<()> {
        let layout = if fields.is_empty() {
            None
        } else {
            let members = fields
                .iter()
                .map(|(n, count)| type_for_components(*count).map(|ty| (n.clone(), ty)))
                .collect::<Result<Vec<_>>>()?;
            Some(Struct::new(
                format!("Struct_{}", self.name),
                members,
                &StructRegistry::new(),
            )?)
        };

        if layout != self.layout {
            let len = layout
                .as_ref()
                .map_or(0, |s| (self.settings.uniform_buffer_size(s.size()) / 4) as usize);
            let mut buffer = BufferData::new(len);
            if let (Some(old), Some(new)) = (&self.layout, &layout) {
                for entry in new.members() {
                    let Some(prev) = old.member(&entry.name) else {
                        continue;
                    };
                    let count = (prev.size.min(entry.size) / 4) as usize;
                    let src = (prev.offset / 4) as usize;
                    if let Some(values) = self.buffer.window(src..src + count) {
                        buffer.set_silent(values, (entry.offset / 4) as usize)?;
                    }
                }
            }

            self.buffer.unsubscribe(None);
            buffer.subscribe(Rc::clone(&self.dirty_listener));
            self.buffer = buffer;
            self.generation = generate_resource_id();
            self.dirty.set((len > 0).then_some(0..len));
            log::debug!(
                "UniformData `{}` reallocated: {} bytes (generation {})",
                self.name,
                len * 4,
                self.generation
            );
        }

        self.layout = layout;
        self.fields = fields;
        self.schema_version += 1;
        Ok(())
    }

    /// Puts `texture` into the existing texture slot `name`, or returns
    /// `None` if there is no such slot. A texture that needs a different
    /// layout entry or sampler kind than its predecessor changes the
    /// schema, so the set is rebuilt.
    fn swap_texture(&mut self, name: &str, texture: &Texture) -> Result<Option<Outcome>> {
        let Some(slot) = self.textures.iter_mut().find(|(n, _)| n == name) else {
            return Ok(None);
        };
        if &slot.1 == texture {
            return Ok(Some(Outcome::Unchanged));
        }
        let same_layout = slot.1.binding_layout() == texture.binding_layout()
            && slot.1.sampler().binding_type() == texture.sampler().binding_type();
        slot.1 = texture.clone();
        if same_layout {
            return Ok(Some(Outcome::Changed));
        }

        log::debug!(
            "UniformData `{}`: texture `{name}` now binds as {:?}",
            self.name,
            texture.binding_layout()
        );
        let fields = self.fields.clone();
        self.rebuild(fields)?;
        Ok(Some(Outcome::Rebuilt))
    }

    fn write_field(&mut self, name: &str, components: &[f32]) -> Result<bool> {
        let entry = self
            .layout
            .as_ref()
            .and_then(|l| l.member(name))
            .ok_or_else(|| SigilError::ResourceNotFound(format!("field `{name}` of `{}`", self.name)))?;
        let start = (entry.offset / 4) as usize;
        let len = (entry.size / 4) as usize;
        let mut window = self
            .buffer
            .window(start..start + len)
            .map(<[f32]>::to_vec)
            .unwrap_or_default();
        scatter(components, &mut window);
        self.buffer.set(&window, start)
    }

    fn read_field(&self, name: &str) -> Option<FieldValue> {
        let (_, count) = self.fields.iter().find(|(n, _)| n == name)?;
        let entry = self.layout.as_ref()?.member(name)?;
        let start = (entry.offset / 4) as usize;
        let window = self.buffer.window(start..start + (entry.size / 4) as usize)?;
        let values = gather(window, *count);
        Some(if *count == 1 {
            FieldValue::Scalar(values[0])
        } else {
            FieldValue::Vector(values)
        })
    }
}

/// Shared handle to a reactive uniform set.
#[derive(Clone)]
pub struct UniformData(Rc<RefCell<UniformInner>>);

impl fmt::Debug for UniformData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("UniformData")
            .field("id", &inner.id)
            .field("name", &inner.name)
            .field("fields", &inner.fields)
            .field("textures", &inner.textures.len())
            .field("generation", &inner.generation)
            .finish_non_exhaustive()
    }
}

impl PartialEq for UniformData {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl UniformData {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, UniformKind::Uniform, ResourceSettings::default())
    }

    #[must_use]
    pub fn with_kind(name: impl Into<String>, kind: UniformKind, settings: ResourceSettings) -> Self {
        let dirty = Rc::new(Cell::new(None::<Range<usize>>));
        let sink = Rc::clone(&dirty);
        let dirty_listener: ChangeCallback<f32> = Rc::new(move |_: &[f32], range: Range<usize>| {
            let merged = match sink.take() {
                Some(current) => current.start.min(range.start)..current.end.max(range.end),
                None => range,
            };
            sink.set(Some(merged));
        });

        let mut buffer = BufferData::new(0);
        buffer.subscribe(Rc::clone(&dirty_listener));

        Self(Rc::new(RefCell::new(UniformInner {
            id: generate_resource_id(),
            name: name.into(),
            global: false,
            kind,
            settings,
            fields: Vec::new(),
            layout: None,
            buffer,
            generation: generate_resource_id(),
            schema_version: 0,
            textures: Vec::new(),
            pending: Vec::new(),
            dirty,
            dirty_listener,
            on_change: Vec::new(),
            on_rebuild: Vec::new(),
        })))
    }

    // ========================================================================
    // Identity
    // ========================================================================

    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.0.borrow().id
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    #[must_use]
    pub fn kind(&self) -> UniformKind {
        self.0.borrow().kind
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0.borrow().global
    }

    pub fn set_global(&self, global: bool) {
        self.0.borrow_mut().global = global;
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Sets `name` to `value`, adding the field if it does not exist.
    pub fn set(&self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        let outcome = match &value {
            FieldValue::Texture(texture) => self.set_texture(name, texture)?,
            numeric => self.set_numeric(name, numeric)?,
        };
        self.dispatch(&outcome, name, &value);
        Ok(())
    }

    /// Same as [`set`](Self::set); reads better at call sites that introduce
    /// a field.
    pub fn add(&self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        self.set(name, value)
    }

    fn set_numeric(&self, name: &str, value: &FieldValue) -> Result<Outcome> {
        let components = value.components().unwrap_or_default();
        type_for_components(components.len())?;

        let mut inner = self.0.borrow_mut();
        let same_shape = inner
            .fields
            .iter()
            .any(|(n, count)| n == name && *count == components.len());
        let is_texture = inner.textures.iter().any(|(n, _)| n == name);

        if same_shape && !is_texture {
            let changed = inner.write_field(name, components)?;
            return Ok(if changed { Outcome::Changed } else { Outcome::Unchanged });
        }

        let mut fields = inner.fields.clone();
        match fields.iter_mut().find(|(n, _)| n == name) {
            Some(field) => field.1 = components.len(),
            None => fields.push((name.to_string(), components.len())),
        }
        inner.rebuild(fields)?;
        inner.textures.retain(|(n, _)| n != name);
        inner.pending.retain(|(n, _)| n != name);
        inner.write_field(name, components)?;
        Ok(Outcome::Rebuilt)
    }

    fn set_texture(&self, name: &str, texture: &Texture) -> Result<Outcome> {
        if !texture.is_loaded() {
            {
                let mut inner = self.0.borrow_mut();
                if inner.pending.iter().any(|(n, t)| n == name && t == texture) {
                    return Ok(Outcome::Unchanged);
                }
                inner.pending.retain(|(n, _)| n != name);
                inner.pending.push((name.to_string(), texture.clone()));
            }
            log::debug!("Texture `{}` for `{name}` is not loaded yet; deferring", texture.name());

            let weak: Weak<RefCell<UniformInner>> = Rc::downgrade(&self.0);
            let field = name.to_string();
            texture.on_loaded(Some(Box::new(move |loaded: &Texture| {
                if let Some(inner) = weak.upgrade() {
                    UniformData(inner).texture_loaded(&field, loaded);
                }
            })))?;
            return Ok(Outcome::Unchanged);
        }

        let mut inner = self.0.borrow_mut();
        inner.pending.retain(|(n, _)| n != name);
        if let Some(outcome) = inner.swap_texture(name, texture)? {
            return Ok(outcome);
        }

        let fields = inner.fields_without(name);
        inner.rebuild(fields)?;
        inner.textures.push((name.to_string(), texture.clone()));
        Ok(Outcome::Rebuilt)
    }

    fn texture_loaded(&self, name: &str, texture: &Texture) {
        let outcome = {
            let mut inner = self.0.borrow_mut();
            let Some(pos) = inner.pending.iter().position(|(n, t)| n == name && t == texture) else {
                return;
            };
            inner.pending.remove(pos);

            match inner.swap_texture(name, texture) {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    let fields = inner.fields_without(name);
                    if let Err(e) = inner.rebuild(fields) {
                        log::error!("UniformData `{}` failed to add texture `{name}`: {e}", inner.name);
                        return;
                    }
                    inner.textures.push((name.to_string(), texture.clone()));
                    Outcome::Rebuilt
                }
                Err(e) => {
                    log::error!("UniformData `{}` failed to swap texture `{name}`: {e}", inner.name);
                    return;
                }
            }
        };
        self.dispatch(&outcome, name, &FieldValue::Texture(texture.clone()));
    }

    /// Removes a field. Returns `false` (and logs) if no such field exists.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let outcome = {
            let mut inner = self.0.borrow_mut();
            let pending = inner.pending.len();
            inner.pending.retain(|(n, _)| n != name);
            let was_pending = inner.pending.len() != pending;

            let is_texture = inner.textures.iter().any(|(n, _)| n == name);
            if inner.has_numeric(name) || is_texture {
                let fields = inner.fields_without(name);
                inner.rebuild(fields)?;
                inner.textures.retain(|(n, _)| n != name);
                Outcome::Rebuilt
            } else if was_pending {
                Outcome::Unchanged
            } else {
                log::warn!("UniformData `{}` has no field `{name}` to remove", inner.name);
                return Ok(false);
            }
        };
        if let Outcome::Rebuilt = outcome {
            self.fire_rebuild();
        }
        Ok(true)
    }

    /// Current value of a field. Textures that are still loading are
    /// reported as well.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<FieldValue> {
        let inner = self.0.borrow();
        if let Some(value) = inner.read_field(name) {
            return Some(value);
        }
        inner
            .pending
            .iter()
            .chain(inner.textures.iter())
            .find(|(n, _)| n == name)
            .map(|(_, t)| FieldValue::Texture(t.clone()))
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        let inner = self.0.borrow();
        inner.has_numeric(name) || inner.textures.iter().any(|(n, _)| n == name)
    }

    /// Numeric field names in layout order, followed by texture names.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        let inner = self.0.borrow();
        inner
            .fields
            .iter()
            .map(|(n, _)| n.clone())
            .chain(inner.textures.iter().map(|(n, _)| n.clone()))
            .collect()
    }

    /// `(offset, size)` in bytes of a numeric field.
    #[must_use]
    pub fn field_layout(&self, name: &str) -> Option<(u64, u64)> {
        let inner = self.0.borrow();
        let entry = inner.layout.as_ref()?.member(name)?;
        Some((entry.offset, entry.size))
    }

    #[must_use]
    pub fn textures(&self) -> Vec<(String, Texture)> {
        self.0.borrow().textures.clone()
    }

    #[must_use]
    pub fn pending_texture_count(&self) -> usize {
        self.0.borrow().pending.len()
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn on_change(&self, listener: Option<ChangeListener>) -> Result<()> {
        let listener = listener.ok_or(SigilError::MissingCallback("UniformData::on_change"))?;
        self.0.borrow_mut().on_change.push(listener);
        Ok(())
    }

    pub fn on_rebuild(&self, listener: Option<RebuildListener>) -> Result<()> {
        let listener = listener.ok_or(SigilError::MissingCallback("UniformData::on_rebuild"))?;
        self.0.borrow_mut().on_rebuild.push(listener);
        Ok(())
    }

    fn dispatch(&self, outcome: &Outcome, name: &str, value: &FieldValue) {
        match outcome {
            Outcome::Unchanged => {}
            Outcome::Changed => {
                let (id, listeners) = {
                    let inner = self.0.borrow();
                    (inner.id, inner.on_change.clone())
                };
                for listener in listeners {
                    listener(id, name, value);
                }
            }
            Outcome::Rebuilt => self.fire_rebuild(),
        }
    }

    fn fire_rebuild(&self) {
        let (id, listeners) = {
            let inner = self.0.borrow();
            (inner.id, inner.on_rebuild.clone())
        };
        log::debug!("UniformData {id} rebuilt; notifying {} listeners", listeners.len());
        for listener in listeners {
            listener(id);
        }
    }

    // ========================================================================
    // Buffer
    // ========================================================================

    /// Changes whenever the numeric buffer is reallocated.
    #[must_use]
    pub fn buffer_generation(&self) -> u64 {
        self.0.borrow().generation
    }

    /// Incremented on every rebuild, including texture-only ones.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.0.borrow().schema_version
    }

    #[must_use]
    pub fn buffer_size(&self) -> u64 {
        self.0.borrow().buffer.as_bytes().len() as u64
    }

    pub fn with_buffer<R>(&self, f: impl FnOnce(&BufferData<f32>) -> R) -> R {
        f(&self.0.borrow().buffer)
    }

    #[must_use]
    pub fn buffer_bytes(&self) -> Vec<u8> {
        self.0.borrow().buffer.as_bytes().to_vec()
    }

    /// Byte range written since the last call, if any.
    pub fn take_dirty_range(&self) -> Option<Range<u64>> {
        let inner = self.0.borrow();
        inner
            .dirty
            .take()
            .map(|r| (r.start as u64 * 4)..(r.end as u64 * 4))
    }

    #[must_use]
    pub fn struct_layout(&self) -> Option<Struct> {
        self.0.borrow().layout.clone()
    }

    /// `None` when the set has no numeric fields.
    #[must_use]
    pub fn buffer_descriptor(&self) -> Option<UniformBufferDescriptor> {
        let inner = self.0.borrow();
        inner.layout.as_ref()?;
        Some(UniformBufferDescriptor {
            label: inner.name.clone(),
            size: inner.buffer.as_bytes().len() as u64,
            usage: inner.kind.buffer_usage(),
            offset: 0,
            data: inner.buffer.as_bytes().to_vec(),
        })
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// One buffer binding (if there are numeric fields), then a texture
    /// binding per texture and one sampler binding per distinct sampler
    /// kind.
    #[must_use]
    pub fn layout_bindings(&self) -> Vec<Binding> {
        let inner = self.0.borrow();
        let mut bindings = Vec::new();

        if let Some(layout) = &inner.layout {
            let builder = Binding::builder(inner.name.clone());
            let builder = match inner.kind {
                UniformKind::Uniform => builder.uniform(),
                UniformKind::Storage => builder.storage(StorageAccess::Read),
            };
            bindings.push(
                builder
                    .with_struct(layout.name())
                    .var(format!("u_{}", inner.name), layout.name())
                    .finish(),
            );
        }

        let mut sampler_kinds = Vec::new();
        for (field, texture) in &inner.textures {
            bindings.push(
                Binding::builder(field.clone())
                    .texture(texture.binding_layout())
                    .var(format!("t_{field}"), texture.binding_layout().wgsl_type())
                    .finish(),
            );
            let kind = texture.sampler().binding_type();
            if !sampler_kinds.contains(&kind) {
                sampler_kinds.push(kind);
                bindings.push(
                    Binding::builder(format!("{field}_sampler"))
                        .sampler(kind)
                        .var(
                            format!("s_{field}"),
                            if kind == wgpu::SamplerBindingType::Comparison {
                                "sampler_comparison"
                            } else {
                                "sampler"
                            },
                        )
                        .finish(),
                );
            }
        }
        bindings
    }

    /// Places [`layout_bindings`](Self::layout_bindings) in `group_name` and
    /// registers the numeric struct so the layout can emit its declaration.
    pub fn bind_group_layout(&self, group_name: &str, ctx: &mut BindingContext) -> Result<BindGroupLayout> {
        if let Some(layout) = self.struct_layout() {
            ctx.structs.set(layout);
        }
        BindGroupLayout::new(self.name(), group_name, self.layout_bindings(), ctx)
    }

    /// Values for the bindings produced by
    /// [`layout_bindings`](Self::layout_bindings).
    #[must_use]
    pub fn binding_values(&self) -> BindingValues {
        let mut values = BindingValues::new();
        let (name, has_buffer, textures) = {
            let inner = self.0.borrow();
            (inner.name.clone(), inner.layout.is_some(), inner.textures.clone())
        };
        if has_buffer {
            values.insert(name, BindingValue::Uniform(self.clone()));
        }
        let mut sampler_kinds = Vec::new();
        for (field, texture) in textures {
            let sampler = texture.sampler();
            if !sampler_kinds.contains(&sampler.binding_type()) {
                sampler_kinds.push(sampler.binding_type());
                values.insert(format!("{field}_sampler"), BindingValue::Sampler(sampler));
            }
            values.insert(field, BindingValue::Texture(texture));
        }
        values
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Uniform sets by name and by id.
#[derive(Debug, Default, Clone)]
pub struct UniformRegistry {
    by_id: FxHashMap<ResourceId, UniformData>,
    by_name: FxHashMap<String, ResourceId>,
}

impl UniformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `uniform`, replacing any set of the same name.
    pub fn set(&mut self, uniform: UniformData) {
        let id = uniform.id();
        if let Some(previous) = self.by_name.insert(uniform.name(), id)
            && previous != id
        {
            self.by_id.remove(&previous);
        }
        self.by_id.insert(id, uniform);
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&UniformData> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    #[must_use]
    pub fn get_by_id(&self, id: ResourceId) -> Option<&UniformData> {
        self.by_id.get(&id)
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<UniformData> {
        let id = self.by_name.remove(name)?;
        self.by_id.remove(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
