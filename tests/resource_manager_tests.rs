//! Resource Manager Tests
//!
//! Tests for:
//! - Leases: get-or-create idempotence, release, immediate destruction,
//!   separate key namespaces
//! - Texture generations: reshaped textures stay alive for their bind groups
//! - Eviction: retention window, leased entries survive
//! - Bind groups: index ordering, caching, deferral, validation
//! - Uniform uploads: dirty windows, buffer generations
//! - Pipelines, readback, backend failures
//!
//! Everything runs against `HeadlessBackend`, which records every native
//! call instead of talking to a device.

use std::cell::RefCell;
use std::rc::Rc;

use sigil::binding::{BindGroupLayout, Binding, BindingContext, TextureBindingLayout};
use sigil::errors::SigilError;
use sigil::gpu::{
    BindingValue, BindingValues, BufferDesc, HeadlessBackend, HeadlessEvent, ResourceKey, ResourceManager,
};
use sigil::resources::{Texture, TextureSampler, TextureSource, UniformData};
use sigil::settings::ResourceSettings;

fn manager() -> ResourceManager<HeadlessBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    ResourceManager::new(HeadlessBackend::new(), ResourceSettings::default())
}

fn storage_desc(size: u64) -> BufferDesc<'static> {
    BufferDesc {
        label: Some("storage"),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        contents: None,
    }
}

fn pixel() -> TextureSource {
    TextureSource::new_2d(1, 1, wgpu::TextureFormat::Rgba8Unorm, Some(vec![255; 4]))
}

fn two_by_two() -> TextureSource {
    TextureSource::new_2d(2, 2, wgpu::TextureFormat::Rgba8Unorm, Some(vec![0; 16]))
}

fn destroyed_textures(backend: &HeadlessBackend, handle: u64) -> usize {
    backend.count(|e| matches!(e, HeadlessEvent::DestroyTexture { id } if *id == handle))
}

/// Layout `[A: uniform @0, B: texture @1, C: sampler @2]`.
fn abc_layout(ctx: &mut BindingContext) -> BindGroupLayout {
    let a = Binding::builder("A").uniform().with_struct("Struct_params").finish();
    let b = Binding::builder("B").texture(TextureBindingLayout::default()).finish();
    let c = Binding::builder("C")
        .sampler(wgpu::SamplerBindingType::Filtering)
        .finish();
    BindGroupLayout::new("abc", "Material", vec![a, b, c], ctx).unwrap()
}

fn bind_group_events(backend: &HeadlessBackend) -> Vec<Vec<(u32, u64)>> {
    backend
        .events()
        .into_iter()
        .filter_map(|event| match event {
            HeadlessEvent::CreateBindGroup { entries, .. } => Some(entries),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Leases
// ============================================================================

#[test]
fn get_or_create_is_idempotent_and_counted() {
    let mut resources = manager();
    let first = resources.get_or_create_buffer(7, &storage_desc(64)).unwrap().id;
    let second = resources.get_or_create_buffer(7, &storage_desc(64)).unwrap().id;

    assert_eq!(first, second);
    assert_eq!(resources.ref_count(ResourceKey::Buffer(7)), Some(2));
    assert_eq!(resources.backend().count(|e| matches!(e, HeadlessEvent::CreateBuffer { .. })), 1);

    assert_eq!(resources.release(ResourceKey::Buffer(7)), Some(1));
    assert_eq!(resources.release(ResourceKey::Buffer(7)), Some(0));
    assert!(resources.get_buffer(7).is_none());
    assert_eq!(resources.ref_count(ResourceKey::Buffer(7)), None);
    assert_eq!(
        resources.backend().count(|e| matches!(e, HeadlessEvent::DestroyBuffer { id } if *id == first)),
        1
    );
}

#[test]
fn caller_ids_never_alias_uniform_generations() {
    let uniform = UniformData::new("params");
    uniform.set("x", 1.0f32).unwrap();
    let mut resources = manager();
    let generation = resources.update_uniforms(&uniform).unwrap().unwrap();

    let size = resources
        .get_or_create_buffer(generation, &storage_desc(4096))
        .unwrap()
        .size;
    assert_eq!(size, 4096);
    assert_eq!(resources.get_uniform_buffer(generation).unwrap().size, 16);
    assert_eq!(resources.stats().buffers, 2);

    assert_eq!(resources.ref_count(ResourceKey::Buffer(generation)), Some(1));
    assert_eq!(resources.ref_count(ResourceKey::Uniform(generation)), Some(0));

    assert_eq!(resources.release(ResourceKey::Buffer(generation)), Some(0));
    assert!(resources.get_buffer(generation).is_none());
    assert!(resources.get_uniform_buffer(generation).is_some());
}

#[test]
fn release_of_unknown_id_is_none() {
    let mut resources = manager();
    assert_eq!(resources.release(ResourceKey::Buffer(12345)), None);
    assert!(!resources.mark_used(ResourceKey::BindGroup(12345)));
}

// ============================================================================
// Eviction
// ============================================================================

#[test]
fn unleased_entries_expire_after_retention_window() {
    let mut resources = manager();
    let uniform = UniformData::new("params");
    uniform.set("x", 1.0f32).unwrap();
    let id = resources.update_uniforms(&uniform).unwrap().unwrap();
    assert_eq!(resources.ref_count(ResourceKey::Uniform(id)), Some(0));

    let sampler = TextureSampler::default();
    resources.get_or_create_sampler(&sampler).unwrap();

    let retention = resources.settings().retention_frames;
    for _ in 0..retention {
        resources.begin_frame();
    }
    assert!(resources.get_uniform_buffer(id).is_some());

    resources.begin_frame();
    assert!(resources.get_uniform_buffer(id).is_none());
    assert!(resources.get_sampler(&sampler).is_some());

    resources.release_sampler(&sampler);
    for _ in 0..=retention {
        resources.begin_frame();
    }
    assert!(resources.get_sampler(&sampler).is_none());
}

#[test]
fn mark_used_postpones_eviction() {
    let mut resources = manager();
    let uniform = UniformData::new("u");
    uniform.set("x", 0.5f32).unwrap();
    let id = resources.update_uniforms(&uniform).unwrap().unwrap();

    for _ in 0..50 {
        resources.begin_frame();
    }
    assert!(resources.mark_used(ResourceKey::Uniform(id)));
    for _ in 0..50 {
        resources.begin_frame();
    }
    assert!(resources.get_uniform_buffer(id).is_some());
}

// ============================================================================
// Bind groups
// ============================================================================

#[test]
fn bind_group_entries_follow_binding_indices() {
    let mut ctx = BindingContext::default();
    let layout = abc_layout(&mut ctx);

    let uniform = UniformData::new("params");
    uniform.set("x", 1.0f32).unwrap();
    let texture = Texture::from_source("map", pixel(), wgpu::TextureViewDimension::D2);
    let sampler = TextureSampler::default();

    // Filled in reverse order.
    let values = BindingValues::new()
        .with("C", BindingValue::Sampler(sampler))
        .with("B", BindingValue::Texture(texture.clone()))
        .with("A", BindingValue::Uniform(uniform.clone()));

    let mut resources = manager();
    let id = resources.create_bind_group(&layout, &values).unwrap().unwrap();

    let buffer = resources.get_uniform_buffer(uniform.buffer_generation()).unwrap().id;
    let tex = resources.get_texture(texture.id()).unwrap().id;
    let smp = resources.get_sampler(&sampler).unwrap().id;

    let created = bind_group_events(resources.backend());
    assert_eq!(created, vec![vec![(0, buffer), (1, tex), (2, smp)]]);
    assert_eq!(resources.get_bind_group(id).unwrap().entries, vec![(0, buffer), (1, tex), (2, smp)]);
    assert_eq!(layout.native_id(), Some(layout.key()));
}

#[test]
fn identical_requests_share_one_bind_group() {
    let mut ctx = BindingContext::default();
    let layout = abc_layout(&mut ctx);
    let uniform = UniformData::new("params");
    uniform.set("x", 1.0f32).unwrap();
    let texture = Texture::from_source("map", pixel(), wgpu::TextureViewDimension::D2);
    let values = BindingValues::new()
        .with("A", BindingValue::Uniform(uniform.clone()))
        .with("B", BindingValue::Texture(texture))
        .with("C", BindingValue::Sampler(TextureSampler::default()));

    let mut resources = manager();
    let first = resources.create_bind_group(&layout, &values).unwrap();
    let second = resources.create_bind_group(&layout, &values).unwrap();
    assert_eq!(first, second);
    let id = first.unwrap();
    assert_eq!(resources.ref_count(ResourceKey::BindGroup(id)), Some(2));
    assert_eq!(bind_group_events(resources.backend()).len(), 1);

    // A value update does not change the buffer, so the group is reused.
    uniform.set("x", 2.0f32).unwrap();
    assert_eq!(resources.create_bind_group(&layout, &values).unwrap(), Some(id));

    // A rebuild does.
    uniform.set("y", 3.0f32).unwrap();
    let rebuilt = resources.create_bind_group(&layout, &values).unwrap();
    assert_ne!(rebuilt, Some(id));
    assert_eq!(bind_group_events(resources.backend()).len(), 2);
}

#[test]
fn pending_texture_defers_the_bind_group() {
    let mut ctx = BindingContext::default();
    let layout = abc_layout(&mut ctx);
    let uniform = UniformData::new("params");
    uniform.set("x", 1.0f32).unwrap();
    let texture = Texture::pending("late", wgpu::TextureViewDimension::D2);
    let values = BindingValues::new()
        .with("A", BindingValue::Uniform(uniform))
        .with("B", BindingValue::Texture(texture.clone()))
        .with("C", BindingValue::Sampler(TextureSampler::default()));

    let mut resources = manager();
    assert_eq!(resources.create_bind_group(&layout, &values).unwrap(), None);
    assert!(bind_group_events(resources.backend()).is_empty());

    texture.finish_loading(pixel());
    assert!(resources.create_bind_group(&layout, &values).unwrap().is_some());
}

#[test]
fn reshaped_texture_outlives_the_bind_groups_holding_it() {
    let mut ctx = BindingContext::default();
    let layout = abc_layout(&mut ctx);
    let uniform = UniformData::new("params");
    uniform.set("x", 1.0f32).unwrap();
    let texture = Texture::from_source("map", pixel(), wgpu::TextureViewDimension::D2);
    let values = BindingValues::new()
        .with("A", BindingValue::Uniform(uniform))
        .with("B", BindingValue::Texture(texture.clone()))
        .with("C", BindingValue::Sampler(TextureSampler::default()));

    let mut resources = manager();
    let old_group = resources.create_bind_group(&layout, &values).unwrap().unwrap();
    let old_generation = resources.texture_generation(texture.id()).unwrap();
    let old_handle = resources.get_texture(texture.id()).unwrap().id;

    texture.finish_loading(two_by_two());
    let new_group = resources.create_bind_group(&layout, &values).unwrap().unwrap();
    assert_ne!(new_group, old_group);
    let new_generation = resources.texture_generation(texture.id()).unwrap();
    assert_ne!(new_generation, old_generation);

    // The old group still leases the 1x1 texture it was built over.
    assert!(resources.get_bind_group(old_group).is_some());
    assert_eq!(resources.get_texture_generation(old_generation).unwrap().id, old_handle);
    assert_eq!(destroyed_textures(resources.backend(), old_handle), 0);
    assert_eq!(resources.stats().textures, 2);

    assert_eq!(resources.release(ResourceKey::BindGroup(old_group)), Some(0));
    for _ in 0..=resources.settings().retention_frames {
        resources.begin_frame();
    }
    assert!(resources.get_bind_group(old_group).is_none());
    assert!(resources.get_texture_generation(old_generation).is_none());
    assert_eq!(destroyed_textures(resources.backend(), old_handle), 1);

    assert!(resources.get_bind_group(new_group).is_some());
    assert_eq!(resources.texture_generation(texture.id()), Some(new_generation));
}

#[test]
fn texture_leases_follow_a_reshape() {
    let texture = Texture::from_source("map", pixel(), wgpu::TextureViewDimension::D2);
    let mut resources = manager();
    assert_eq!(resources.get_or_create_texture(&texture).unwrap(), Some(texture.id()));
    let old_handle = resources.get_texture(texture.id()).unwrap().id;

    texture.finish_loading(two_by_two());
    assert_eq!(resources.get_or_create_texture(&texture).unwrap(), Some(texture.id()));

    // Nothing else held the 1x1 texture.
    assert_eq!(destroyed_textures(resources.backend(), old_handle), 1);
    assert_eq!(resources.stats().textures, 1);
    assert_eq!(resources.ref_count(ResourceKey::Texture(texture.id())), Some(2));

    assert_eq!(resources.release(ResourceKey::Texture(texture.id())), Some(1));
    assert_eq!(resources.release(ResourceKey::Texture(texture.id())), Some(0));
    assert!(resources.get_texture(texture.id()).is_none());
    assert_eq!(resources.release(ResourceKey::Texture(texture.id())), None);
}

#[test]
fn uniform_set_drives_its_own_layout() {
    let uniform = UniformData::new("material");
    uniform.set("roughness", 0.5f32).unwrap();
    uniform
        .set("albedo", Texture::from_source("albedo", pixel(), wgpu::TextureViewDimension::D2))
        .unwrap();

    let mut ctx = BindingContext::default();
    let layout = uniform.bind_group_layout("Material", &mut ctx).unwrap();
    let mut resources = manager();
    let id = resources.create_bind_group(&layout, &uniform.binding_values()).unwrap();
    assert!(id.is_some());
    assert_eq!(resources.stats().bind_groups, 1);
    assert_eq!(resources.stats().textures, 1);
    assert_eq!(resources.stats().samplers, 1);
}

#[test]
fn missing_or_mismatched_values_are_rejected() {
    let mut ctx = BindingContext::default();
    let layout = abc_layout(&mut ctx);
    let mut resources = manager();

    let uniform = UniformData::new("params");
    uniform.set("x", 1.0f32).unwrap();
    let missing = BindingValues::new().with("A", BindingValue::Uniform(uniform.clone()));
    assert!(matches!(
        resources.create_bind_group(&layout, &missing),
        Err(SigilError::BindingMismatch { binding, .. }) if binding == "B"
    ));

    let swapped = BindingValues::new()
        .with("A", BindingValue::Uniform(uniform))
        .with("B", BindingValue::Sampler(TextureSampler::default()))
        .with("C", BindingValue::Sampler(TextureSampler::default()));
    assert!(matches!(
        resources.create_bind_group(&layout, &swapped),
        Err(SigilError::BindingMismatch { binding, .. }) if binding == "B"
    ));
    assert!(bind_group_events(resources.backend()).is_empty());
}

#[test]
fn swept_bind_group_releases_its_dependencies() {
    let mut ctx = BindingContext::default();
    let layout = abc_layout(&mut ctx);
    let uniform = UniformData::new("params");
    uniform.set("x", 1.0f32).unwrap();
    let texture = Texture::from_source("map", pixel(), wgpu::TextureViewDimension::D2);
    let values = BindingValues::new()
        .with("A", BindingValue::Uniform(uniform.clone()))
        .with("B", BindingValue::Texture(texture.clone()))
        .with("C", BindingValue::Sampler(TextureSampler::default()));

    let mut resources = manager();
    let id = resources.create_bind_group(&layout, &values).unwrap().unwrap();
    let buffer = uniform.buffer_generation();
    assert_eq!(resources.ref_count(ResourceKey::Uniform(buffer)), Some(1));
    assert_eq!(resources.ref_count(ResourceKey::Texture(texture.id())), Some(1));

    assert_eq!(resources.release(ResourceKey::BindGroup(id)), Some(0));
    assert!(resources.get_bind_group(id).is_some());

    for _ in 0..=resources.settings().retention_frames {
        resources.begin_frame();
    }
    assert!(resources.get_bind_group(id).is_none());
    assert!(resources.get_uniform_buffer(buffer).is_none());
    assert!(resources.get_texture(texture.id()).is_none());
    assert_eq!(resources.stats().bind_group_layouts, 0);
}

// ============================================================================
// Uniform uploads
// ============================================================================

#[test]
fn value_updates_upload_only_the_dirty_window() {
    let uniform = UniformData::new("params");
    uniform.set("a", 1.0f32).unwrap();
    uniform.set("b", glam::Vec4::ZERO).unwrap();

    let mut resources = manager();
    let id = resources.update_uniforms(&uniform).unwrap().unwrap();
    resources.backend().clear_events();

    uniform.set("b", glam::Vec4::new(1.0, 2.0, 3.0, 4.0)).unwrap();
    assert_eq!(resources.update_uniforms(&uniform).unwrap(), Some(id));
    let handle = resources.get_uniform_buffer(id).unwrap();
    assert_eq!(
        resources.backend().events(),
        vec![HeadlessEvent::WriteBuffer {
            id: handle.id,
            offset: 16,
            len: 16
        }]
    );
    assert_eq!(handle.contents(), uniform.buffer_bytes());

    // Nothing dirty, nothing sent.
    resources.backend().clear_events();
    resources.update_uniforms(&uniform).unwrap();
    assert!(resources.backend().events().is_empty());
}

#[test]
fn rebuild_replaces_an_unleased_buffer() {
    let uniform = UniformData::new("params");
    uniform.set("a", 1.0f32).unwrap();
    let mut resources = manager();
    let old = resources.update_uniforms(&uniform).unwrap().unwrap();

    uniform.set("b", glam::Vec4::ONE).unwrap();
    let new = resources.update_uniforms(&uniform).unwrap().unwrap();
    assert_ne!(old, new);
    assert!(resources.get_uniform_buffer(old).is_none());
    assert_eq!(resources.get_uniform_buffer(new).unwrap().size, 32);
}

#[test]
fn uniform_without_numeric_fields_has_no_buffer() {
    let uniform = UniformData::new("textures_only");
    let mut resources = manager();
    assert_eq!(resources.update_uniforms(&uniform).unwrap(), None);
}

// ============================================================================
// Pipelines
// ============================================================================

#[test]
fn pipelines_are_built_once_per_key() {
    let mut ctx = BindingContext::default();
    let layout = abc_layout(&mut ctx);
    let mut resources = manager();

    let pipeline_layout = resources.get_or_create_pipeline_layout(&[&layout]).unwrap();
    assert_eq!(resources.get_or_create_pipeline_layout(&[&layout]).unwrap(), pipeline_layout);

    let builds = Rc::new(RefCell::new(0));
    for _ in 0..3 {
        let builds = Rc::clone(&builds);
        resources
            .get_or_create_render_pipeline(&("unlit", 1u32), pipeline_layout, move |_backend, layout| {
                *builds.borrow_mut() += 1;
                Ok(*layout)
            })
            .unwrap();
    }
    assert_eq!(*builds.borrow(), 1);

    let missing = resources.get_or_create_compute_pipeline("cull", 999, |_, layout| Ok(*layout));
    assert!(matches!(missing, Err(SigilError::ResourceNotFound(_))));
}

// ============================================================================
// Readback and failures
// ============================================================================

#[test]
fn readback_is_delivered_on_the_next_frame() {
    let mut resources = manager();
    let contents = [1u8, 2, 3, 4, 5, 6, 7, 8];
    resources
        .get_or_create_buffer(
            3,
            &BufferDesc {
                label: Some("results"),
                size: 8,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                contents: Some(&contents),
            },
        )
        .unwrap();

    let received = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&received);
    resources
        .request_readback(3, move |result| *sink.borrow_mut() = Some(result))
        .unwrap();
    assert!(received.borrow().is_none());
    assert_eq!(resources.stats().pending_readbacks, 1);

    resources.begin_frame();
    assert_eq!(*received.borrow(), Some(Ok(contents.to_vec())));
    assert_eq!(resources.stats().pending_readbacks, 0);

    assert!(matches!(
        resources.request_readback(99, |_| {}),
        Err(SigilError::ResourceNotFound(_))
    ));
}

#[test]
fn backend_failures_surface_as_errors() {
    let backend = HeadlessBackend::new().with_max_buffer_size(8);
    let mut resources = ResourceManager::new(backend, ResourceSettings::default());

    let err = resources.get_or_create_buffer(1, &storage_desc(64)).unwrap_err();
    assert!(matches!(err, SigilError::ResourceCreation(_)));
    assert!(resources.get_buffer(1).is_none());
    assert_eq!(resources.stats().buffers, 0);

    assert!(matches!(
        resources.update_buffer(1, 0, &[0; 4]),
        Err(SigilError::ResourceNotFound(_))
    ));
}

#[test]
fn update_buffer_checks_bounds() {
    let mut resources = manager();
    resources.get_or_create_buffer(5, &storage_desc(8)).unwrap();
    resources.update_buffer(5, 4, &[1, 2, 3, 4]).unwrap();
    assert!(matches!(
        resources.update_buffer(5, 6, &[1, 2, 3, 4]),
        Err(SigilError::CapacityExceeded { capacity: 8, .. })
    ));
    assert!(matches!(
        resources.update_buffer(5, u64::MAX - 1, &[1, 2, 3, 4]),
        Err(SigilError::CapacityExceeded { capacity: 8, .. })
    ));
    assert_eq!(resources.get_buffer(5).unwrap().contents(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
}
