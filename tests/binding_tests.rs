//! Binding Descriptor Tests
//!
//! Tests for:
//! - BindingBuilder: chained configuration, registration on build
//! - BindGroupLayout: placement, group policy, registry stamping, WGSL
//! - GroupPolicy: fixed names, custom names, exhaustion

use wgpu::ShaderStages;

use sigil::binding::{
    BindGroupLayout, Binding, BindingContext, GroupPolicy, StorageAccess, TextureBindingLayout,
};
use sigil::errors::SigilError;
use sigil::settings::ResourceSettings;

fn material_layout(ctx: &mut BindingContext) -> BindGroupLayout {
    ctx.structs
        .define_from_type_names("Material", [("base_color", "vec4f"), ("roughness", "f32")])
        .unwrap();
    let params = Binding::builder("material")
        .with_struct("Material")
        .var("u_material", "Material")
        .visibility(ShaderStages::FRAGMENT)
        .build(&mut ctx.bindings);
    let map = Binding::builder("base_map")
        .texture(TextureBindingLayout::default())
        .var("t_base_map", "texture_2d<f32>")
        .build(&mut ctx.bindings);
    let sampler = Binding::builder("base_map_sampler")
        .sampler(wgpu::SamplerBindingType::Filtering)
        .var("s_base_map", "sampler")
        .build(&mut ctx.bindings);
    BindGroupLayout::new("standard", "Material", vec![params, map, sampler], ctx).unwrap()
}

// ============================================================================
// Placement and lookup
// ============================================================================

#[test]
fn layout_places_bindings_in_order() {
    let mut ctx = BindingContext::default();
    let layout = material_layout(&mut ctx);

    assert_eq!(layout.group_index(), 2);
    assert!(layout.is_material());
    let indices: Vec<_> = layout.bindings().iter().map(|b| b.index()).collect();
    assert_eq!(indices, vec![Some(0), Some(1), Some(2)]);
    assert_eq!(layout.entries().len(), 3);
    assert_eq!(layout.entries()[1].binding, 1);
}

#[test]
fn placement_is_visible_through_the_registry() {
    let mut ctx = BindingContext::default();
    material_layout(&mut ctx);

    let by_slot = ctx.bindings.get_by_indices(2, 1).unwrap();
    assert_eq!(by_slot.name(), "base_map");
    assert_eq!(by_slot.group_name(), Some("Material"));

    let names: Vec<_> = ctx
        .bindings
        .get_by_names(&["base_map_sampler", "missing", "material"])
        .iter()
        .map(|b| b.name().to_string())
        .collect();
    assert_eq!(names, vec!["base_map_sampler", "material"]);
}

#[test]
fn equal_entries_share_a_key() {
    let mut ctx = BindingContext::default();
    let a = material_layout(&mut ctx);
    let b = a.extend_copy(Vec::new(), &mut ctx).unwrap();
    assert_eq!(a.key(), b.key());

    let extra = Binding::builder("lights")
        .storage(StorageAccess::Read)
        .var("st_lights", "array<vec4f>")
        .finish();
    let c = a.extend_copy(vec![extra], &mut ctx).unwrap();
    assert_ne!(a.key(), c.key());
    assert_eq!(c.binding("lights").unwrap().index(), Some(3));

    for original in a.bindings() {
        let copied = c.binding(original.name()).unwrap();
        assert_eq!(copied.index(), original.index(), "{}", original.name());
        assert_eq!(copied.group(), original.group(), "{}", original.name());
    }
    assert_eq!(c.bindings().len(), a.bindings().len() + 1);
}

// ============================================================================
// WGSL
// ============================================================================

#[test]
fn declarations_for_a_material_group() {
    let mut ctx = BindingContext::default();
    let layout = material_layout(&mut ctx);
    let wgsl = layout.wgsl_declarations(&ctx.structs).unwrap();

    assert!(wgsl.contains("struct Material {"));
    assert!(wgsl.contains("@group(2) @binding(0) var<uniform> u_material: Material;"));
    assert!(wgsl.contains("@group(2) @binding(1) var t_base_map: texture_2d<f32>;"));
    assert!(wgsl.contains("@group(2) @binding(2) var s_base_map: sampler;"));
    assert!(wgsl.find("struct Material {").unwrap() < wgsl.find("@group(2)").unwrap());
}

#[test]
fn storage_access_is_spelled_out() {
    let mut ctx = BindingContext::default();
    let read = Binding::builder("particles")
        .storage(StorageAccess::Read)
        .var("st_particles", "array<vec4f>")
        .finish();
    let write = Binding::builder("counters")
        .storage(StorageAccess::ReadWrite)
        .var("st_counters", "array<u32>")
        .visibility(ShaderStages::COMPUTE)
        .finish();
    let layout = BindGroupLayout::new("sim", "Compute", vec![read, write], &mut ctx).unwrap();

    assert_eq!(layout.group_index(), 3);
    let decls: Vec<String> = layout.bindings().iter().map(|b| b.to_wgsl().unwrap()).collect();
    assert_eq!(decls[0], "@group(3) @binding(0) var<storage, read> st_particles: array<vec4f>;");
    assert_eq!(decls[1], "@group(3) @binding(1) var<storage, read_write> st_counters: array<u32>;");
}

#[test]
fn unplaced_bindings_cannot_be_declared() {
    let binding = Binding::builder("loose").with_struct("Loose").finish();
    assert_eq!(
        binding.to_wgsl(),
        Err(SigilError::UnplacedBinding("loose".to_string()))
    );
    assert!(binding.layout_entry().is_err());
}

// ============================================================================
// Group policy
// ============================================================================

#[test]
fn group_policy_assigns_and_runs_out() {
    let mut policy = GroupPolicy::new(ResourceSettings::default().max_bind_groups);
    assert_eq!(policy.resolve("Global").unwrap(), 0);
    assert_eq!(policy.resolve("Mesh").unwrap(), 1);
    assert_eq!(policy.resolve("Material").unwrap(), 2);
    assert_eq!(policy.resolve("Shadow").unwrap(), 3);
    assert_eq!(policy.resolve("Shadow").unwrap(), 3);
    assert!(matches!(
        policy.resolve("PostFx"),
        Err(SigilError::CapacityExceeded { capacity: 4, .. })
    ));
    assert_eq!(policy.index_of("PostFx"), None);
}
