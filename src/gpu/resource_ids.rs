//! Resource identifiers and content keys.
//!
//! - [`ResourceId`]: stable identity of a CPU-side object or a native resource
//! - [`BindGroupFingerprint`]: everything a bind group depends on, hashed
//!   into its cache key
//! - [`fx_hash_key`] / [`hash_layout_entries`]: content hashes for
//!   hash-keyed caches

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHasher;
use smallvec::SmallVec;

/// Unique identifier for a resource.
///
/// Uniform buffers get a fresh id each time they are reallocated, so a
/// changed id means dependent bind groups must be rebuilt.
pub type ResourceId = u64;

/// Names one leased entry of the [`ResourceManager`](crate::gpu::ResourceManager).
///
/// Caller-chosen buffer ids and generated ids live in separate namespaces,
/// so a buffer registered under `3` never aliases uniform generation `3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// Buffer created under a caller-chosen id.
    Buffer(ResourceId),
    /// Numeric buffer of one uniform set generation.
    Uniform(ResourceId),
    /// Current native texture of a [`Texture`](crate::resources::Texture), by texture id.
    Texture(ResourceId),
    /// Bind group, by the id `create_bind_group` returned.
    BindGroup(ResourceId),
}

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide id source shared by textures, uniform sets, uniform buffer
/// generations and bind groups.
pub fn generate_resource_id() -> ResourceId {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

#[must_use]
pub fn fx_hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Hash of a `BindGroupLayoutEntry` list.
#[must_use]
pub fn hash_layout_entries(entries: &[wgpu::BindGroupLayoutEntry]) -> u64 {
    let mut hasher = FxHasher::default();
    entries.len().hash(&mut hasher);
    for entry in entries {
        entry.hash(&mut hasher);
    }
    hasher.finish()
}

/// Complete fingerprint of a bind group: the layout it satisfies and the
/// resource ids bound to it, in binding order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BindGroupFingerprint {
    pub layout_hash: u64,
    pub resource_ids: SmallVec<[ResourceId; 16]>,
}

impl BindGroupFingerprint {
    #[must_use]
    pub fn new(layout_hash: u64) -> Self {
        Self {
            layout_hash,
            resource_ids: SmallVec::new(),
        }
    }

    #[inline]
    pub fn push(&mut self, id: ResourceId) {
        self.resource_ids.push(id);
    }

    #[must_use]
    pub fn key(&self) -> u64 {
        fx_hash_key(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_order() {
        let mut a = BindGroupFingerprint::new(7);
        a.push(1);
        a.push(2);
        let mut b = BindGroupFingerprint::new(7);
        b.push(2);
        b.push(1);
        assert_ne!(a.key(), b.key());

        let mut c = BindGroupFingerprint::new(7);
        c.push(1);
        c.push(2);
        assert_eq!(a.key(), c.key());
    }

    #[test]
    fn ids_are_unique() {
        let a = generate_resource_id();
        let b = generate_resource_id();
        assert_ne!(a, b);
    }
}
