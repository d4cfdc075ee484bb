//! Resource Manager and the GPU backend seam.
//!
//! - [`ResourceManager`]: leased, frame-aged caches of native objects
//! - [`GpuBackend`]: what the manager needs from a graphics API
//! - [`WgpuBackend`]: production backend over a wgpu device
//! - [`HeadlessBackend`]: records calls, needs no device

mod backend;
mod cache;
mod headless;
mod manager;
mod resource_ids;
mod values;
mod wgpu_backend;

pub use backend::{BindGroupEntry, BindGroupResource, BufferDesc, GpuBackend, TextureDesc};
pub use cache::{CacheEntry, ResourceCache};
pub use headless::{HeadlessBackend, HeadlessBindGroup, HeadlessBuffer, HeadlessEvent, HeadlessHandle};
pub use manager::{CacheStats, ReadbackCallback, ResourceManager};
pub use resource_ids::{BindGroupFingerprint, ResourceId, ResourceKey, fx_hash_key, generate_resource_id, hash_layout_entries};
pub use values::{BindingValue, BindingValues};
pub use wgpu_backend::{WgpuBackend, WgpuTexture};
