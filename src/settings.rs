//! Resource Settings
//!
//! Tunables shared by the binding core and the [`ResourceManager`].
//!
//! ```rust,ignore
//! use sigil::settings::ResourceSettings;
//!
//! let settings = ResourceSettings {
//!     retention_frames: 120,
//!     ..Default::default()
//! };
//! ```
//!
//! [`ResourceManager`]: crate::gpu::ResourceManager

/// Default number of frames an unused, unleased resource survives.
pub const DEFAULT_RETENTION_FRAMES: u64 = 60;

/// WebGPU's default `maxBindGroups` limit.
pub const DEFAULT_MAX_BIND_GROUPS: u32 = 4;

/// Uniform buffer bindings must be sized in multiples of 16 bytes.
pub const UNIFORM_SIZE_ALIGNMENT: u64 = 16;

/// Configuration for caching, eviction and uniform buffer sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSettings {
    /// Frames an entry with a zero reference count may go unused before
    /// [`begin_frame`](crate::gpu::ResourceManager::begin_frame) evicts it.
    pub retention_frames: u64,

    /// Highest number of bind groups the group naming policy hands out.
    pub max_bind_groups: u32,

    /// Byte multiple every numeric uniform buffer is padded to.
    pub uniform_size_alignment: u64,

    /// Smallest numeric uniform buffer that will be allocated, in bytes.
    pub min_uniform_buffer_size: u64,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            retention_frames: DEFAULT_RETENTION_FRAMES,
            max_bind_groups: DEFAULT_MAX_BIND_GROUPS,
            uniform_size_alignment: UNIFORM_SIZE_ALIGNMENT,
            min_uniform_buffer_size: UNIFORM_SIZE_ALIGNMENT,
        }
    }
}

impl ResourceSettings {
    /// Byte size of a numeric uniform buffer holding `content_size` bytes.
    #[inline]
    #[must_use]
    pub fn uniform_buffer_size(&self, content_size: u64) -> u64 {
        crate::layout::align_to(content_size, self.uniform_size_alignment)
            .max(self.min_uniform_buffer_size)
    }
}
