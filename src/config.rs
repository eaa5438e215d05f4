//! Tuning parameters shared by the caches.

/// Configuration for the caches in this crate.
///
/// The defaults are the values the caches were tuned with, but they encode an assumption
/// about how deep the surrounding engine pipelines frames: an entry must survive unused for
/// at least as many [`gc`](crate::PipelineCache::gc) cycles as there can be frames in flight,
/// or it may be destroyed while the GPU still reads it. Raise `eviction_delay` when frames
/// overlap more than two deep.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of gc cycles an entry must go unused before it is physically destroyed.
    pub eviction_delay: u64,
    /// Number of descriptor set "slots" the first descriptor pool is sized for. Growth
    /// doubles this on every pool exhaustion.
    pub initial_descriptor_pool_capacity: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_delay: 2,
            initial_descriptor_pool_capacity: 64,
        }
    }
}
