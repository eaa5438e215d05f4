//! Exposes the device memory allocator interface used by the caches, and a default
//! implementation based on the [`gpu_allocator`] crate.

pub mod default_allocator;
pub mod memory_type;
pub mod traits;
