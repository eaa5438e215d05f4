//! Descriptor pool management for the pipeline cache.

pub(crate) mod descriptor_pool;
