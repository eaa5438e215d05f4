//! Re-exports of everything needed to drive the caches.

pub use ash::vk;

pub use crate::allocator::default_allocator;
pub use crate::allocator::default_allocator::DefaultAllocator;
pub use crate::allocator::memory_type::MemoryType;
pub use crate::allocator::traits::*;
pub use crate::config::CacheConfig;
pub use crate::core::device::Device;
pub use crate::core::traits::CommandBufferObserver;
pub use crate::disposer::{Disposer, DisposerKey, ResourceSet};
pub use crate::error::Error;
pub use crate::fbo_cache::{FboCache, FboKey, RenderPassKey, TargetFlags, FBO_ATTACHMENT_COUNT};
pub use crate::pipeline::cache::PipelineCache;
pub use crate::pipeline::state::{
    DescriptorKey, InputAttachmentBinding, LayoutUsage, PipelineKey, ProgramBundle, RasterState,
    SamplerBinding, VertexArray, INPUT_ATTACHMENT_COUNT, MAX_VERTEX_ATTRIBUTES,
    SAMPLER_BINDING_COUNT, UNIFORM_BINDING_COUNT,
};
pub use crate::staging::{StagePool, StageView};
pub use crate::util::deferred_delete::DeletionQueue;
