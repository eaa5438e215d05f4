//! The pipeline and descriptor cache and the value structs that key it.

pub mod cache;
pub mod hash;
pub mod state;

pub use cache::PipelineCache;
pub use state::{
    DescriptorKey, InputAttachmentBinding, LayoutUsage, PipelineKey, ProgramBundle, RasterState,
    SamplerBinding, VertexArray, INPUT_ATTACHMENT_COUNT, MAX_VERTEX_ATTRIBUTES,
    SAMPLER_BINDING_COUNT, UNIFORM_BINDING_COUNT,
};
