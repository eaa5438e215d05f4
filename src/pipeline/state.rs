//! Plain value structs describing the pending draw configuration.
//!
//! All of these act as cache keys, so they follow one rule: identity is the field contents and
//! nothing else. Unused array slots are always reset to their zero value before comparison, so
//! two keys describing the same state are equal no matter what was bound previously. Types with
//! float fields get manual `Hash`/`PartialEq` impls in [`hash`](super::hash).

use ash::vk;
use static_assertions::assert_impl_all;

/// Maximum number of vertex attribute and vertex buffer slots in a [`VertexArray`].
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
/// Number of uniform buffer binding slots in a [`DescriptorKey`].
pub const UNIFORM_BINDING_COUNT: usize = 8;
/// Number of combined image sampler binding slots in a [`DescriptorKey`].
pub const SAMPLER_BINDING_COUNT: usize = 16;
/// Number of input attachment binding slots in a [`DescriptorKey`].
pub const INPUT_ATTACHMENT_COUNT: usize = 4;
/// Descriptor sets are split by descriptor type: uniform buffers, samplers, input attachments.
pub const DESCRIPTOR_TYPE_COUNT: usize = 3;

/// The pair of shader modules a pipeline is built from. The modules are owned by the shader
/// subsystem; the cache stores them by value and never destroys them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct ProgramBundle {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
}

/// Fixed function state baked into a pipeline. Copied by value into [`PipelineKey`].
///
/// Contains floats, so `Hash`/`PartialEq` are implemented manually over the bit patterns.
#[derive(Debug, Copy, Clone)]
pub struct RasterState {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias_enable: bool,
    pub depth_bias_constant_factor: f32,
    pub depth_bias_slope_factor: f32,
    pub blend_enable: bool,
    pub src_color_blend_factor: vk::BlendFactor,
    pub dst_color_blend_factor: vk::BlendFactor,
    pub src_alpha_blend_factor: vk::BlendFactor,
    pub dst_alpha_blend_factor: vk::BlendFactor,
    pub color_blend_op: vk::BlendOp,
    pub alpha_blend_op: vk::BlendOp,
    pub color_write_mask: vk::ColorComponentFlags,
    pub alpha_to_coverage_enable: bool,
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub rasterization_samples: vk::SampleCountFlags,
    pub color_target_count: u32,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias_enable: false,
            depth_bias_constant_factor: 0.0,
            depth_bias_slope_factor: 0.0,
            blend_enable: false,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            color_blend_op: vk::BlendOp::ADD,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            alpha_to_coverage_enable: false,
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            color_target_count: 1,
        }
    }
}

/// Vertex assembly shape: per-slot attribute descriptions and per-slot buffer strides. Holds
/// no buffer references. An attribute slot is live iff its format is not `UNDEFINED`; unused
/// slots stay zeroed.
#[derive(Debug, Copy, Clone, Default)]
pub struct VertexArray {
    pub attributes: [vk::VertexInputAttributeDescription; MAX_VERTEX_ATTRIBUTES],
    pub buffers: [vk::VertexInputBindingDescription; MAX_VERTEX_ATTRIBUTES],
}

/// Per-sampler-slot shader stage usage, packed as a bitset: bit `i` marks vertex stage usage
/// of sampler slot `i`, bit `32 + i` fragment stage usage. This is the pipeline layout key;
/// layouts differ only in which stages may access which sampler binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct LayoutUsage(u64);

impl LayoutUsage {
    pub const NONE: LayoutUsage = LayoutUsage(0);

    /// Mark sampler slot `slot` as used by `stages`.
    pub fn with_sampler(mut self, slot: usize, stages: vk::ShaderStageFlags) -> Self {
        assert!(slot < SAMPLER_BINDING_COUNT, "sampler slot {slot} out of range");
        if stages.contains(vk::ShaderStageFlags::VERTEX) {
            self.0 |= 1 << slot;
        }
        if stages.contains(vk::ShaderStageFlags::FRAGMENT) {
            self.0 |= 1 << (32 + slot);
        }
        self
    }

    /// Stages using sampler slot `slot`, or empty if the slot is unused.
    pub fn stages(self, slot: usize) -> vk::ShaderStageFlags {
        let mut stages = vk::ShaderStageFlags::empty();
        if self.0 & (1 << slot) != 0 {
            stages |= vk::ShaderStageFlags::VERTEX;
        }
        if self.0 & (1 << (32 + slot)) != 0 {
            stages |= vk::ShaderStageFlags::FRAGMENT;
        }
        stages
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Everything a graphics pipeline is derived from. Two draws with equal keys share one
/// pipeline object. `Hash`/`PartialEq` are manual because of [`RasterState`] and
/// [`VertexArray`].
#[derive(Debug, Copy, Clone, Default)]
pub struct PipelineKey {
    pub program: ProgramBundle,
    pub raster: RasterState,
    pub topology: vk::PrimitiveTopology,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub vertex: VertexArray,
    pub layout: LayoutUsage,
}

/// One bound combined image sampler. All-zero means the slot is unused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct SamplerBinding {
    pub sampler: vk::Sampler,
    pub image_view: vk::ImageView,
    pub image_layout: vk::ImageLayout,
}

/// One bound input attachment. All-zero means the slot is unused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct InputAttachmentBinding {
    pub image_view: vk::ImageView,
    pub image_layout: vk::ImageLayout,
}

/// Everything the three descriptor sets of a draw are derived from: the bound uniform buffer
/// ranges, samplers and input attachments, with unused slots zeroed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct DescriptorKey {
    pub uniform_buffers: [vk::Buffer; UNIFORM_BINDING_COUNT],
    pub uniform_offsets: [vk::DeviceSize; UNIFORM_BINDING_COUNT],
    pub uniform_ranges: [vk::DeviceSize; UNIFORM_BINDING_COUNT],
    pub samplers: [SamplerBinding; SAMPLER_BINDING_COUNT],
    pub input_attachments: [InputAttachmentBinding; INPUT_ATTACHMENT_COUNT],
}

assert_impl_all!(PipelineKey: Copy, Eq, std::hash::Hash);
assert_impl_all!(DescriptorKey: Copy, Eq, std::hash::Hash);
assert_impl_all!(LayoutUsage: Copy, Eq, std::hash::Hash);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_usage_roundtrips_stage_flags() {
        let usage = LayoutUsage::NONE
            .with_sampler(0, vk::ShaderStageFlags::VERTEX)
            .with_sampler(3, vk::ShaderStageFlags::FRAGMENT)
            .with_sampler(7, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(usage.stages(0), vk::ShaderStageFlags::VERTEX);
        assert_eq!(usage.stages(3), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(
            usage.stages(7),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(usage.stages(1), vk::ShaderStageFlags::empty());
        assert!(!usage.is_empty());
        assert!(LayoutUsage::NONE.is_empty());
    }

    #[test]
    #[should_panic]
    fn layout_usage_rejects_out_of_range_slot() {
        let _ = LayoutUsage::NONE.with_sampler(SAMPLER_BINDING_COUNT, vk::ShaderStageFlags::VERTEX);
    }
}
