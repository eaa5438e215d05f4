//! Manual `Hash`/`PartialEq` impls for the key structs that contain floats or raw Vulkan
//! structs without derived trait impls. Floats participate through their bit patterns; a key
//! is its bits and nothing more.

use std::hash::{Hash, Hasher};

use crate::pipeline::state::{PipelineKey, RasterState, VertexArray};

impl Hash for RasterState {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.cull_mode.hash(hasher);
        self.front_face.hash(hasher);
        self.depth_bias_enable.hash(hasher);
        self.depth_bias_constant_factor.to_bits().hash(hasher);
        self.depth_bias_slope_factor.to_bits().hash(hasher);
        self.blend_enable.hash(hasher);
        self.src_color_blend_factor.hash(hasher);
        self.dst_color_blend_factor.hash(hasher);
        self.src_alpha_blend_factor.hash(hasher);
        self.dst_alpha_blend_factor.hash(hasher);
        self.color_blend_op.hash(hasher);
        self.alpha_blend_op.hash(hasher);
        self.color_write_mask.hash(hasher);
        self.alpha_to_coverage_enable.hash(hasher);
        self.depth_test_enable.hash(hasher);
        self.depth_write_enable.hash(hasher);
        self.depth_compare_op.hash(hasher);
        self.rasterization_samples.hash(hasher);
        self.color_target_count.hash(hasher);
    }
}

impl PartialEq for RasterState {
    fn eq(&self, other: &Self) -> bool {
        self.cull_mode == other.cull_mode
            && self.front_face == other.front_face
            && self.depth_bias_enable == other.depth_bias_enable
            && self.depth_bias_constant_factor.to_bits() == other.depth_bias_constant_factor.to_bits()
            && self.depth_bias_slope_factor.to_bits() == other.depth_bias_slope_factor.to_bits()
            && self.blend_enable == other.blend_enable
            && self.src_color_blend_factor == other.src_color_blend_factor
            && self.dst_color_blend_factor == other.dst_color_blend_factor
            && self.src_alpha_blend_factor == other.src_alpha_blend_factor
            && self.dst_alpha_blend_factor == other.dst_alpha_blend_factor
            && self.color_blend_op == other.color_blend_op
            && self.alpha_blend_op == other.alpha_blend_op
            && self.color_write_mask == other.color_write_mask
            && self.alpha_to_coverage_enable == other.alpha_to_coverage_enable
            && self.depth_test_enable == other.depth_test_enable
            && self.depth_write_enable == other.depth_write_enable
            && self.depth_compare_op == other.depth_compare_op
            && self.rasterization_samples == other.rasterization_samples
            && self.color_target_count == other.color_target_count
    }
}

impl Hash for VertexArray {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        for attribute in &self.attributes {
            attribute.location.hash(hasher);
            attribute.binding.hash(hasher);
            attribute.format.hash(hasher);
            attribute.offset.hash(hasher);
        }
        for buffer in &self.buffers {
            buffer.binding.hash(hasher);
            buffer.stride.hash(hasher);
            buffer.input_rate.hash(hasher);
        }
    }
}

impl PartialEq for VertexArray {
    fn eq(&self, other: &Self) -> bool {
        self.attributes
            .iter()
            .zip(other.attributes.iter())
            .all(|(a, b)| {
                a.location == b.location
                    && a.binding == b.binding
                    && a.format == b.format
                    && a.offset == b.offset
            })
            && self
                .buffers
                .iter()
                .zip(other.buffers.iter())
                .all(|(a, b)| {
                    a.binding == b.binding && a.stride == b.stride && a.input_rate == b.input_rate
                })
    }
}

impl Hash for PipelineKey {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.program.hash(hasher);
        self.raster.hash(hasher);
        self.topology.hash(hasher);
        self.render_pass.hash(hasher);
        self.subpass.hash(hasher);
        self.vertex.hash(hasher);
        self.layout.hash(hasher);
    }
}

impl PartialEq for PipelineKey {
    fn eq(&self, other: &Self) -> bool {
        self.program == other.program
            && self.raster == other.raster
            && self.topology == other.topology
            && self.render_pass == other.render_pass
            && self.subpass == other.subpass
            && self.vertex == other.vertex
            && self.layout == other.layout
    }
}

impl Eq for RasterState {}
impl Eq for VertexArray {}
impl Eq for PipelineKey {}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use ash::vk;
    use ash::vk::Handle;

    use crate::pipeline::state::{PipelineKey, ProgramBundle, RasterState, VertexArray};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn sample_key() -> PipelineKey {
        let mut vertex = VertexArray::default();
        vertex.attributes[0] = vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        };
        vertex.buffers[0] = vk::VertexInputBindingDescription {
            binding: 0,
            stride: 12,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        PipelineKey {
            program: ProgramBundle {
                vertex: vk::ShaderModule::from_raw(1),
                fragment: vk::ShaderModule::from_raw(2),
            },
            raster: RasterState::default(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            render_pass: vk::RenderPass::from_raw(3),
            subpass: 0,
            vertex,
            layout: Default::default(),
        }
    }

    #[test]
    fn equal_keys_hash_equal() {
        let a = sample_key();
        let b = sample_key();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn any_field_change_breaks_equality() {
        let a = sample_key();

        let mut b = a;
        b.raster.depth_bias_constant_factor = 1.5;
        assert_ne!(a, b);

        let mut c = a;
        c.vertex.attributes[1].format = vk::Format::R32_SFLOAT;
        assert_ne!(a, c);

        let mut d = a;
        d.subpass = 1;
        assert_ne!(a, d);
    }

    #[test]
    fn float_identity_is_bitwise() {
        let mut a = RasterState::default();
        let mut b = RasterState::default();
        a.depth_bias_constant_factor = 0.0;
        b.depth_bias_constant_factor = -0.0;
        // 0.0 and -0.0 compare equal as floats but are different pipeline keys.
        assert_ne!(a, b);
    }
}
