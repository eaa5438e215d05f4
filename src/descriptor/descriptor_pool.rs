//! A descriptor pool sized for the fixed binding model of the pipeline cache. Pools are
//! created on demand and grow by replacement: when one runs out, a bigger pool takes its
//! place and the exhausted one lingers until every set allocated from it is unreachable.

use ash::prelude::VkResult;
use ash::vk;

use crate::pipeline::state::{
    INPUT_ATTACHMENT_COUNT, SAMPLER_BINDING_COUNT, UNIFORM_BINDING_COUNT,
};
use crate::Device;

/// Memory pool for descriptor sets. Owns its Vulkan handle; dropping the pool destroys it,
/// which implicitly frees every set still allocated from it.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct DescriptorPool {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::DescriptorPool,
    capacity: u32,
}

impl DescriptorPool {
    /// Create a pool able to hold `capacity` descriptor sets, each with the full complement
    /// of uniform buffer, sampler and input attachment bindings.
    pub(crate) fn new(device: Device, capacity: u32) -> VkResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: capacity * UNIFORM_BINDING_COUNT as u32,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: capacity * SAMPLER_BINDING_COUNT as u32,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::INPUT_ATTACHMENT,
                descriptor_count: capacity * INPUT_ATTACHMENT_COUNT as u32,
            },
        ];
        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(capacity)
            .pool_sizes(&pool_sizes)
            .build();
        // SAFETY: valid create info built above.
        let handle = unsafe { device.create_descriptor_pool(&info, None)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkDescriptorPool {handle:?} (capacity = {capacity})");
        Ok(Self {
            device,
            handle,
            capacity,
        })
    }

    /// Allocate one descriptor set per given layout. Returns the raw Vulkan error so the
    /// caller can distinguish pool exhaustion (`ERROR_OUT_OF_POOL_MEMORY`,
    /// `ERROR_FRAGMENTED_POOL`) from unrecoverable failures.
    pub(crate) fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.handle)
            .set_layouts(layouts)
            .build();
        // SAFETY: pool handle is owned by self, layouts are valid by contract.
        unsafe { self.device.allocate_descriptor_sets(&info) }
    }

    /// Return sets to the pool. Must only be called with sets allocated from this pool.
    pub(crate) fn free(&self, sets: &[vk::DescriptorSet]) -> VkResult<()> {
        // SAFETY: the pool was created with FREE_DESCRIPTOR_SET.
        unsafe { self.device.free_descriptor_sets(self.handle, sets) }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkDescriptorPool {:?}", self.handle);
        unsafe {
            self.device.destroy_descriptor_pool(self.handle, None);
        }
    }
}
