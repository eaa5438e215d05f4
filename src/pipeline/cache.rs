//! The pipeline and descriptor set cache.
//!
//! The client describes the next draw through a series of `bind_*` calls, none of which touch
//! Vulkan: they only overwrite slots in an in-memory requirements block. At draw time,
//! [`bind_descriptors`](PipelineCache::bind_descriptors) and
//! [`bind_pipeline`](PipelineCache::bind_pipeline) hash that block, create any missing Vulkan
//! objects, and record the bind commands, skipping them entirely when the requested state is
//! already bound on the current command buffer.
//!
//! Every cached object carries a last-used stamp against a logical clock that
//! [`gc`](PipelineCache::gc) advances once per frame. Entries unused for the configured
//! eviction delay are reclaimed: descriptor sets go back to a per-layout arena for instant
//! reuse, pipelines and layouts are destroyed. The owning driver must call
//! [`on_command_buffer`](crate::CommandBufferObserver::on_command_buffer) on every command
//! buffer switch, since bindings are command buffer local state and the shadow copy kept here
//! is otherwise stale.

use std::collections::HashMap;
use std::ffi::CString;

use anyhow::Result;
use ash::vk;

use crate::allocator::traits::Allocation as _;
use crate::core::traits::CommandBufferObserver;
use crate::descriptor::descriptor_pool::DescriptorPool;
use crate::pipeline::state::{
    DescriptorKey, InputAttachmentBinding, LayoutUsage, PipelineKey, ProgramBundle, RasterState,
    SamplerBinding, VertexArray, DESCRIPTOR_TYPE_COUNT, INPUT_ATTACHMENT_COUNT,
    MAX_VERTEX_ATTRIBUTES, SAMPLER_BINDING_COUNT, UNIFORM_BINDING_COUNT,
};
use crate::util::deferred_delete::DeletionQueue;
use crate::{Allocator, CacheConfig, DefaultAllocator, Device, Error, MemoryType};

const PLACEHOLDER_BUFFER_SIZE: vk::DeviceSize = 64;

#[derive(Debug, Copy, Clone)]
struct PipelineEntry {
    handle: vk::Pipeline,
    last_used: u64,
}

#[derive(Debug)]
struct LayoutEntry {
    handle: vk::PipelineLayout,
    set_layouts: [vk::DescriptorSetLayout; DESCRIPTOR_TYPE_COUNT],
    // Reclaimed descriptor sets of this exact layout, one free list per descriptor type.
    // Always allocated from the current pool; growth clears them.
    arenas: [Vec<vk::DescriptorSet>; DESCRIPTOR_TYPE_COUNT],
    last_used: u64,
}

#[derive(Debug, Copy, Clone)]
struct DescriptorEntry {
    sets: [vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT],
    // The layout the sets were allocated against, so eviction returns them to its arena.
    layout: LayoutUsage,
    last_used: u64,
}

// Copies of the handles a layout entry owns, so callers can keep them past map borrows.
#[derive(Debug, Copy, Clone)]
struct LayoutHandles {
    handle: vk::PipelineLayout,
    set_layouts: [vk::DescriptorSetLayout; DESCRIPTOR_TYPE_COUNT],
}

// Sets pulled out of the descriptor cache by an unbind purge. They may still be referenced by
// an in-flight command buffer, so they sit here for the eviction delay before re-entering
// their layout's arena.
#[derive(Debug, Copy, Clone)]
struct RetiredSets {
    sets: [vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT],
    layout: LayoutUsage,
    retired_at: u64,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct PlaceholderResources<A: Allocator> {
    buffer: vk::Buffer,
    #[derivative(Debug = "ignore")]
    memory: A::Allocation,
    sampler: vk::Sampler,
}

/// Cache of pipelines, pipeline layouts and descriptor sets, driven by the accumulated
/// requirements of the next draw.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PipelineCache<A: Allocator = DefaultAllocator> {
    #[derivative(Debug = "ignore")]
    device: Device,
    #[derivative(Debug = "ignore")]
    allocator: A,
    eviction_delay: u64,
    current_time: u64,

    // Requirements for the next draw. Mutated freely by bind calls, read at commit.
    program_req: ProgramBundle,
    raster_req: RasterState,
    vertex_req: VertexArray,
    topology_req: vk::PrimitiveTopology,
    render_pass_req: vk::RenderPass,
    subpass_req: u32,
    descriptor_req: DescriptorKey,
    layout_req: LayoutUsage,

    pipelines: HashMap<PipelineKey, PipelineEntry>,
    layouts: HashMap<LayoutUsage, LayoutEntry>,
    descriptors: HashMap<DescriptorKey, DescriptorEntry>,
    retired_sets: Vec<RetiredSets>,

    // Created on first descriptor allocation; replaced with a bigger one on exhaustion.
    pool: Option<DescriptorPool>,
    pool_capacity: u32,
    extinct_pools: DeletionQueue<DescriptorPool>,

    // Shadow copy of command buffer local bind state, reset on every buffer switch. The
    // descriptor shadow carries the layout usage: the same key bound against another usage
    // binds a different pipeline layout.
    bound_pipeline: Option<PipelineKey>,
    bound_descriptor: Option<(DescriptorKey, LayoutUsage)>,
    bound_scissor: Option<(i32, i32, u32, u32)>,

    placeholders: Option<PlaceholderResources<A>>,
    placeholder_image_view: vk::ImageView,
}

impl<A: Allocator> PipelineCache<A> {
    /// Create an empty cache. No Vulkan objects are created until the first commit.
    pub fn new(device: Device, allocator: A, config: &CacheConfig) -> Self {
        Self {
            device,
            allocator,
            eviction_delay: config.eviction_delay,
            current_time: 0,
            program_req: ProgramBundle::default(),
            raster_req: RasterState::default(),
            vertex_req: VertexArray::default(),
            topology_req: vk::PrimitiveTopology::TRIANGLE_LIST,
            render_pass_req: vk::RenderPass::null(),
            subpass_req: 0,
            descriptor_req: DescriptorKey::default(),
            layout_req: LayoutUsage::NONE,
            pipelines: HashMap::new(),
            layouts: HashMap::new(),
            descriptors: HashMap::new(),
            retired_sets: Vec::new(),
            pool: None,
            pool_capacity: config.initial_descriptor_pool_capacity,
            extinct_pools: DeletionQueue::new(config.eviction_delay.max(1) as u32),
            bound_pipeline: None,
            bound_descriptor: None,
            bound_scissor: None,
            placeholders: None,
            placeholder_image_view: vk::ImageView::null(),
        }
    }

    /// Set the image view used to pad descriptor writes for unused sampler and input
    /// attachment slots. Must be set before the first commit; owned by the texture subsystem.
    pub fn set_placeholder_image_view(&mut self, view: vk::ImageView) {
        self.placeholder_image_view = view;
    }

    pub fn bind_program(&mut self, program: ProgramBundle) {
        self.program_req = program;
    }

    pub fn bind_raster_state(&mut self, raster: RasterState) {
        self.raster_req = raster;
    }

    pub fn bind_render_pass(&mut self, render_pass: vk::RenderPass, subpass: u32) {
        self.render_pass_req = render_pass;
        self.subpass_req = subpass;
    }

    pub fn bind_primitive_topology(&mut self, topology: vk::PrimitiveTopology) {
        self.topology_req = topology;
    }

    /// Replace the whole vertex assembly description. Slots past the given slices are zeroed
    /// so stale state never leaks into the pipeline key.
    pub fn bind_vertex_array(
        &mut self,
        attributes: &[vk::VertexInputAttributeDescription],
        buffers: &[vk::VertexInputBindingDescription],
    ) {
        assert!(
            attributes.len() <= MAX_VERTEX_ATTRIBUTES && buffers.len() <= MAX_VERTEX_ATTRIBUTES,
            "vertex array exceeds {MAX_VERTEX_ATTRIBUTES} slots"
        );
        assert!(
            attributes
                .iter()
                .all(|attribute| (attribute.binding as usize) < MAX_VERTEX_ATTRIBUTES),
            "vertex attribute binding out of range"
        );
        self.vertex_req = VertexArray::default();
        self.vertex_req.attributes[..attributes.len()].copy_from_slice(attributes);
        self.vertex_req.buffers[..buffers.len()].copy_from_slice(buffers);
    }

    pub fn bind_uniform_buffer(
        &mut self,
        slot: usize,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        assert!(slot < UNIFORM_BINDING_COUNT, "uniform slot {slot} out of range");
        self.descriptor_req.uniform_buffers[slot] = buffer;
        self.descriptor_req.uniform_offsets[slot] = offset;
        self.descriptor_req.uniform_ranges[slot] = range;
    }

    /// Replace all sampler bindings at once, together with the stage usage bitset that selects
    /// the pipeline layout. Slots past `samplers` are zeroed.
    pub fn bind_samplers(&mut self, samplers: &[SamplerBinding], usage: LayoutUsage) {
        assert!(
            samplers.len() <= SAMPLER_BINDING_COUNT,
            "sampler bindings exceed {SAMPLER_BINDING_COUNT} slots"
        );
        self.descriptor_req.samplers = [SamplerBinding::default(); SAMPLER_BINDING_COUNT];
        self.descriptor_req.samplers[..samplers.len()].copy_from_slice(samplers);
        self.layout_req = usage;
    }

    pub fn bind_input_attachment(&mut self, slot: usize, attachment: InputAttachmentBinding) {
        assert!(
            slot < INPUT_ATTACHMENT_COUNT,
            "input attachment slot {slot} out of range"
        );
        self.descriptor_req.input_attachments[slot] = attachment;
    }

    /// Commit the descriptor requirements: get or create the matching descriptor sets and
    /// record the bind, unless the identical state is already bound on this command buffer.
    /// # Errors
    /// Fails when descriptor set allocation cannot be satisfied even after growing the pool,
    /// or when layout creation fails.
    pub fn bind_descriptors(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let key = self.descriptor_req;
        let usage = self.layout_req;
        if self.bound_descriptor == Some((key, usage)) {
            return Ok(());
        }
        let layout = self.get_or_create_pipeline_layout(usage)?;
        let sets = match self.lookup_descriptor_sets(&key, usage) {
            Some(sets) => sets,
            None => self.create_descriptor_entry(key, usage, layout.set_layouts)?,
        };
        // SAFETY: cmd is in the recording state by contract, the sets and layout are alive.
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout.handle,
                0,
                &sets,
                &[],
            );
        }
        self.bound_descriptor = Some((key, usage));
        Ok(())
    }

    /// Commit the pipeline requirements: get or create the matching pipeline and record the
    /// bind, unless the identical state is already bound on this command buffer.
    /// # Errors
    /// - Fails when no program or no render pass is bound.
    /// - Fails when pipeline or layout creation fails, which is unrecoverable.
    pub fn bind_pipeline(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let key = PipelineKey {
            program: self.program_req,
            raster: self.raster_req,
            topology: self.topology_req,
            render_pass: self.render_pass_req,
            subpass: self.subpass_req,
            vertex: self.vertex_req,
            layout: self.layout_req,
        };
        if self.bound_pipeline == Some(key) {
            return Ok(());
        }
        if key.program.vertex == vk::ShaderModule::null()
            || key.program.fragment == vk::ShaderModule::null()
        {
            return Err(Error::NoProgramBound.into());
        }
        if key.render_pass == vk::RenderPass::null() {
            return Err(Error::NoRenderPassBound.into());
        }
        let layout = self.get_or_create_pipeline_layout(key.layout)?;
        let handle = match self.pipelines.get_mut(&key) {
            Some(entry) => {
                entry.last_used = self.current_time;
                entry.handle
            }
            None => {
                let handle = self.create_pipeline(&key, layout.handle)?;
                self.pipelines.insert(
                    key,
                    PipelineEntry {
                        handle,
                        last_used: self.current_time,
                    },
                );
                handle
            }
        };
        // SAFETY: cmd is in the recording state by contract.
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, handle)
        };
        self.bound_pipeline = Some(key);
        Ok(())
    }

    /// Record a scissor update if `scissor` differs from the last one recorded on this
    /// command buffer. Scissor is dynamic state, tracked separately from the pipeline key.
    pub fn bind_scissor(&mut self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        let packed = (
            scissor.offset.x,
            scissor.offset.y,
            scissor.extent.width,
            scissor.extent.height,
        );
        if self.bound_scissor == Some(packed) {
            return;
        }
        // SAFETY: cmd is in the recording state by contract.
        unsafe {
            self.device
                .cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor))
        };
        self.bound_scissor = Some(packed);
    }

    /// Forget `buffer` everywhere: clear any requirement slot holding it and purge cached
    /// descriptors referencing it. Must be called before the buffer is destroyed; time based
    /// eviction alone cannot prevent a cached descriptor from dangling.
    pub fn unbind_uniform_buffer(&mut self, buffer: vk::Buffer) {
        for slot in 0..UNIFORM_BINDING_COUNT {
            if self.descriptor_req.uniform_buffers[slot] == buffer {
                self.descriptor_req.uniform_buffers[slot] = vk::Buffer::null();
                self.descriptor_req.uniform_offsets[slot] = 0;
                self.descriptor_req.uniform_ranges[slot] = 0;
            }
        }
        self.purge_descriptors(|key| key.uniform_buffers.contains(&buffer));
        self.bound_descriptor = None;
    }

    /// Like [`unbind_uniform_buffer`](Self::unbind_uniform_buffer), for an image view bound
    /// as a sampler or input attachment.
    pub fn unbind_image_view(&mut self, view: vk::ImageView) {
        for binding in &mut self.descriptor_req.samplers {
            if binding.image_view == view {
                *binding = SamplerBinding::default();
            }
        }
        for binding in &mut self.descriptor_req.input_attachments {
            if binding.image_view == view {
                *binding = InputAttachmentBinding::default();
            }
        }
        self.purge_descriptors(|key| {
            key.samplers.iter().any(|binding| binding.image_view == view)
                || key
                    .input_attachments
                    .iter()
                    .any(|binding| binding.image_view == view)
        });
        self.bound_descriptor = None;
    }

    /// Advance the logical clock and reclaim stale entries: descriptor sets return to their
    /// layout's arena, pipelines are destroyed, layouts are destroyed once nothing references
    /// them, and extinct descriptor pools move one frame closer to destruction.
    pub fn gc(&mut self) {
        self.current_time += 1;
        self.reclaim_retired_sets();
        self.retire_descriptors();
        for handle in self.take_expired_pipelines() {
            #[cfg(feature = "log-objects")]
            trace!("Destroying VkPipeline {handle:?}");
            unsafe { self.device.destroy_pipeline(handle, None) };
        }
        for entry in self.take_expired_layouts() {
            self.destroy_layout(entry);
        }
        self.extinct_pools.next_frame();
    }

    /// Destroy every cached object, the descriptor pools and the placeholder resources.
    /// Must run before device destruction, once no command buffer references any of them.
    /// # Errors
    /// Fails only when returning placeholder memory to the allocator fails.
    pub fn destroy_cache(&mut self) -> Result<()> {
        for (_, entry) in self.pipelines.drain() {
            unsafe { self.device.destroy_pipeline(entry.handle, None) };
        }
        // Cached, arena'd and retired sets die with their pool below.
        self.descriptors.clear();
        self.retired_sets.clear();
        for (_, entry) in self.layouts.drain() {
            unsafe {
                self.device.destroy_pipeline_layout(entry.handle, None);
                for set_layout in entry.set_layouts {
                    self.device.destroy_descriptor_set_layout(set_layout, None);
                }
            }
        }
        self.pool = None;
        self.extinct_pools.drain();
        if let Some(placeholders) = self.placeholders.take() {
            unsafe {
                self.device.destroy_sampler(placeholders.sampler, None);
                self.device.destroy_buffer(placeholders.buffer, None);
            }
            self.allocator.free(placeholders.memory)?;
        }
        self.bound_pipeline = None;
        self.bound_descriptor = None;
        self.bound_scissor = None;
        Ok(())
    }

    fn get_or_create_pipeline_layout(&mut self, usage: LayoutUsage) -> Result<LayoutHandles> {
        if let Some(entry) = self.layouts.get_mut(&usage) {
            entry.last_used = self.current_time;
            return Ok(LayoutHandles {
                handle: entry.handle,
                set_layouts: entry.set_layouts,
            });
        }

        let uniform_bindings: Vec<_> = (0..UNIFORM_BINDING_COUNT)
            .map(|slot| vk::DescriptorSetLayoutBinding {
                binding: slot as u32,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            })
            .collect();
        // Every layout exposes the full complement of sampler bindings; only the stage flags
        // vary with the usage bitset. Unused slots keep both stages so the padded placeholder
        // writes stay valid.
        let sampler_bindings: Vec<_> = (0..SAMPLER_BINDING_COUNT)
            .map(|slot| {
                let stages = usage.stages(slot);
                let stage_flags = if stages.is_empty() {
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
                } else {
                    stages
                };
                vk::DescriptorSetLayoutBinding {
                    binding: slot as u32,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: 1,
                    stage_flags,
                    ..Default::default()
                }
            })
            .collect();
        let input_bindings: Vec<_> = (0..INPUT_ATTACHMENT_COUNT)
            .map(|slot| vk::DescriptorSetLayoutBinding {
                binding: slot as u32,
                descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            })
            .collect();

        let mut set_layouts = [vk::DescriptorSetLayout::null(); DESCRIPTOR_TYPE_COUNT];
        for (layout, bindings) in set_layouts
            .iter_mut()
            .zip([&uniform_bindings, &sampler_bindings, &input_bindings])
        {
            let info = vk::DescriptorSetLayoutCreateInfo::builder()
                .bindings(bindings)
                .build();
            // SAFETY: valid create info built above.
            *layout = unsafe { self.device.create_descriptor_set_layout(&info, None)? };
        }
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .build();
        // SAFETY: the set layouts were created just above.
        let handle = unsafe { self.device.create_pipeline_layout(&info, None)? };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkPipelineLayout {handle:?}");
        self.layouts.insert(
            usage,
            LayoutEntry {
                handle,
                set_layouts,
                arenas: Default::default(),
                last_used: self.current_time,
            },
        );
        Ok(LayoutHandles {
            handle,
            set_layouts,
        })
    }

    // A cached entry only counts as a hit when it was allocated against the requested layout
    // usage. The sampler set layouts differ per usage in their stage flags, so sets written
    // for another usage are not compatible with the pipeline layout bound here; the stale
    // entry is retired and rebuilt.
    fn lookup_descriptor_sets(
        &mut self,
        key: &DescriptorKey,
        usage: LayoutUsage,
    ) -> Option<[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT]> {
        match self.descriptors.get_mut(key) {
            Some(entry) if entry.layout == usage => {
                entry.last_used = self.current_time;
                Some(entry.sets)
            }
            Some(_) => {
                if let Some(stale) = self.descriptors.remove(key) {
                    self.park_sets(stale);
                }
                None
            }
            None => None,
        }
    }

    fn create_descriptor_entry(
        &mut self,
        key: DescriptorKey,
        usage: LayoutUsage,
        set_layouts: [vk::DescriptorSetLayout; DESCRIPTOR_TYPE_COUNT],
    ) -> Result<[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT]> {
        let sets = self.allocate_descriptor_sets(usage, &set_layouts)?;
        self.write_descriptors(&key, &sets)?;
        self.descriptors.insert(
            key,
            DescriptorEntry {
                sets,
                layout: usage,
                last_used: self.current_time,
            },
        );
        Ok(sets)
    }

    // Arena first, then the pool, then growth plus one bounded retry.
    fn allocate_descriptor_sets(
        &mut self,
        usage: LayoutUsage,
        set_layouts: &[vk::DescriptorSetLayout; DESCRIPTOR_TYPE_COUNT],
    ) -> Result<[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT]> {
        if let Some(entry) = self.layouts.get_mut(&usage) {
            if entry.arenas.iter().all(|arena| !arena.is_empty()) {
                let mut sets = [vk::DescriptorSet::null(); DESCRIPTOR_TYPE_COUNT];
                for (slot, arena) in sets.iter_mut().zip(entry.arenas.iter_mut()) {
                    if let Some(set) = arena.pop() {
                        *slot = set;
                    }
                }
                return Ok(sets);
            }
        }
        match self.pool_mut()?.allocate(set_layouts) {
            Ok(sets) => Self::into_set_array(sets),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.grow_descriptor_pool()?;
                let sets = self
                    .pool_mut()?
                    .allocate(set_layouts)
                    .map_err(Error::DescriptorSetAllocationFailed)?;
                Self::into_set_array(sets)
            }
            Err(err) => Err(Error::DescriptorSetAllocationFailed(err).into()),
        }
    }

    fn into_set_array(
        sets: Vec<vk::DescriptorSet>,
    ) -> Result<[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT]> {
        sets.try_into().map_err(|_| {
            anyhow::Error::from(Error::DescriptorSetAllocationFailed(vk::Result::ERROR_UNKNOWN))
        })
    }

    fn pool_mut(&mut self) -> Result<&mut DescriptorPool> {
        match &mut self.pool {
            Some(pool) => Ok(pool),
            slot => {
                let pool = DescriptorPool::new(self.device.clone(), self.pool_capacity)?;
                Ok(slot.insert(pool))
            }
        }
    }

    /// Replace the pool with one of twice the capacity. The old pool and every set allocated
    /// from it may still be referenced by in-flight command buffers, so the pool moves to the
    /// extinct queue and all cached sets and arenas are dropped with it.
    fn grow_descriptor_pool(&mut self) -> Result<()> {
        let capacity = self
            .pool
            .as_ref()
            .map(|pool| pool.capacity() * 2)
            .unwrap_or(self.pool_capacity);
        let new_pool = DescriptorPool::new(self.device.clone(), capacity)?;
        debug!("descriptor pool exhausted, growing to capacity {capacity}");
        if let Some(old) = self.pool.replace(new_pool) {
            self.extinct_pools.push(old);
        }
        self.pool_capacity = capacity;
        self.descriptors.clear();
        self.retired_sets.clear();
        for entry in self.layouts.values_mut() {
            for arena in &mut entry.arenas {
                arena.clear();
            }
        }
        self.bound_descriptor = None;
        Ok(())
    }

    fn write_descriptors(
        &mut self,
        key: &DescriptorKey,
        sets: &[vk::DescriptorSet; DESCRIPTOR_TYPE_COUNT],
    ) -> Result<()> {
        let (placeholder_buffer, placeholder_sampler) = self.ensure_placeholders()?;

        let mut buffer_infos = [vk::DescriptorBufferInfo::default(); UNIFORM_BINDING_COUNT];
        for (slot, info) in buffer_infos.iter_mut().enumerate() {
            let buffer = key.uniform_buffers[slot];
            *info = if buffer == vk::Buffer::null() {
                vk::DescriptorBufferInfo {
                    buffer: placeholder_buffer,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                }
            } else {
                vk::DescriptorBufferInfo {
                    buffer,
                    offset: key.uniform_offsets[slot],
                    range: key.uniform_ranges[slot],
                }
            };
        }
        let mut sampler_infos = [vk::DescriptorImageInfo::default(); SAMPLER_BINDING_COUNT];
        for (slot, info) in sampler_infos.iter_mut().enumerate() {
            let binding = key.samplers[slot];
            *info = if binding == SamplerBinding::default() {
                vk::DescriptorImageInfo {
                    sampler: placeholder_sampler,
                    image_view: self.placeholder_image_view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }
            } else {
                vk::DescriptorImageInfo {
                    sampler: binding.sampler,
                    image_view: binding.image_view,
                    image_layout: binding.image_layout,
                }
            };
        }
        let mut input_infos = [vk::DescriptorImageInfo::default(); INPUT_ATTACHMENT_COUNT];
        for (slot, info) in input_infos.iter_mut().enumerate() {
            let binding = key.input_attachments[slot];
            *info = if binding == InputAttachmentBinding::default() {
                vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: self.placeholder_image_view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }
            } else {
                vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: binding.image_view,
                    image_layout: binding.image_layout,
                }
            };
        }

        let mut writes = Vec::with_capacity(
            UNIFORM_BINDING_COUNT + SAMPLER_BINDING_COUNT + INPUT_ATTACHMENT_COUNT,
        );
        for (slot, info) in buffer_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(sets[0])
                    .dst_binding(slot as u32)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
            );
        }
        for (slot, info) in sampler_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(sets[1])
                    .dst_binding(slot as u32)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info))
                    .build(),
            );
        }
        for (slot, info) in input_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(sets[2])
                    .dst_binding(slot as u32)
                    .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                    .image_info(std::slice::from_ref(info))
                    .build(),
            );
        }
        // SAFETY: the sets were just allocated, the infos outlive the call.
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    fn ensure_placeholders(&mut self) -> Result<(vk::Buffer, vk::Sampler)> {
        if let Some(placeholders) = &self.placeholders {
            return Ok((placeholders.buffer, placeholders.sampler));
        }
        let info = vk::BufferCreateInfo::builder()
            .size(PLACEHOLDER_BUFFER_SIZE)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(self.device.sharing_mode())
            .queue_family_indices(self.device.queue_families())
            .build();
        // SAFETY: valid create info, the device outlives the cache.
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory =
            self.allocator
                .allocate("placeholder uniform buffer", &requirements, MemoryType::GpuOnly)?;
        unsafe {
            self.device
                .bind_buffer_memory(buffer, memory.memory(), memory.offset())?
        };
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .build();
        // SAFETY: valid create info built above.
        let sampler = unsafe { self.device.create_sampler(&sampler_info, None)? };
        #[cfg(feature = "log-objects")]
        trace!("Created placeholder VkBuffer {buffer:?} and VkSampler {sampler:?}");
        self.placeholders = Some(PlaceholderResources {
            buffer,
            memory,
            sampler,
        });
        Ok((buffer, sampler))
    }

    // Unlike gc retirement, a purge can hit an entry that was bound this very frame, so the
    // sets must not reach the arena (and a rewrite through vkUpdateDescriptorSets) until the
    // delay has passed.
    fn purge_descriptors(&mut self, predicate: impl Fn(&DescriptorKey) -> bool) {
        let purged: Vec<_> = self
            .descriptors
            .keys()
            .copied()
            .filter(|key| predicate(key))
            .collect();
        for key in purged {
            if let Some(entry) = self.descriptors.remove(&key) {
                self.park_sets(entry);
            }
        }
    }

    fn park_sets(&mut self, entry: DescriptorEntry) {
        self.retired_sets.push(RetiredSets {
            sets: entry.sets,
            layout: entry.layout,
            retired_at: self.current_time,
        });
    }

    // Parked sets re-enter their layout's arena once the delay has elapsed. If the layout was
    // evicted in the meantime the sets go back to the pool instead.
    fn reclaim_retired_sets(&mut self) {
        let mut index = 0;
        while index < self.retired_sets.len() {
            if self.current_time - self.retired_sets[index].retired_at < self.eviction_delay {
                index += 1;
                continue;
            }
            let retired = self.retired_sets.swap_remove(index);
            match self.layouts.get_mut(&retired.layout) {
                Some(layout) => {
                    for (arena, set) in layout.arenas.iter_mut().zip(retired.sets) {
                        arena.push(set);
                    }
                }
                None => {
                    if let Some(pool) = &self.pool {
                        if let Err(err) = pool.free(&retired.sets) {
                            error!("failed to free retired descriptor sets: {err}");
                        }
                    }
                }
            }
        }
    }

    fn recycle_sets(&mut self, entry: DescriptorEntry) {
        if let Some(layout) = self.layouts.get_mut(&entry.layout) {
            for (arena, set) in layout.arenas.iter_mut().zip(entry.sets) {
                arena.push(set);
            }
        }
    }

    fn retire_descriptors(&mut self) {
        let expired: Vec<_> = self
            .descriptors
            .iter()
            .filter(|(_, entry)| self.current_time - entry.last_used >= self.eviction_delay)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            if let Some(entry) = self.descriptors.remove(&key) {
                self.recycle_sets(entry);
            }
        }
    }

    fn take_expired_pipelines(&mut self) -> Vec<vk::Pipeline> {
        let expired: Vec<_> = self
            .pipelines
            .iter()
            .filter(|(_, entry)| self.current_time - entry.last_used >= self.eviction_delay)
            .map(|(key, _)| *key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.pipelines.remove(&key))
            .map(|entry| entry.handle)
            .collect()
    }

    // A layout only becomes eligible once no pipeline is keyed on it and no cached descriptor
    // entry was allocated against it, so freeing its arena sets and set layouts is sound.
    fn take_expired_layouts(&mut self) -> Vec<LayoutEntry> {
        let expired: Vec<_> = self
            .layouts
            .iter()
            .filter(|(usage, entry)| {
                self.current_time - entry.last_used >= self.eviction_delay
                    && !self.pipelines.keys().any(|key| key.layout == **usage)
                    && !self.descriptors.values().any(|entry| entry.layout == **usage)
            })
            .map(|(usage, _)| *usage)
            .collect();
        expired
            .into_iter()
            .filter_map(|usage| self.layouts.remove(&usage))
            .collect()
    }

    fn destroy_layout(&mut self, entry: LayoutEntry) {
        if let Some(pool) = &self.pool {
            for arena in &entry.arenas {
                if arena.is_empty() {
                    continue;
                }
                if let Err(err) = pool.free(arena) {
                    error!("failed to free {} recycled descriptor sets: {err}", arena.len());
                }
            }
        }
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkPipelineLayout {:?}", entry.handle);
        unsafe {
            self.device.destroy_pipeline_layout(entry.handle, None);
            for set_layout in entry.set_layouts {
                self.device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }

    fn create_pipeline(&self, key: &PipelineKey, layout: vk::PipelineLayout) -> Result<vk::Pipeline> {
        let entry = CString::new("main")?;
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(key.program.vertex)
                .name(&entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(key.program.fragment)
                .name(&entry)
                .build(),
        ];

        let attributes: Vec<_> = key
            .vertex
            .attributes
            .iter()
            .copied()
            .filter(|attribute| attribute.format != vk::Format::UNDEFINED)
            .collect();
        let mut used_bindings: Vec<u32> = attributes.iter().map(|a| a.binding).collect();
        used_bindings.sort_unstable();
        used_bindings.dedup();
        let bindings: Vec<_> = used_bindings
            .into_iter()
            .map(|binding| key.vertex.buffers[binding as usize])
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_attribute_descriptions(&attributes)
            .vertex_binding_descriptions(&bindings)
            .build();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(key.topology)
            .build();
        // Viewport and scissor are dynamic state; only the counts matter here.
        let viewport = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
            .build();
        let raster = &key.raster;
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(raster.cull_mode)
            .front_face(raster.front_face)
            .depth_bias_enable(raster.depth_bias_enable)
            .depth_bias_constant_factor(raster.depth_bias_constant_factor)
            .depth_bias_slope_factor(raster.depth_bias_slope_factor)
            .line_width(1.0)
            .build();
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(raster.rasterization_samples)
            .alpha_to_coverage_enable(raster.alpha_to_coverage_enable)
            .build();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(raster.depth_test_enable)
            .depth_write_enable(raster.depth_write_enable)
            .depth_compare_op(raster.depth_compare_op)
            .build();
        let blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(raster.blend_enable)
            .src_color_blend_factor(raster.src_color_blend_factor)
            .dst_color_blend_factor(raster.dst_color_blend_factor)
            .color_blend_op(raster.color_blend_op)
            .src_alpha_blend_factor(raster.src_alpha_blend_factor)
            .dst_alpha_blend_factor(raster.dst_alpha_blend_factor)
            .alpha_blend_op(raster.alpha_blend_op)
            .color_write_mask(raster.color_write_mask)
            .build();
        let blend_attachments = vec![blend_attachment; raster.color_target_count as usize];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_attachments)
            .build();
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .render_pass(key.render_pass)
            .subpass(key.subpass)
            .build();
        // SAFETY: all referenced state lives until the call returns.
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&info),
                    None,
                )
                .map_err(|(_, err)| Error::PipelineCreationFailed(err))?
        };
        let handle = pipelines
            .first()
            .copied()
            .ok_or(Error::PipelineCreationFailed(vk::Result::ERROR_UNKNOWN))?;
        #[cfg(feature = "log-objects")]
        trace!("Created new VkPipeline {handle:?}");
        Ok(handle)
    }
}

impl<A: Allocator> CommandBufferObserver for PipelineCache<A> {
    /// A new command buffer has no bindings, whatever this cache recorded on the previous
    /// one. Forgetting to reset the shadow state makes redundant-bind elision skip binds the
    /// new buffer actually needs.
    fn on_command_buffer(&mut self, _cmd: vk::CommandBuffer) {
        self.bound_pipeline = None;
        self.bound_descriptor = None;
        self.bound_scissor = None;
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::util::testing::{null_device, MockAllocator};

    fn test_cache() -> PipelineCache<MockAllocator> {
        PipelineCache::new(null_device(), MockAllocator::default(), &CacheConfig::default())
    }

    fn insert_layout(cache: &mut PipelineCache<MockAllocator>, usage: LayoutUsage, raw: u64) {
        cache.layouts.insert(
            usage,
            LayoutEntry {
                handle: vk::PipelineLayout::from_raw(raw),
                set_layouts: [
                    vk::DescriptorSetLayout::from_raw(raw + 1),
                    vk::DescriptorSetLayout::from_raw(raw + 2),
                    vk::DescriptorSetLayout::from_raw(raw + 3),
                ],
                arenas: Default::default(),
                last_used: cache.current_time,
            },
        );
    }

    fn insert_descriptor(
        cache: &mut PipelineCache<MockAllocator>,
        key: DescriptorKey,
        usage: LayoutUsage,
        raw: u64,
    ) {
        cache.descriptors.insert(
            key,
            DescriptorEntry {
                sets: [
                    vk::DescriptorSet::from_raw(raw),
                    vk::DescriptorSet::from_raw(raw + 1),
                    vk::DescriptorSet::from_raw(raw + 2),
                ],
                layout: usage,
                last_used: cache.current_time,
            },
        );
    }

    #[test]
    fn redundant_descriptor_bind_is_skipped() {
        let mut cache = test_cache();
        cache.bound_descriptor = Some((cache.descriptor_req, cache.layout_req));
        // Identical state: must return without touching the device or the caches.
        cache.bind_descriptors(vk::CommandBuffer::null()).unwrap();
        assert!(cache.descriptors.is_empty());
        assert!(cache.layouts.is_empty());
    }

    #[test]
    fn descriptor_bind_redundancy_includes_layout_usage() {
        let mut cache = test_cache();
        cache.bound_descriptor = Some((cache.descriptor_req, cache.layout_req));
        cache.bind_descriptors(vk::CommandBuffer::null()).unwrap();
        // Same descriptor values, different stage usage: a different pipeline layout must be
        // bound, so the shadow state no longer matches.
        cache.layout_req = LayoutUsage::NONE.with_sampler(2, vk::ShaderStageFlags::VERTEX);
        assert_ne!(
            cache.bound_descriptor,
            Some((cache.descriptor_req, cache.layout_req))
        );
    }

    #[test]
    fn descriptor_hit_with_stale_layout_usage_is_a_miss() {
        let mut cache = test_cache();
        let old_usage = LayoutUsage::NONE;
        let new_usage = LayoutUsage::NONE.with_sampler(0, vk::ShaderStageFlags::FRAGMENT);
        insert_layout(&mut cache, old_usage, 0x100);
        let key = DescriptorKey::default();
        insert_descriptor(&mut cache, key, old_usage, 0x200);

        // The entry's sets were written against the old usage's set layouts; they must not be
        // handed out for the new usage.
        assert!(cache.lookup_descriptor_sets(&key, new_usage).is_none());
        assert!(cache.descriptors.is_empty());
        assert_eq!(cache.retired_sets.len(), 1);

        insert_descriptor(&mut cache, key, new_usage, 0x300);
        assert!(cache.lookup_descriptor_sets(&key, new_usage).is_some());
    }

    #[test]
    fn redundant_scissor_is_skipped() {
        let mut cache = test_cache();
        cache.bound_scissor = Some((0, 0, 640, 480));
        cache.bind_scissor(
            vk::CommandBuffer::null(),
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: 640,
                    height: 480,
                },
            },
        );
        assert_eq!(cache.bound_scissor, Some((0, 0, 640, 480)));
    }

    #[test]
    fn command_buffer_swap_clears_shadow_bindings() {
        let mut cache = test_cache();
        cache.bound_pipeline = Some(PipelineKey::default());
        cache.bound_descriptor = Some((DescriptorKey::default(), LayoutUsage::NONE));
        cache.bound_scissor = Some((0, 0, 1, 1));
        cache.on_command_buffer(vk::CommandBuffer::null());
        assert!(cache.bound_pipeline.is_none());
        assert!(cache.bound_descriptor.is_none());
        assert!(cache.bound_scissor.is_none());
    }

    #[test]
    fn repeated_binds_are_idempotent() {
        let mut cache = test_cache();
        let buffer = vk::Buffer::from_raw(7);
        cache.bind_uniform_buffer(2, buffer, 0, 256);
        let snapshot = cache.descriptor_req;
        cache.bind_uniform_buffer(2, buffer, 0, 256);
        assert_eq!(cache.descriptor_req, snapshot);
    }

    #[test]
    fn vertex_array_rebind_zeroes_stale_slots() {
        let mut cache = test_cache();
        let attribute = vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        };
        let second = vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32_SFLOAT,
            offset: 8,
        };
        let buffer = vk::VertexInputBindingDescription {
            binding: 0,
            stride: 12,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        cache.bind_vertex_array(&[attribute, second], &[buffer]);
        cache.bind_vertex_array(&[attribute], &[buffer]);
        assert_eq!(cache.vertex_req.attributes[1].format, vk::Format::UNDEFINED);
        assert_eq!(cache.vertex_req, {
            let mut expected = VertexArray::default();
            expected.attributes[0] = attribute;
            expected.buffers[0] = buffer;
            expected
        });
    }

    #[test]
    #[should_panic]
    fn out_of_range_uniform_slot_panics() {
        let mut cache = test_cache();
        cache.bind_uniform_buffer(UNIFORM_BINDING_COUNT, vk::Buffer::from_raw(1), 0, 16);
    }

    #[test]
    #[should_panic]
    fn out_of_range_attribute_binding_panics() {
        let mut cache = test_cache();
        let attribute = vk::VertexInputAttributeDescription {
            location: 0,
            binding: MAX_VERTEX_ATTRIBUTES as u32,
            format: vk::Format::R32_SFLOAT,
            offset: 0,
        };
        cache.bind_vertex_array(&[attribute], &[]);
    }

    #[test]
    fn unbind_uniform_buffer_purges_cached_descriptors() {
        let mut cache = test_cache();
        let buffer = vk::Buffer::from_raw(0xb0);
        let usage = LayoutUsage::NONE;
        insert_layout(&mut cache, usage, 0x100);
        cache.bind_uniform_buffer(0, buffer, 0, 64);
        let key = cache.descriptor_req;
        insert_descriptor(&mut cache, key, usage, 0x200);
        cache.bound_descriptor = Some((key, usage));

        cache.unbind_uniform_buffer(buffer);

        assert!(cache.descriptors.is_empty());
        assert_eq!(cache.descriptor_req.uniform_buffers[0], vk::Buffer::null());
        assert!(cache.bound_descriptor.is_none());
        // The purged sets are parked, not yet reusable: the command buffer that bound them
        // may still be in flight.
        assert_eq!(cache.retired_sets.len(), 1);
        let entry = cache.layouts.get(&usage).unwrap();
        assert!(entry.arenas.iter().all(|arena| arena.is_empty()));
    }

    #[test]
    fn purged_sets_reach_the_arena_only_after_the_delay() {
        let mut cache = test_cache();
        let usage = LayoutUsage::NONE;
        insert_layout(&mut cache, usage, 0x100);
        let buffer = vk::Buffer::from_raw(0xb1);
        cache.bind_uniform_buffer(0, buffer, 0, 64);
        let key = cache.descriptor_req;
        insert_descriptor(&mut cache, key, usage, 0x200);
        cache.unbind_uniform_buffer(buffer);
        assert_eq!(cache.retired_sets.len(), 1);

        cache.current_time += 1;
        cache.reclaim_retired_sets();
        assert_eq!(cache.retired_sets.len(), 1);

        cache.current_time += 1;
        cache.reclaim_retired_sets();
        assert!(cache.retired_sets.is_empty());
        let entry = cache.layouts.get(&usage).unwrap();
        assert!(entry.arenas.iter().all(|arena| arena.len() == 1));
    }

    #[test]
    fn unbind_image_view_purges_sampler_descriptors() {
        let mut cache = test_cache();
        let view = vk::ImageView::from_raw(0xe0);
        let usage = LayoutUsage::NONE.with_sampler(0, vk::ShaderStageFlags::FRAGMENT);
        insert_layout(&mut cache, usage, 0x100);
        cache.bind_samplers(
            &[SamplerBinding {
                sampler: vk::Sampler::from_raw(1),
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }],
            usage,
        );
        let key = cache.descriptor_req;
        insert_descriptor(&mut cache, key, usage, 0x300);

        cache.unbind_image_view(view);

        assert!(cache.descriptors.is_empty());
        assert_eq!(cache.retired_sets.len(), 1);
        assert_eq!(cache.descriptor_req.samplers[0], SamplerBinding::default());
    }

    #[test]
    fn retired_descriptors_return_to_arena() {
        let mut cache = test_cache();
        let usage = LayoutUsage::NONE;
        insert_layout(&mut cache, usage, 0x100);
        let key = DescriptorKey::default();
        insert_descriptor(&mut cache, key, usage, 0x200);

        cache.current_time += 1;
        cache.retire_descriptors();
        assert_eq!(cache.descriptors.len(), 1);

        cache.current_time += 1;
        cache.retire_descriptors();
        assert!(cache.descriptors.is_empty());
        let entry = cache.layouts.get(&usage).unwrap();
        assert!(entry.arenas.iter().all(|arena| arena.len() == 1));
    }

    #[test]
    fn layout_eviction_waits_for_pipelines_and_descriptors() {
        let mut cache = test_cache();
        let usage = LayoutUsage::NONE.with_sampler(1, vk::ShaderStageFlags::VERTEX);
        insert_layout(&mut cache, usage, 0x100);
        let pipeline_key = PipelineKey {
            layout: usage,
            ..Default::default()
        };
        cache.pipelines.insert(
            pipeline_key,
            PipelineEntry {
                handle: vk::Pipeline::from_raw(0x400),
                last_used: 0,
            },
        );
        insert_descriptor(&mut cache, DescriptorKey::default(), usage, 0x200);

        cache.current_time += 2;
        assert!(cache.take_expired_layouts().is_empty());

        let destroyed = cache.take_expired_pipelines();
        assert_eq!(destroyed.len(), 1);
        assert!(cache.take_expired_layouts().is_empty());

        cache.retire_descriptors();
        let layouts = cache.take_expired_layouts();
        assert_eq!(layouts.len(), 1);
        assert!(cache.layouts.is_empty());
    }

    #[test]
    fn fresh_entries_survive_gc_window() {
        let mut cache = test_cache();
        let usage = LayoutUsage::NONE;
        insert_layout(&mut cache, usage, 0x100);
        cache.current_time += 1;
        // Touch it the way a layout lookup would.
        if let Some(entry) = cache.layouts.get_mut(&usage) {
            entry.last_used = cache.current_time;
        }
        cache.current_time += 1;
        assert!(cache.take_expired_layouts().is_empty());
    }
}
