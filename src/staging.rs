//! A pool of recycled CPU visible staging buffers.
//!
//! Upload paths constantly need short-lived host visible buffers to stage data into before a
//! device local copy. Allocating one per upload is expensive, so the pool keeps released
//! stages in a free list ordered by capacity and serves [`acquire_stage`] requests with the
//! smallest free stage that fits. Free stages that go unused for a configurable number of
//! [`gc`](StagePool::gc) cycles are destroyed.
//!
//! A stage can be released in two ways: [`release_stage`](StagePool::release_stage) puts it
//! straight back into the free list, while [`release_stage_deferred`](StagePool::release_stage_deferred)
//! parks it in the [`Disposer`] tied to a command buffer's resource set, so the pool only gets
//! it back once that buffer's GPU work has completed.
//!
//! [`acquire_stage`]: StagePool::acquire_stage

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::rc::Rc;

use anyhow::Result;
use ash::vk;
use ash::vk::Handle;

use crate::allocator::traits::Allocation as _;
use crate::disposer::{Disposer, DisposerKey, ResourceSet};
use crate::{Allocator, CacheConfig, DefaultAllocator, Device, MemoryType};

/// One pooled staging buffer. Owned by the pool at all times; callers interact through
/// [`StageView`].
#[derive(Derivative)]
#[derivative(Debug)]
struct Stage<A: Allocator> {
    buffer: vk::Buffer,
    #[derivative(Debug = "ignore")]
    memory: A::Allocation,
    capacity: vk::DeviceSize,
    last_used: u64,
}

impl<A: Allocator> Stage<A> {
    fn view(&self) -> StageView {
        StageView {
            buffer: self.buffer,
            capacity: self.capacity,
            pointer: self.memory.mapped_ptr(),
        }
    }
}

/// Non-owning view of an acquired stage. The buffer is mapped host visible memory; write
/// uploads through `pointer` and record a transfer from `buffer`.
#[derive(Debug, Copy, Clone)]
pub struct StageView {
    /// The underlying buffer handle, valid until the stage is released and evicted.
    pub buffer: vk::Buffer,
    /// Usable capacity in bytes. At least the size passed to acquire, possibly more when the
    /// request was served from the free list.
    pub capacity: vk::DeviceSize,
    /// Mapped pointer to the start of the buffer.
    pub pointer: Option<NonNull<c_void>>,
}

/// Recycling pool of CPU visible staging buffers.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct StagePool<A: Allocator = DefaultAllocator> {
    #[derivative(Debug = "ignore")]
    device: Device,
    #[derivative(Debug = "ignore")]
    allocator: A,
    // Free stages keyed by (capacity, serial): range((size, 0)..) is the best-fit lookup.
    free: BTreeMap<(vk::DeviceSize, u64), Stage<A>>,
    in_use: HashMap<u64, Stage<A>>,
    // Stages coming back from deferred releases. Shared with disposer destructors; single
    // threaded handoff, not a lock.
    returned: Rc<RefCell<Vec<Stage<A>>>>,
    current_time: u64,
    eviction_delay: u64,
    next_serial: u64,
}

impl<A: Allocator + 'static> StagePool<A> {
    /// Create an empty pool. No Vulkan objects are created until the first acquire.
    pub fn new(device: Device, allocator: A, config: &CacheConfig) -> Self {
        Self {
            device,
            allocator,
            free: BTreeMap::new(),
            in_use: HashMap::new(),
            returned: Rc::new(RefCell::new(Vec::new())),
            current_time: 0,
            eviction_delay: config.eviction_delay,
            next_serial: 0,
        }
    }

    /// Obtain a stage with a capacity of at least `num_bytes`, preferring the smallest free
    /// stage that fits and creating a new buffer of exactly `num_bytes` otherwise.
    /// # Errors
    /// Fails only when buffer creation or memory allocation fails, which callers treat as
    /// unrecoverable.
    pub fn acquire_stage(&mut self, num_bytes: vk::DeviceSize) -> Result<StageView> {
        debug_assert!(num_bytes > 0);
        self.drain_returned();

        // Best fit: lower bound on the ordered capacity index.
        let found = self
            .free
            .range((num_bytes, 0)..)
            .next()
            .map(|(key, _)| *key);
        let mut stage = match found.and_then(|key| self.free.remove(&key)) {
            Some(stage) => stage,
            None => self.create_stage(num_bytes)?,
        };
        stage.last_used = self.current_time;
        let view = stage.view();
        self.in_use.insert(stage.buffer.as_raw(), stage);
        Ok(view)
    }

    /// Return a stage to the free list immediately. Only correct when the CPU and GPU are
    /// both done with it.
    ///
    /// Releasing a stage the pool does not consider in use is logged and tolerated: it
    /// indicates a double release or a foreign buffer, and leaking a warning beats tearing
    /// the process down over it.
    pub fn release_stage(&mut self, stage: StageView) {
        match self.in_use.remove(&stage.buffer.as_raw()) {
            Some(stage) => self.insert_free(stage),
            None => {
                error!(
                    "released stage {:?} that is not in use, ignoring",
                    stage.buffer
                );
            }
        }
    }

    /// Release a stage once the given command buffer's resources are released. The stage is
    /// registered with the disposer under the buffer's identity and tied to `owner`; when the
    /// owning command buffer completes and the disposer gc runs, the stage re-enters the free
    /// list.
    pub fn release_stage_deferred(
        &mut self,
        stage: StageView,
        disposer: &mut Disposer,
        owner: &mut ResourceSet,
    ) {
        let Some(stage) = self.in_use.remove(&stage.buffer.as_raw()) else {
            error!(
                "deferred release of stage {:?} that is not in use, ignoring",
                stage.buffer
            );
            return;
        };
        let key = DisposerKey::from_handle(stage.buffer);
        let returns = Rc::clone(&self.returned);
        disposer.create_disposable(key, move || returns.borrow_mut().push(stage));
        disposer.acquire(key, owner);
        // Drop the creation reference; the command buffer's set now holds the only one.
        disposer.remove_reference(key);
    }

    /// Advance the pool's logical time and destroy free stages that have gone unused for the
    /// eviction delay. Must only run when the caller knows the GPU is done with everything
    /// released before the delay window.
    pub fn gc(&mut self) {
        self.current_time += 1;
        self.drain_returned();
        for stage in self.take_expired() {
            self.destroy_stage(stage);
        }
    }

    /// Destroy every pooled stage. Panics if stages are still in use; all call sites must
    /// have released their stages first. Must run while the device is still valid.
    pub fn reset(&mut self) {
        self.drain_returned();
        assert!(
            self.in_use.is_empty(),
            "stage pool reset with {} stages in use",
            self.in_use.len()
        );
        let free = std::mem::take(&mut self.free);
        for (_, stage) in free {
            self.destroy_stage(stage);
        }
    }

    /// Number of stages currently sitting in the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    fn insert_free(&mut self, mut stage: Stage<A>) {
        stage.last_used = self.current_time;
        let serial = self.next_serial;
        self.next_serial += 1;
        self.free.insert((stage.capacity, serial), stage);
    }

    fn drain_returned(&mut self) {
        let mut returned = self.returned.borrow_mut();
        let stages = std::mem::take(&mut *returned);
        drop(returned);
        for stage in stages {
            self.insert_free(stage);
        }
    }

    fn take_expired(&mut self) -> Vec<Stage<A>> {
        let expired: Vec<_> = self
            .free
            .iter()
            .filter(|(_, stage)| self.current_time - stage.last_used >= self.eviction_delay)
            .map(|(key, _)| *key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.free.remove(&key))
            .collect()
    }

    fn create_stage(&mut self, num_bytes: vk::DeviceSize) -> Result<Stage<A>> {
        let info = vk::BufferCreateInfo::builder()
            .size(num_bytes)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(self.device.sharing_mode())
            .queue_family_indices(self.device.queue_families())
            .build();
        // SAFETY: The create info above is valid and the device outlives the pool.
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = self
            .allocator
            .allocate("staging buffer", &requirements, MemoryType::CpuToGpu)?;
        unsafe {
            self.device
                .bind_buffer_memory(buffer, memory.memory(), memory.offset())?
        };
        #[cfg(feature = "log-objects")]
        trace!("Created new staging VkBuffer {buffer:?} ({num_bytes} bytes)");
        Ok(Stage {
            buffer,
            memory,
            capacity: num_bytes,
            last_used: self.current_time,
        })
    }

    fn destroy_stage(&mut self, stage: Stage<A>) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying staging VkBuffer {:?}", stage.buffer);
        unsafe { self.device.destroy_buffer(stage.buffer, None) };
        let _ = self.allocator.free(stage.memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{null_device, MockAllocation, MockAllocator};

    fn pool_with_delay(delay: u64) -> StagePool<MockAllocator> {
        let config = CacheConfig {
            eviction_delay: delay,
            ..Default::default()
        };
        StagePool::new(null_device(), MockAllocator::default(), &config)
    }

    fn push_free(pool: &mut StagePool<MockAllocator>, capacity: vk::DeviceSize) -> vk::Buffer {
        let buffer = vk::Buffer::from_raw(0x1000 + capacity);
        pool.insert_free(Stage {
            buffer,
            memory: MockAllocation,
            capacity,
            last_used: pool.current_time,
        });
        buffer
    }

    #[test]
    fn acquire_picks_smallest_fitting_stage() {
        let mut pool = pool_with_delay(2);
        push_free(&mut pool, 8);
        let expected = push_free(&mut pool, 32);
        push_free(&mut pool, 64);

        let view = pool.acquire_stage(20).unwrap();
        assert_eq!(view.buffer, expected);
        assert_eq!(view.capacity, 32);
        assert_eq!(pool.free_count(), 2);
        assert!(pool.in_use.contains_key(&expected.as_raw()));
    }

    #[test]
    fn release_returns_stage_to_free_list() {
        let mut pool = pool_with_delay(2);
        push_free(&mut pool, 16);
        let view = pool.acquire_stage(10).unwrap();
        assert_eq!(pool.free_count(), 0);
        pool.release_stage(view);
        assert_eq!(pool.free_count(), 1);
        assert!(pool.in_use.is_empty());
    }

    #[test]
    fn release_of_unknown_stage_is_tolerated() {
        // Run with RUST_LOG=error to see the tolerated-release log line.
        let _ = pretty_env_logger::try_init();
        let mut pool = pool_with_delay(2);
        pool.release_stage(StageView {
            buffer: vk::Buffer::from_raw(0xdead),
            capacity: 64,
            pointer: None,
        });
        assert!(pool.in_use.is_empty());
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn eviction_respects_the_delay_window() {
        let mut pool = pool_with_delay(2);
        push_free(&mut pool, 128);

        pool.current_time += 1;
        assert!(pool.take_expired().is_empty());
        pool.current_time += 1;
        let expired = pool.take_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].capacity, 128);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn touched_stage_is_not_evicted() {
        let mut pool = pool_with_delay(2);
        push_free(&mut pool, 128);
        pool.current_time += 1;
        // Touch it: acquire + release re-stamps last_used.
        let view = pool.acquire_stage(100).unwrap();
        pool.release_stage(view);
        pool.current_time += 1;
        assert!(pool.take_expired().is_empty());
    }

    #[test]
    fn deferred_release_reenters_pool_after_disposer_gc() {
        let mut pool = pool_with_delay(2);
        push_free(&mut pool, 256);
        let view = pool.acquire_stage(200).unwrap();

        let mut disposer = Disposer::new();
        let mut owner = ResourceSet::new();
        pool.release_stage_deferred(view, &mut disposer, &mut owner);
        assert!(pool.in_use.is_empty());
        assert_eq!(pool.free_count(), 0);

        // Command buffer completes: references dropped, then destruction deferred to gc.
        disposer.release(&mut owner);
        assert_eq!(pool.free_count(), 0);
        disposer.gc();
        pool.drain_returned();
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    #[should_panic]
    fn reset_with_in_use_stages_panics() {
        let mut pool = pool_with_delay(2);
        push_free(&mut pool, 64);
        let _view = pool.acquire_stage(10).unwrap();
        pool.reset();
    }
}
