//! Contains a default allocator type based on the [`gpu_allocator`] crate that is good for
//! most needs.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan as vk_alloc;
use gpu_allocator::vulkan::AllocationScheme;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits;
use crate::{Allocator, Device, Error};

/// The default allocator. This calls into the `gpu_allocator` crate.
/// It's important to note that this allocator is `Clone`, `Send` and `Sync`. All its internal
/// state is safely wrapped inside an `Arc<Mutex<T>>`. This is to facilitate passing it around
/// everywhere.
///
/// See also: [`Allocator`](traits::Allocator), [`Allocation`](traits::Allocation)
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct DefaultAllocator {
    #[derivative(Debug = "ignore")]
    alloc: Arc<Mutex<vk_alloc::Allocator>>,
}

/// Allocation returned from the default allocator.
/// This allocation is automatically freed when it is dropped, so it's not strictly necessary
/// to call [`DefaultAllocator::free()`].
#[derive(Derivative)]
#[derivative(Default, Debug)]
pub struct Allocation {
    // These are wrapped in `Option`s so we can "move" out of them in `Drop`.
    // They are always Some(_)
    allocator: Option<DefaultAllocator>,
    allocation: Option<vk_alloc::Allocation>,
}

impl DefaultAllocator {
    /// Create a new default allocator for the given device. The instance and physical device
    /// are only borrowed to read memory properties; this crate never owns them.
    /// # Errors
    /// * May fail if creating the internal `gpu_allocator` fails.
    pub fn new(
        instance: &ash::Instance,
        device: &Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self::from_allocator(vk_alloc::Allocator::new(
            &vk_alloc::AllocatorCreateDesc {
                instance: instance.clone(),
                // SAFETY: The user passed in a valid Device reference.
                device: unsafe { device.handle() },
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
            },
        )?))
    }

    /// Wrap an already constructed `gpu_allocator` allocator.
    pub fn from_allocator(alloc: vk_alloc::Allocator) -> Self {
        Self {
            alloc: Arc::new(Mutex::new(alloc)),
        }
    }

    fn free_impl(&mut self, allocation: &mut <Self as Allocator>::Allocation) -> Result<()> {
        let mut alloc = self.alloc.lock().map_err(|_| Error::PoisonError)?;
        match allocation.allocation.take() {
            None => {}
            Some(allocation) => {
                alloc.free(allocation)?;
            }
        }
        Ok(())
    }
}

impl Allocator for DefaultAllocator {
    type Allocation = Allocation;

    /// Allocates raw memory of a specific memory type. To get proper
    /// [`vk::MemoryRequirements`], call `vkGetBufferMemoryRequirements` or
    /// `vkGetImageMemoryRequirements` with your buffer or image.
    /// # Errors
    /// * May fail if the device is out of memory
    fn allocate(
        &mut self,
        name: &'static str,
        requirements: &vk::MemoryRequirements,
        ty: MemoryType,
    ) -> Result<Self::Allocation> {
        let mut alloc = self.alloc.lock().map_err(|_| Error::PoisonError)?;
        let allocation = alloc.allocate(&vk_alloc::AllocationCreateDesc {
            name,
            requirements: *requirements,
            location: gpu_allocator::MemoryLocation::from(ty),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        Ok(Allocation {
            allocator: Some(self.clone()),
            allocation: Some(allocation),
        })
    }

    fn free(&mut self, mut allocation: Self::Allocation) -> Result<()> {
        self.free_impl(&mut allocation)
    }
}

impl traits::Allocation for Allocation {
    unsafe fn memory(&self) -> vk::DeviceMemory {
        self.allocation
            .as_ref()
            .map(|alloc| alloc.memory())
            .unwrap_or_default()
    }

    fn offset(&self) -> vk::DeviceSize {
        self.allocation
            .as_ref()
            .map(|alloc| alloc.offset())
            .unwrap_or_default()
    }

    fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.allocation.as_ref().and_then(|alloc| alloc.mapped_ptr())
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        let mut allocator = self.allocator.take();
        if let Some(allocator) = &mut allocator {
            let _ = allocator.free_impl(self);
        }
    }
}
