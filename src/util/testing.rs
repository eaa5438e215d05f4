//! Shared helpers for unit tests. None of the tests in this crate require a live Vulkan
//! driver: the device below carries null function pointers (constructible, never callable),
//! and cache-policy tests fabricate distinct handles with `vk::Handle::from_raw`.

use std::ffi::{c_char, c_void, CStr};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits::{Allocation, Allocator};
use crate::Device;

// Resolver handed to `ash::Device::load` in place of a real `vkGetDeviceProcAddr`. It returns
// null for every device function, so ash fills the table with its unreachable stubs.
unsafe extern "system" fn device_proc_addr_stub(
    _device: vk::Device,
    _name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    None
}

/// A device whose function table contains no callable entry points. Calling through it is UB;
/// tests only ever store and clone it.
///
/// `ash::Device::load` resolves its whole table by calling `get_device_proc_addr`, so that one
/// instance-level entry must be a real function. The stub above resolves every device function
/// to null without touching a driver.
pub fn null_device() -> Device {
    let get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr = device_proc_addr_stub;
    let instance_fn =
        vk::InstanceFnV1_0::load(|_name: &CStr| get_device_proc_addr as *const c_void);
    let device = unsafe { ash::Device::load(&instance_fn, vk::Device::null()) };
    Device::new(device, vec![0])
}

/// Allocator test double that counts allocations and frees and never touches a device.
#[derive(Clone, Debug, Default)]
pub struct MockAllocator {
    pub allocations: Arc<AtomicUsize>,
    pub frees: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
pub struct MockAllocation;

impl Allocator for MockAllocator {
    type Allocation = MockAllocation;

    fn allocate(
        &mut self,
        _name: &'static str,
        _requirements: &vk::MemoryRequirements,
        _ty: MemoryType,
    ) -> Result<Self::Allocation> {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(MockAllocation)
    }

    fn free(&mut self, _allocation: Self::Allocation) -> Result<()> {
        self.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Allocation for MockAllocation {
    unsafe fn memory(&self) -> vk::DeviceMemory {
        vk::DeviceMemory::null()
    }

    fn offset(&self) -> vk::DeviceSize {
        0
    }

    fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Construction resolves the device table through the stub resolver; it must complete
    // without ever calling a device function.
    #[test]
    fn null_device_is_constructible_and_clonable() {
        let device = null_device();
        let clone = device.clone();
        assert_eq!(clone.queue_families(), &[0]);
    }
}
