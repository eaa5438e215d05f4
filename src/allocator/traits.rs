use std::ffi::c_void;
use std::ptr::NonNull;

use anyhow::Result;
use ash::vk;

use crate::allocator::memory_type::MemoryType;

/// To supply custom allocators to the caches, this trait must be implemented.
/// Note that all allocators must be `Clone`, so it's recommended to keep the internal state
/// behind an `Arc`. Allocation failure is treated as unrecoverable by every caller in this
/// crate.
pub trait Allocator: Clone + Send + Sync {
    /// The allocation type of this allocator.
    type Allocation: Allocation;

    /// Allocates raw memory of a specific memory type. The given name is used for internal
    /// tracking and debug logging.
    fn allocate(
        &mut self,
        name: &'static str,
        requirements: &vk::MemoryRequirements,
        ty: MemoryType,
    ) -> Result<Self::Allocation>;

    /// Free previously allocated memory.
    fn free(&mut self, allocation: Self::Allocation) -> Result<()>;
}

/// Represents an allocation. This trait exposes methods for accessing the underlying device
/// memory, the offset into that memory, and a mapped pointer when the memory is host visible.
pub trait Allocation: Default {
    /// Access the underlying `VkDeviceMemory`.
    /// # Safety
    /// The allocation must not be freed through this memory handle.
    unsafe fn memory(&self) -> vk::DeviceMemory;

    /// The offset of this allocation inside the `VkDeviceMemory`.
    fn offset(&self) -> vk::DeviceSize;

    /// Obtain a mapped pointer to the allocation, or `None` if it is not host visible.
    fn mapped_ptr(&self) -> Option<NonNull<c_void>>;
}
