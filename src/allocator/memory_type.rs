//! Exposes different memory types that determine where memory allocations should live.

/// The memory type of an allocation indicates where it should live.
///
/// See also: [`Allocator::allocate()`](crate::Allocator::allocate())
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryType {
    /// Store the allocation in GPU only accessible memory.
    GpuOnly,
    /// Memory useful for uploading data to the GPU. On most implementations this maps to the
    /// PCIe BAR.
    CpuToGpu,
    /// Memory useful for CPU readback of data.
    GpuToCpu,
}

impl From<MemoryType> for gpu_allocator::MemoryLocation {
    fn from(value: MemoryType) -> Self {
        match value {
            MemoryType::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryType::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryType::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}
