//! Crate-wide error type.

use std::sync::PoisonError;

use ash::vk;
use gpu_allocator::AllocationError;
use thiserror::Error;

/// All errors this crate can report. Contract violations (double release, out of range
/// binding slots, shutting down with live resources) are asserts instead: they indicate a bug
/// in the calling driver code and are not recoverable at runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic Vulkan error type
    #[error("vulkan error: {0}")]
    VkError(#[from] vk::Result),
    /// Vulkan memory allocation error.
    #[error("allocation error: {0}")]
    AllocationError(#[from] AllocationError),
    /// Descriptor set allocation failed even after growing the descriptor pool.
    #[error("descriptor set allocation failed after pool growth: {0}")]
    DescriptorSetAllocationFailed(vk::Result),
    /// Graphics pipeline creation failed. There is no recovery path for this.
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(vk::Result),
    /// A bind commit was issued without a bound shader program.
    #[error("no program bound at pipeline commit")]
    NoProgramBound,
    /// A bind commit was issued without a bound render pass.
    #[error("no render pass bound at pipeline commit")]
    NoRenderPassBound,
    /// Poisoned mutex
    #[error("poisoned mutex")]
    PoisonError,
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}
