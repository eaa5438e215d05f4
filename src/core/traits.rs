//! Defines traits for core

use ash::vk;

/// Implemented by components that shadow command-buffer-local state.
///
/// Pipeline and descriptor set bindings are scoped to a command buffer in Vulkan: a freshly
/// begun buffer has no bindings, no matter what a cache thinks is bound. The owning driver
/// must call [`on_command_buffer`](CommandBufferObserver::on_command_buffer) every time the
/// active command buffer changes, before recording any bind on the new buffer. Skipping this
/// makes redundant-bind elision skip binds the new buffer actually needs.
pub trait CommandBufferObserver {
    /// Notify the observer that `cmd` is now the active command buffer.
    fn on_command_buffer(&mut self, cmd: vk::CommandBuffer);
}
