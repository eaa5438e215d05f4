//! Thin wrapper around an externally created `VkDevice`.
//!
//! Instance creation, physical device selection and device creation are the responsibility of
//! the surrounding engine. The caches in this crate only need a handle they can record
//! commands and create objects through, so [`Device`] simply wraps an [`ash::Device`] in an
//! `Arc` to make it cheap to clone and store everywhere.

use std::ops::Deref;
use std::sync::Arc;

#[derive(Derivative)]
#[derivative(Debug)]
struct DeviceInner {
    #[derivative(Debug = "ignore")]
    handle: ash::Device,
    queue_families: Vec<u32>,
}

/// Wrapper around a `VkDevice`. Internal state is wrapped in an `Arc<DeviceInner>`, so this
/// is safe to clone.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Wrap an externally created device. `queue_families` lists every queue family the owning
    /// engine submits on; buffers created by this crate use concurrent sharing across them
    /// when more than one is given.
    pub fn new(handle: ash::Device, queue_families: Vec<u32>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                handle,
                queue_families,
            }),
        }
    }

    /// Get unsafe access to the underlying `VkDevice`.
    /// # Safety
    /// Any vulkan calls that mutate the device may put the system in an undefined state.
    pub unsafe fn handle(&self) -> ash::Device {
        self.inner.handle.clone()
    }

    /// The queue family indices this device records on.
    pub fn queue_families(&self) -> &[u32] {
        &self.inner.queue_families
    }

    /// Sharing mode used for buffers that may be accessed from every queue family.
    pub(crate) fn sharing_mode(&self) -> ash::vk::SharingMode {
        if self.inner.queue_families.len() > 1 {
            ash::vk::SharingMode::CONCURRENT
        } else {
            ash::vk::SharingMode::EXCLUSIVE
        }
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.inner.handle
    }
}
