//! Caches for `VkRenderPass` and `VkFramebuffer` objects.
//!
//! Render pass and framebuffer creation are far too expensive to do per draw, but the
//! high-level API describes render targets anew every pass begin. This cache maps a small
//! POD description of the attachments to the created object, stamps every hit with the
//! current logical time, and destroys entries that have gone unused for the eviction delay.
//!
//! Framebuffers hold a reference count on the render pass they were created against: a render
//! pass is never evicted while a live framebuffer depends on it, no matter how stale it is.
//! Without that, evicting the render pass first would leave dangling framebuffers.

use std::collections::HashMap;

use anyhow::Result;
use ash::vk;

use crate::{CacheConfig, Device, Error};

/// Which attachments of a render target an operation applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct TargetFlags(u32);

impl TargetFlags {
    pub const NONE: TargetFlags = TargetFlags(0);
    pub const COLOR: TargetFlags = TargetFlags(1);
    pub const DEPTH: TargetFlags = TargetFlags(2);

    pub fn contains(self, other: TargetFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TargetFlags {
    type Output = TargetFlags;

    fn bitor(self, rhs: Self) -> Self {
        TargetFlags(self.0 | rhs.0)
    }
}

/// Describes a single subpass render pass. `vk::Format::UNDEFINED` marks an absent
/// attachment. Plain value struct; identity is its field contents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderPassKey {
    /// Format of the color attachment, or `UNDEFINED` when there is none.
    pub color_format: vk::Format,
    /// Format of the depth attachment, or `UNDEFINED` when there is none.
    pub depth_format: vk::Format,
    /// Layout the color attachment is transitioned to at the end of the pass.
    pub final_color_layout: vk::ImageLayout,
    /// Layout the depth attachment is transitioned to at the end of the pass.
    pub final_depth_layout: vk::ImageLayout,
    /// Attachments cleared on load.
    pub clear: TargetFlags,
    /// Attachments whose prior contents may be discarded on load. Ignored for attachments
    /// that are also cleared.
    pub discard_start: TargetFlags,
}

/// Maximum number of attachment slots in an [`FboKey`]: color, resolve, depth.
pub const FBO_ATTACHMENT_COUNT: usize = 3;

/// Describes a framebuffer: the render pass it is used with plus the bound attachment views.
/// Null view handles mark unused slots. Width and height are deliberately not part of the
/// identity; the caller guarantees they are invariant for a given set of views.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct FboKey {
    pub render_pass: vk::RenderPass,
    pub attachments: [vk::ImageView; FBO_ATTACHMENT_COUNT],
}

#[derive(Debug, Copy, Clone)]
struct RenderPassEntry {
    handle: vk::RenderPass,
    last_used: u64,
}

#[derive(Debug, Copy, Clone)]
struct FramebufferEntry {
    handle: vk::Framebuffer,
    render_pass: vk::RenderPass,
    last_used: u64,
}

/// Cache of render passes and framebuffers with timed eviction.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FboCache {
    #[derivative(Debug = "ignore")]
    device: Device,
    render_passes: HashMap<RenderPassKey, RenderPassEntry>,
    framebuffers: HashMap<FboKey, FramebufferEntry>,
    // Live framebuffers per render pass. A render pass with entries here is never evicted.
    render_pass_refs: HashMap<vk::RenderPass, u32>,
    current_time: u64,
    eviction_delay: u64,
}

impl FboCache {
    pub fn new(device: Device, config: &CacheConfig) -> Self {
        Self {
            device,
            render_passes: HashMap::new(),
            framebuffers: HashMap::new(),
            render_pass_refs: HashMap::new(),
            current_time: 0,
            eviction_delay: config.eviction_delay,
        }
    }

    /// Get or create the render pass described by `key`.
    /// # Errors
    /// Fails only when `vkCreateRenderPass` fails, which is unrecoverable.
    pub fn get_render_pass(&mut self, key: &RenderPassKey) -> Result<vk::RenderPass> {
        if let Some(entry) = self.render_passes.get_mut(key) {
            entry.last_used = self.current_time;
            return Ok(entry.handle);
        }
        let handle = self.create_render_pass(key)?;
        self.render_passes.insert(
            *key,
            RenderPassEntry {
                handle,
                last_used: self.current_time,
            },
        );
        Ok(handle)
    }

    /// Get or create the framebuffer described by `key`. `width` and `height` are only used
    /// on creation; they must be consistent for a given attachment set.
    /// # Errors
    /// Fails only when `vkCreateFramebuffer` fails, which is unrecoverable.
    pub fn get_framebuffer(
        &mut self,
        key: &FboKey,
        width: u32,
        height: u32,
    ) -> Result<vk::Framebuffer> {
        if let Some(entry) = self.framebuffers.get_mut(key) {
            entry.last_used = self.current_time;
            return Ok(entry.handle);
        }
        let attachments: Vec<_> = key
            .attachments
            .iter()
            .copied()
            .filter(|view| *view != vk::ImageView::null())
            .collect();
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(key.render_pass)
            .attachments(&attachments)
            .width(width)
            .height(height)
            .layers(1)
            .build();
        // SAFETY: the render pass handle in the key was produced by this cache and is alive,
        // the attachment views are owned by the caller.
        let handle = unsafe {
            self.device
                .create_framebuffer(&info, None)
                .map_err(Error::VkError)?
        };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkFramebuffer {handle:?}");
        self.framebuffers.insert(
            *key,
            FramebufferEntry {
                handle,
                render_pass: key.render_pass,
                last_used: self.current_time,
            },
        );
        *self.render_pass_refs.entry(key.render_pass).or_insert(0) += 1;
        Ok(handle)
    }

    /// Advance the logical time and destroy entries unused for the eviction delay. Render
    /// passes still referenced by live framebuffers are kept regardless of staleness.
    pub fn gc(&mut self) {
        self.current_time += 1;
        let (framebuffers, render_passes) = self.collect_expired();
        for handle in framebuffers {
            #[cfg(feature = "log-objects")]
            trace!("Destroying VkFramebuffer {handle:?}");
            unsafe { self.device.destroy_framebuffer(handle, None) };
        }
        for handle in render_passes {
            #[cfg(feature = "log-objects")]
            trace!("Destroying VkRenderPass {handle:?}");
            unsafe { self.device.destroy_render_pass(handle, None) };
        }
    }

    /// Unconditionally destroy every cached object. Shutdown path; must run while the device
    /// is valid and no command buffer references the objects.
    pub fn reset(&mut self) {
        for (_, entry) in self.framebuffers.drain() {
            unsafe { self.device.destroy_framebuffer(entry.handle, None) };
        }
        for (_, entry) in self.render_passes.drain() {
            unsafe { self.device.destroy_render_pass(entry.handle, None) };
        }
        self.render_pass_refs.clear();
    }

    // Applies the eviction policy and removes expired entries from the maps, returning the
    // handles to destroy. Framebuffers are processed first: removing one drops its render
    // pass reference, so a stale render pass whose last framebuffer expires here becomes
    // eligible in the same pass.
    fn collect_expired(&mut self) -> (Vec<vk::Framebuffer>, Vec<vk::RenderPass>) {
        let expired_fbos: Vec<_> = self
            .framebuffers
            .iter()
            .filter(|(_, entry)| self.current_time - entry.last_used >= self.eviction_delay)
            .map(|(key, _)| *key)
            .collect();
        let mut framebuffers = Vec::with_capacity(expired_fbos.len());
        for key in expired_fbos {
            let Some(entry) = self.framebuffers.remove(&key) else {
                continue;
            };
            framebuffers.push(entry.handle);
            match self.render_pass_refs.get_mut(&entry.render_pass) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    self.render_pass_refs.remove(&entry.render_pass);
                }
                None => error!(
                    "framebuffer {:?} evicted but its render pass held no reference",
                    entry.handle
                ),
            }
        }

        let expired_passes: Vec<_> = self
            .render_passes
            .iter()
            .filter(|(_, entry)| {
                self.current_time - entry.last_used >= self.eviction_delay
                    && !self.render_pass_refs.contains_key(&entry.handle)
            })
            .map(|(key, _)| *key)
            .collect();
        let render_passes = expired_passes
            .into_iter()
            .filter_map(|key| self.render_passes.remove(&key))
            .map(|entry| entry.handle)
            .collect();
        (framebuffers, render_passes)
    }

    fn create_render_pass(&self, key: &RenderPassKey) -> Result<vk::RenderPass> {
        let mut attachments = Vec::with_capacity(2);
        let mut color_ref = None;
        let mut depth_ref = None;

        if key.color_format != vk::Format::UNDEFINED {
            color_ref = Some(vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            attachments.push(Self::describe_attachment(
                key.color_format,
                key.final_color_layout,
                key.clear.contains(TargetFlags::COLOR),
                key.discard_start.contains(TargetFlags::COLOR),
            ));
        }
        if key.depth_format != vk::Format::UNDEFINED {
            depth_ref = Some(vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
            attachments.push(Self::describe_attachment(
                key.depth_format,
                key.final_depth_layout,
                key.clear.contains(TargetFlags::DEPTH),
                key.discard_start.contains(TargetFlags::DEPTH),
            ));
        }

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS);
        if let Some(color) = &color_ref {
            subpass = subpass.color_attachments(std::slice::from_ref(color));
        }
        if let Some(depth) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpass = subpass.build();

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .build();
        // SAFETY: valid create info built above.
        let handle = unsafe {
            self.device
                .create_render_pass(&info, None)
                .map_err(Error::VkError)?
        };
        #[cfg(feature = "log-objects")]
        trace!("Created new VkRenderPass {handle:?}");
        Ok(handle)
    }

    fn describe_attachment(
        format: vk::Format,
        final_layout: vk::ImageLayout,
        clear: bool,
        discard: bool,
    ) -> vk::AttachmentDescription {
        let load_op = if clear {
            vk::AttachmentLoadOp::CLEAR
        } else if discard {
            vk::AttachmentLoadOp::DONT_CARE
        } else {
            vk::AttachmentLoadOp::LOAD
        };
        let initial_layout = if load_op == vk::AttachmentLoadOp::LOAD {
            final_layout
        } else {
            vk::ImageLayout::UNDEFINED
        };
        vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout,
            final_layout,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::util::testing::null_device;

    fn cache_with_delay(delay: u64) -> FboCache {
        let config = CacheConfig {
            eviction_delay: delay,
            ..Default::default()
        };
        FboCache::new(null_device(), &config)
    }

    fn color_key(format: vk::Format) -> RenderPassKey {
        RenderPassKey {
            color_format: format,
            final_color_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            clear: TargetFlags::COLOR,
            ..Default::default()
        }
    }

    fn insert_render_pass(cache: &mut FboCache, key: &RenderPassKey, raw: u64) -> vk::RenderPass {
        let handle = vk::RenderPass::from_raw(raw);
        cache.render_passes.insert(
            *key,
            RenderPassEntry {
                handle,
                last_used: cache.current_time,
            },
        );
        handle
    }

    fn insert_framebuffer(cache: &mut FboCache, render_pass: vk::RenderPass, raw: u64) -> FboKey {
        let key = FboKey {
            render_pass,
            attachments: [
                vk::ImageView::from_raw(raw + 1),
                vk::ImageView::null(),
                vk::ImageView::null(),
            ],
        };
        cache.framebuffers.insert(
            key,
            FramebufferEntry {
                handle: vk::Framebuffer::from_raw(raw),
                render_pass,
                last_used: cache.current_time,
            },
        );
        *cache.render_pass_refs.entry(render_pass).or_insert(0) += 1;
        key
    }

    #[test]
    fn keys_compare_field_wise() {
        let a = color_key(vk::Format::R8G8B8A8_UNORM);
        let b = color_key(vk::Format::R8G8B8A8_UNORM);
        assert_eq!(a, b);
        let c = RenderPassKey {
            clear: TargetFlags::NONE,
            ..a
        };
        assert_ne!(a, c);
    }

    #[test]
    fn framebuffer_key_ignores_nothing_but_extent() {
        let pass = vk::RenderPass::from_raw(1);
        let a = FboKey {
            render_pass: pass,
            attachments: [vk::ImageView::from_raw(2), vk::ImageView::null(), vk::ImageView::null()],
        };
        let mut b = a;
        assert_eq!(a, b);
        b.attachments[1] = vk::ImageView::from_raw(3);
        assert_ne!(a, b);
    }

    #[test]
    fn hit_returns_cached_handle_without_recreation() {
        let mut cache = cache_with_delay(2);
        let key = color_key(vk::Format::R8G8B8A8_UNORM);
        let handle = insert_render_pass(&mut cache, &key, 42);

        assert_eq!(cache.get_render_pass(&key).unwrap(), handle);
        assert_eq!(cache.get_render_pass(&key).unwrap(), handle);
        assert_eq!(cache.render_passes.len(), 1);
    }

    #[test]
    fn hit_refreshes_the_eviction_clock() {
        let mut cache = cache_with_delay(2);
        let key = color_key(vk::Format::R8G8B8A8_UNORM);
        insert_render_pass(&mut cache, &key, 42);

        cache.current_time += 1;
        cache.get_render_pass(&key).unwrap();
        cache.current_time += 1;
        let (_, passes) = cache.collect_expired();
        assert!(passes.is_empty());
    }

    #[test]
    fn eviction_respects_the_delay_window() {
        let mut cache = cache_with_delay(2);
        let key = color_key(vk::Format::R8G8B8A8_UNORM);
        insert_render_pass(&mut cache, &key, 42);

        cache.current_time += 1;
        let (_, passes) = cache.collect_expired();
        assert!(passes.is_empty());

        cache.current_time += 1;
        let (_, passes) = cache.collect_expired();
        assert_eq!(passes.len(), 1);
        assert!(cache.render_passes.is_empty());
    }

    #[test]
    fn live_framebuffer_blocks_render_pass_eviction() {
        let mut cache = cache_with_delay(2);
        let key = color_key(vk::Format::R8G8B8A8_UNORM);
        let pass = insert_render_pass(&mut cache, &key, 42);
        let fbo_key = insert_framebuffer(&mut cache, pass, 100);

        // Keep the framebuffer fresh while the render pass goes stale.
        cache.current_time += 5;
        cache.framebuffers.get_mut(&fbo_key).unwrap().last_used = cache.current_time;
        let (fbos, passes) = cache.collect_expired();
        assert!(fbos.is_empty());
        assert!(passes.is_empty());

        // Let the framebuffer expire: its eviction releases the reference, and the render
        // pass becomes eligible on a later pass.
        cache.current_time += 2;
        let (fbos, passes) = cache.collect_expired();
        assert_eq!(fbos.len(), 1);
        assert_eq!(passes.len(), 1);
        assert!(cache.render_pass_refs.is_empty());
    }
}
