//! Vulkan resource caching for a rendering backend.
//!
//! Creating Vulkan objects is expensive, so a backend that derives them per draw call needs a
//! caching layer between its state tracking and the API. This crate is that layer. The client
//! describes state through cheap bind calls and the caches lazily create, reuse and reclaim
//! the immutable Vulkan objects behind it:
//!
//! - [`PipelineCache`]: the centerpiece. Accumulates the pending draw configuration (program,
//!   raster state, vertex layout, render pass, bound resources) and commits it as pipeline,
//!   pipeline layout and descriptor set binds, with content-hashed caching, a growable
//!   descriptor pool and per-layout descriptor set arenas.
//! - [`FboCache`]: render passes and framebuffers keyed by small attachment descriptions,
//!   with a reference count that keeps a render pass alive as long as framebuffers use it.
//! - [`StagePool`]: recycled CPU visible staging buffers served best-fit by capacity.
//! - [`Disposer`]: a refcounted graveyard that defers destructor execution until the GPU is
//!   known to be done with a resource.
//!
//! All caches share one lifetime design: entries stamp a logical clock on every hit, a `gc`
//! call advances the clock once per frame and physically destroys what has gone unused for
//! [`CacheConfig::eviction_delay`] cycles. The caller guarantees gc cadence covers its frame
//! pipelining depth; nothing here waits on the GPU.
//!
//! Everything is single threaded: one cache instance per device, driven from the thread that
//! records commands. There are no internal locks.
//!
//! ```no_run
//! use deimos::prelude::*;
//! # fn run(device: Device, allocator: DefaultAllocator, cmd: vk::CommandBuffer,
//! #        program: ProgramBundle, render_pass: vk::RenderPass) -> anyhow::Result<()> {
//! let config = CacheConfig::default();
//! let mut cache = PipelineCache::new(device, allocator, &config);
//!
//! cache.on_command_buffer(cmd);
//! cache.bind_program(program);
//! cache.bind_render_pass(render_pass, 0);
//! cache.bind_raster_state(RasterState::default());
//! cache.bind_descriptors(cmd)?;
//! cache.bind_pipeline(cmd)?;
//! // record the draw, then once per frame:
//! cache.gc();
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod allocator;
pub mod config;
pub mod core;
pub mod descriptor;
pub mod disposer;
pub mod error;
pub mod fbo_cache;
pub mod pipeline;
pub mod staging;
pub mod util;
