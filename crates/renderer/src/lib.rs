//! Frame orchestration.
//!
//! This crate drives continuous rendering to a window surface:
//! - [`FrameScheduler`]: frames in flight, acquire/submit/present and
//!   swapchain recreation
//! - [`SwapchainManager`]: the image chain and everything sized by it
//! - [`DrawableRegistry`]: per-object uniform buffers, descriptor sets and
//!   shared pipelines
//! - [`PipelineCache`]: one pipeline per distinct shader
//! - [`Engine`]: owns all of the above for a window

pub mod drawable;
pub mod engine;
pub mod frame_scheduler;
pub mod pipeline_cache;
pub mod swapchain_manager;
pub mod ubo;

pub use drawable::{Drawable, DrawableRegistry, ShaderPipeline, UpdateBehavior};
pub use engine::Engine;
pub use frame_scheduler::{
    AcquireOutcome, FrameBackend, FrameOutcome, FrameScheduler, FrameState, PresentOutcome,
};
pub use pipeline_cache::{InsertOutcome, PipelineCache};
pub use swapchain_manager::SwapchainManager;
pub use ubo::{Projection, UniformBufferObject, View};
