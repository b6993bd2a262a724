//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin RAII wrappers over `ash` used by the frame loop:
//! - Instance, physical device selection and logical device
//! - Swapchain, render pass and framebuffers
//! - Command pools and command buffer recording
//! - Shader modules, pipeline layouts and graphics pipelines
//! - Descriptor set layouts/pools and host-visible buffers
//! - Semaphores and fences

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
