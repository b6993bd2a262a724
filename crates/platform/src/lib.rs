//! Platform layer: a winit window and the Vulkan surface created from it.

mod window;

pub use window::{Surface, Window};
