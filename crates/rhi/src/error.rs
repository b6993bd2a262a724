//! Error type for the Vulkan layer.
//!
//! Every variant is fatal to the engine: it means a driver or environment
//! contract was broken. Out-of-date and suboptimal swapchains are not errors
//! and never appear here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load the Vulkan loader library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU memory allocation failed
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No GPU satisfies the engine's requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Validation was requested but `VK_LAYER_KHRONOS_validation` is not installed
    #[error("Validation layer requested but not available")]
    ValidationLayerMissing,

    /// Shader module loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid or unusable handle
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
