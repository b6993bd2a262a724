//! Error types for the engine front end.

use thiserror::Error;

/// Errors raised outside the Vulkan layer (window, configuration, files).
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan errors surfaced through the platform layer
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Invalid or unparsable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;
