//! Core utilities shared by every turt crate.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Engine configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{EngineConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
