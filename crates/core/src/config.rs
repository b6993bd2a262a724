//! Engine configuration.
//!
//! Settings are read from an optional TOML file. Every field has a default, so
//! an empty file (or no file at all) yields a working configuration:
//!
//! ```toml
//! frames_in_flight = 2
//! shader_dir = "shaders"
//!
//! [window]
//! width = 1024
//! height = 768
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Upper bound on frame slots. More than this only adds latency.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 4;

/// Initial window settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "turt".to_string(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    /// Number of frame slots the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Enables `VK_LAYER_KHRONOS_validation`. Creation fails if the layer is missing.
    pub validation: bool,
    /// Directory holding `<name>.vert.spv` / `<name>.frag.spv` pairs.
    pub shader_dir: PathBuf,
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text).map_err(|e| {
            Error::Config(format!("{}: invalid TOML: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT_LIMIT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames_in_flight must be between 1 and {}, got {}",
                MAX_FRAMES_IN_FLIGHT_LIMIT, self.frames_in_flight
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be nonzero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        Ok(())
    }

    /// Path of the SPIR-V binary for `shader` at the given stage extension
    /// (`"vert"` or `"frag"`).
    pub fn shader_path(&self, shader: &str, stage: &str) -> PathBuf {
        self.shader_dir.join(format!("{shader}.{stage}.spv"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
            frames_in_flight = 3
            shader_dir = "assets/spv"

            [window]
            width = 1280
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.shader_dir, PathBuf::from("assets/spv"));
    }

    #[test]
    fn test_frames_in_flight_out_of_range() {
        let err = EngineConfig::from_toml_str("frames_in_flight = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = EngineConfig::from_toml_str("frames_in_flight = 9").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = EngineConfig::from_toml_str("frames_in_flight = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_reports_path_once() {
        let path = std::env::temp_dir().join(format!("turt-bad-config-{}.toml", std::process::id()));
        std::fs::write(&path, "frames_in_flight = ").unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        let message = err.to_string();
        assert!(message.starts_with("Config error: "));
        assert!(message.contains(&path.display().to_string()));
        assert_eq!(message.matches("Config error").count(), 1);
        assert_eq!(message.matches("invalid TOML").count(), 1);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("turt-config-that-does-not-exist.toml");
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_shader_path_convention() {
        let config = EngineConfig::default();
        assert_eq!(
            config.shader_path("shader", "vert"),
            PathBuf::from("shaders/shader.vert.spv")
        );
        assert_eq!(
            config.shader_path("text", "frag"),
            PathBuf::from("shaders/text.frag.spv")
        );
    }
}
