//! Application configuration.
//!
//! The whole document sits under a top-level `"app"` key:
//!
//! ```json
//! { "app": { "title": "lumen", "version": [0, 1, 0], "window": { ... }, "vulkan": { ... } } }
//! ```
//!
//! It is read once at startup and handed out by reference; nothing in the
//! engine mutates it afterwards.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Root of the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub app: AppSection,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSection {
    pub title: String,
    /// `[major, minor, patch]`
    pub version: [u8; 3],
    pub window: WindowConfig,
    pub vulkan: VulkanConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// How the window is presented on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    #[default]
    Windowed,
    Maximized,
    Fullscreen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub extent: Extent,
    pub position: Position,
    pub mode: WindowMode,
}

/// Instance layer lists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerConfig {
    pub validation_layers: Vec<String>,
    pub monitor_layers: Vec<String>,
}

/// Logical device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub enable_anisotropy: bool,
    pub max_anisotropy: f32,
    /// Extensions requested on top of the ones the engine always enables.
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulkanConfig {
    #[serde(default = "default_validation")]
    pub enable_validation_layers: bool,
    pub layers: LayerConfig,
    /// Instance extensions appended to the ones the window system needs.
    #[serde(default)]
    pub extensions: Vec<String>,
    pub device: DeviceConfig,
}

fn default_validation() -> bool {
    cfg!(debug_assertions)
}

impl AppConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON for
    /// this layout, or fails [`AppConfig::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_json_str(&text)?;
        info!(
            "Loaded config '{}' from {}",
            config.app.title,
            path.display()
        );
        Ok(config)
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration back as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Check values serde cannot express as types.
    pub fn validate(&self) -> Result<()> {
        let extent = self.app.window.extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(Error::Config(format!(
                "window extent must be non-zero, got {}x{}",
                extent.width, extent.height
            )));
        }

        let device = &self.app.vulkan.device;
        if device.enable_anisotropy && device.max_anisotropy < 1.0 {
            return Err(Error::Config(format!(
                "max_anisotropy must be at least 1.0, got {}",
                device.max_anisotropy
            )));
        }

        if self.app.title.is_empty() {
            return Err(Error::Config("title must not be empty".to_string()));
        }

        Ok(())
    }

    /// Layers to enable on the instance, honoring the validation toggle.
    pub fn enabled_layers(&self) -> Vec<String> {
        let vulkan = &self.app.vulkan;
        let mut layers = Vec::new();
        if vulkan.enable_validation_layers {
            layers.extend(vulkan.layers.validation_layers.iter().cloned());
        }
        layers.extend(vulkan.layers.monitor_layers.iter().cloned());
        layers
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection {
                title: "lumen".to_string(),
                version: [0, 1, 0],
                window: WindowConfig {
                    extent: Extent {
                        width: 1280,
                        height: 720,
                    },
                    position: Position { x: 100, y: 100 },
                    mode: WindowMode::Windowed,
                },
                vulkan: VulkanConfig {
                    enable_validation_layers: default_validation(),
                    layers: LayerConfig {
                        validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
                        monitor_layers: Vec::new(),
                    },
                    extensions: Vec::new(),
                    device: DeviceConfig {
                        enable_anisotropy: true,
                        max_anisotropy: 16.0,
                        extensions: Vec::new(),
                    },
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "app": {
            "title": "arcane",
            "version": [1, 2, 3],
            "window": {
                "extent": { "width": 1920, "height": 1080 },
                "position": { "x": 0, "y": 30 },
                "mode": "maximized"
            },
            "vulkan": {
                "enable_validation_layers": false,
                "layers": {
                    "validation_layers": ["VK_LAYER_KHRONOS_validation"],
                    "monitor_layers": ["VK_LAYER_LUNARG_monitor"]
                },
                "extensions": ["VK_EXT_debug_utils"],
                "device": {
                    "enable_anisotropy": true,
                    "max_anisotropy": 8.0,
                    "extensions": []
                }
            }
        }
    }"#;

    #[test]
    fn parses_full_document() {
        let config = AppConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.app.title, "arcane");
        assert_eq!(config.app.version, [1, 2, 3]);
        assert_eq!(config.app.window.mode, WindowMode::Maximized);
        assert_eq!(config.app.window.extent.width, 1920);
        assert_eq!(config.app.window.position.y, 30);
        assert_eq!(config.app.vulkan.device.max_anisotropy, 8.0);
        assert_eq!(config.app.vulkan.extensions, vec!["VK_EXT_debug_utils"]);
    }

    #[test]
    fn validation_toggle_filters_layers() {
        let config = AppConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.enabled_layers(), vec!["VK_LAYER_LUNARG_monitor"]);

        let mut enabled = config.clone();
        enabled.app.vulkan.enable_validation_layers = true;
        assert_eq!(
            enabled.enabled_layers(),
            vec!["VK_LAYER_KHRONOS_validation", "VK_LAYER_LUNARG_monitor"]
        );
    }

    #[test]
    fn unknown_window_mode_is_rejected() {
        let text = SAMPLE.replace("\"maximized\"", "\"borderless\"");
        assert!(matches!(
            AppConfig::from_json_str(&text),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn short_version_is_rejected() {
        let text = SAMPLE.replace("[1, 2, 3]", "[1, 2]");
        assert!(AppConfig::from_json_str(&text).is_err());
    }

    #[test]
    fn zero_extent_is_rejected() {
        let text = SAMPLE.replace("\"width\": 1920", "\"width\": 0");
        assert!(matches!(
            AppConfig::from_json_str(&text),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn low_anisotropy_is_rejected_only_when_enabled() {
        let mut config = AppConfig::default();
        config.app.vulkan.device.max_anisotropy = 0.5;
        assert!(config.validate().is_err());

        config.app.vulkan.device.enable_anisotropy = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = AppConfig::from_json_str(SAMPLE).unwrap();
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        match AppConfig::load(&path) {
            Err(Error::ConfigRead { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
