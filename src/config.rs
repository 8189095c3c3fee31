// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use winit::keyboard::KeyCode;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shadow: ShadowConfig,
    pub scene: SceneConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Scene Renderer".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Requested MSAA level (1, 2, 4 or 8), clamped to what the GPU supports
    pub msaa_samples: u32,
    /// Capacity of the per-frame dynamic model uniform buffer
    pub max_objects: usize,
    pub max_textures: u32,
    pub shader_dir: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.6, 0.65, 0.4, 1.0],
            max_frames_in_flight: 2,
            msaa_samples: 4,
            max_objects: 64,
            max_textures: 32,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

/// Shadow map settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub enabled: bool,
    pub map_size: u32,
    /// Half-size of the orthographic box the light renders
    pub extent: f32,
    pub near: f32,
    pub far: f32,
    pub depth_bias_constant: f32,
    pub depth_bias_slope: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            map_size: 2048,
            extent: 10.0,
            near: 0.1,
            far: 40.0,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
        }
    }
}

/// Scene contents
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub texture_dir: PathBuf,
    pub models: Vec<ModelConfig>,
    pub light: LightConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            texture_dir: PathBuf::from("textures"),
            models: Vec::new(),
            light: LightConfig::default(),
        }
    }
}

/// A model file placed in the scene
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub position: [f32; 3],
    pub scale: f32,
    /// Degrees per second around the Y axis
    pub spin_speed: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            position: [0.0; 3],
            scale: 1.0,
            spin_speed: 0.0,
        }
    }
}

/// Initial directional light
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub direction: [f32; 3],
    pub colour: [f32; 3],
    pub ambient: f32,
    pub diffuse: f32,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            direction: [-0.4, -1.0, -0.3],
            colour: [1.0, 1.0, 1.0],
            ambient: 0.2,
            diffuse: 0.8,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
    /// Rebuild pipelines when compiled shaders change on disk
    pub hot_reload: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
            hot_reload: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
    pub msaa_key: String,
    pub texture_key: String,
    pub mouse_sensitivity: f32,
    pub move_speed: f32,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
            msaa_key: "M".to_string(),
            texture_key: "T".to_string(),
            mouse_sensitivity: 0.1,
            move_speed: 5.0,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults on errors
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::load_from_path(path).unwrap_or_else(|e| {
            log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Requested MSAA level as Vulkan sample count (unsupported values fall back to 1)
    pub fn get_msaa_samples(&self) -> vk::SampleCountFlags {
        sample_count_from_level(self.graphics.msaa_samples).unwrap_or_else(|| {
            log::warn!(
                "Unsupported msaa_samples {}, multisampling disabled",
                self.graphics.msaa_samples
            );
            vk::SampleCountFlags::TYPE_1
        })
    }
}

/// Map an MSAA level to a sample count. Only 1, 2, 4 and 8 are accepted.
pub fn sample_count_from_level(level: u32) -> Option<vk::SampleCountFlags> {
    match level {
        1 => Some(vk::SampleCountFlags::TYPE_1),
        2 => Some(vk::SampleCountFlags::TYPE_2),
        4 => Some(vk::SampleCountFlags::TYPE_4),
        8 => Some(vk::SampleCountFlags::TYPE_8),
        _ => None,
    }
}

/// Parse a key name such as "F11", "Escape" or "M" into a winit key code
pub fn parse_key(name: &str) -> Option<KeyCode> {
    let key = match name.to_ascii_uppercase().as_str() {
        "ESCAPE" | "ESC" => KeyCode::Escape,
        "SPACE" => KeyCode::Space,
        "TAB" => KeyCode::Tab,
        "ENTER" | "RETURN" => KeyCode::Enter,
        "F1" => KeyCode::F1,
        "F2" => KeyCode::F2,
        "F3" => KeyCode::F3,
        "F4" => KeyCode::F4,
        "F5" => KeyCode::F5,
        "F6" => KeyCode::F6,
        "F7" => KeyCode::F7,
        "F8" => KeyCode::F8,
        "F9" => KeyCode::F9,
        "F10" => KeyCode::F10,
        "F11" => KeyCode::F11,
        "F12" => KeyCode::F12,
        "A" => KeyCode::KeyA,
        "B" => KeyCode::KeyB,
        "C" => KeyCode::KeyC,
        "D" => KeyCode::KeyD,
        "E" => KeyCode::KeyE,
        "F" => KeyCode::KeyF,
        "G" => KeyCode::KeyG,
        "H" => KeyCode::KeyH,
        "I" => KeyCode::KeyI,
        "J" => KeyCode::KeyJ,
        "K" => KeyCode::KeyK,
        "L" => KeyCode::KeyL,
        "M" => KeyCode::KeyM,
        "N" => KeyCode::KeyN,
        "O" => KeyCode::KeyO,
        "P" => KeyCode::KeyP,
        "Q" => KeyCode::KeyQ,
        "R" => KeyCode::KeyR,
        "S" => KeyCode::KeyS,
        "T" => KeyCode::KeyT,
        "U" => KeyCode::KeyU,
        "V" => KeyCode::KeyV,
        "W" => KeyCode::KeyW,
        "X" => KeyCode::KeyX,
        "Y" => KeyCode::KeyY,
        "Z" => KeyCode::KeyZ,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.graphics.max_objects, 64);
        assert!(config.shadow.enabled);
        assert!(config.scene.models.is_empty());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            title = "Test Window"

            [graphics]
            msaa_samples = 8
            present_mode = "FIFO"

            [[scene.models]]
            path = "models/uh60.obj"
            spin_speed = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Test Window");
        assert_eq!(config.window.height, 600);
        assert_eq!(config.get_msaa_samples(), vk::SampleCountFlags::TYPE_8);
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.scene.models.len(), 1);
        assert_eq!(config.scene.models[0].scale, 1.0);
        assert_eq!(config.scene.models[0].spin_speed, 10.0);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::from_toml("[graphics]\npresent_mode = \"vsync-ish\"").unwrap();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn invalid_msaa_level_disables_multisampling() {
        let config = Config::from_toml("[graphics]\nmsaa_samples = 3").unwrap();
        assert_eq!(config.get_msaa_samples(), vk::SampleCountFlags::TYPE_1);
        assert_eq!(sample_count_from_level(16), None);
        assert_eq!(sample_count_from_level(2), Some(vk::SampleCountFlags::TYPE_2));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[window\nwidth = 3").is_err());
        assert!(Config::from_toml("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load("does/not/exist.toml");
        assert_eq!(config.controls.quit_key, "Escape");
    }

    #[test]
    fn key_names_parse_case_insensitively() {
        assert_eq!(parse_key("f11"), Some(KeyCode::F11));
        assert_eq!(parse_key("Esc"), Some(KeyCode::Escape));
        assert_eq!(parse_key("m"), Some(KeyCode::KeyM));
        assert_eq!(parse_key("Hyper"), None);
    }
}
