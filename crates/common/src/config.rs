//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Models offered in the model runner, in display order.
    pub models: Vec<ModelEntry>,

    /// Device string handed to model backends (e.g. "cuda", "cpu").
    pub device: String,

    /// Annotation and display defaults.
    #[serde(default)]
    pub annotation: AnnotationDefaults,

    /// External SAM3 bridge process.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Whether a model works on single images or on frame sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Image,
    Video,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Image => write!(f, "image"),
            ModelKind::Video => write!(f, "video"),
        }
    }
}

/// One entry of the model registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Image or video model.
    pub kind: ModelKind,

    /// Display name.
    pub name: String,

    /// Backend builder name (e.g. `sam3_pvs_image`).
    pub wrapper_name: String,

    /// Model directory, as downloaded.
    pub model_path: PathBuf,
}

/// Annotation and display defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationDefaults {
    /// Point marker size in screen pixels. Even values are rounded down to odd.
    pub marker_size: u32,

    /// Bounding box handle size in screen pixels.
    pub bbox_handle_size: u32,

    /// Mask overlay opacity [0.0, 1.0].
    pub mask_opacity: f32,

    /// Threshold applied to model mask scores when none is given in the task.
    pub mask_threshold: f32,

    /// Top-k masks kept per object.
    pub max_masks_per_object: usize,

    /// Disc radius in pixels used by the `prompt_shape` backend.
    pub prompt_shape_radius: u32,

    /// Image extensions accepted when opening folders (without the dot).
    pub image_extensions: Vec<String>,
}

impl Default for AnnotationDefaults {
    fn default() -> Self {
        Self {
            marker_size: 23,
            bbox_handle_size: 8,
            mask_opacity: 0.5,
            mask_threshold: 0.5,
            max_masks_per_object: 1,
            prompt_shape_radius: 12,
            image_extensions: ["png", "jpg", "jpeg", "bmp", "tiff", "tif", "gif", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Command used to host SAM3 out of process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Executable to spawn.
    pub program: String,

    /// Arguments placed before `--model-dir <dir> --mode <image|video> --device <dev>`.
    pub args: Vec<String>,

    /// How long to wait for the bridge to report readiness.
    pub ready_timeout_secs: u64,

    /// How long a running request may go without any output from the bridge.
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["-m".to_string(), "samnotator_bridge".to_string()],
            ready_timeout_secs: 300,
            request_timeout_secs: 600,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "samnotator=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            device: "cuda".to_string(),
            annotation: AnnotationDefaults::default(),
            bridge: BridgeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit file, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit file.
    pub fn save_to(&self, config_path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Models of the given kind, in configured order.
    pub fn models_of_kind(&self, kind: ModelKind) -> Vec<&ModelEntry> {
        self.models.iter().filter(|m| m.kind == kind).collect()
    }

    /// Look up a model by display name.
    pub fn model_named(&self, name: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.name == name)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("samnotator").join("config.json")
}

fn default_models() -> Vec<ModelEntry> {
    let sam3_dir = PathBuf::from("models").join("sam3");
    vec![
        ModelEntry {
            kind: ModelKind::Image,
            name: "SAM3 Tracker".to_string(),
            wrapper_name: "sam3_pvs_image".to_string(),
            model_path: sam3_dir.clone(),
        },
        ModelEntry {
            kind: ModelKind::Image,
            name: "Prompt shapes".to_string(),
            wrapper_name: "prompt_shape".to_string(),
            model_path: PathBuf::from("."),
        },
        ModelEntry {
            kind: ModelKind::Video,
            name: "SAM3 Video Tracker".to_string(),
            wrapper_name: "sam3_pvs_video".to_string(),
            model_path: sam3_dir,
        },
        ModelEntry {
            kind: ModelKind::Video,
            name: "Prompt shapes (video)".to_string(),
            wrapper_name: "prompt_shape".to_string(),
            model_path: PathBuf::from("."),
        },
    ]
}
