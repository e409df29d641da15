//! Error types shared across Samnotator crates.

use std::path::PathBuf;

/// Top-level error type for Samnotator operations.
#[derive(Debug, thiserror::Error)]
pub enum SamnotatorError {
    #[error("Frame error: {message}")]
    Frame { message: String },

    #[error("Annotation error: {message}")]
    Annotation { message: String },

    #[error("Instance error: {message}")]
    Instance { message: String },

    #[error("Model error: {message}")]
    Model { message: String },

    #[error("Prompt error: {message}")]
    Prompt { message: String },

    #[error("Project error: {message}")]
    Project { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SamnotatorError.
pub type SamnotatorResult<T> = Result<T, SamnotatorError>;

impl SamnotatorError {
    pub fn frame(msg: impl Into<String>) -> Self {
        Self::Frame {
            message: msg.into(),
        }
    }

    pub fn annotation(msg: impl Into<String>) -> Self {
        Self::Annotation {
            message: msg.into(),
        }
    }

    pub fn instance(msg: impl Into<String>) -> Self {
        Self::Instance {
            message: msg.into(),
        }
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model {
            message: msg.into(),
        }
    }

    pub fn prompt(msg: impl Into<String>) -> Self {
        Self::Prompt {
            message: msg.into(),
        }
    }

    pub fn project(msg: impl Into<String>) -> Self {
        Self::Project {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
