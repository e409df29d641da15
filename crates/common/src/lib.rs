//! Samnotator Common Utilities
//!
//! Shared infrastructure for all Samnotator crates:
//! - Error types and result aliases
//! - Tracing/logging initialization
//! - Configuration loading (model registry, device, annotation defaults)

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::*;
