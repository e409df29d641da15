//! Model registry: wrapper names to model builders.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use samnotator_common::{AppConfig, ModelEntry, ModelKind, SamnotatorError, SamnotatorResult};

use crate::backends::prompt_shape::PromptShapeModel;
use crate::backends::protocol::BridgeMode;
use crate::backends::subprocess::SubprocessModel;
use crate::interface::{ModelBuilder, ModelInterface};

/// A model as offered to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub kind: ModelKind,
    pub name: String,
    pub wrapper_name: String,
    pub model_path: PathBuf,
}

impl From<&ModelEntry> for ModelInfo {
    fn from(entry: &ModelEntry) -> Self {
        Self {
            kind: entry.kind,
            name: entry.name.clone(),
            wrapper_name: entry.wrapper_name.clone(),
            model_path: entry.model_path.clone(),
        }
    }
}

/// Maps wrapper names (`sam3_pvs_image`, `prompt_shape`, ...) to builders.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    builders: HashMap<String, ModelBuilder>,
    cache: HashMap<String, ModelBuilder>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("builders", &self.names())
            .finish()
    }
}

impl ModelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends, configured from `config`.
    pub fn with_defaults(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        let radius = config.annotation.prompt_shape_radius;
        registry.register("prompt_shape", move |_path: &Path| {
            Some(Box::new(PromptShapeModel::new(radius)) as Box<dyn ModelInterface>)
        });

        for (name, mode) in [
            ("sam3_pvs_image", BridgeMode::Image),
            ("sam3_pvs_video", BridgeMode::Video),
        ] {
            let bridge = config.bridge.clone();
            registry.register(name, move |path: &Path| {
                if !path.is_dir() {
                    tracing::warn!(path = %path.display(), "SAM3 model directory not found");
                    return None;
                }
                Some(Box::new(SubprocessModel::new(bridge.clone(), path, mode)) as Box<dyn ModelInterface>)
            });
        }

        registry
    }

    /// Register or replace a builder.
    pub fn register<F>(&mut self, wrapper_name: impl Into<String>, builder: F)
    where
        F: Fn(&Path) -> Option<Box<dyn ModelInterface>> + Send + Sync + 'static,
    {
        let wrapper_name = wrapper_name.into();
        self.cache.remove(&wrapper_name);
        self.builders.insert(wrapper_name, Arc::new(builder));
    }

    /// Registered wrapper names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a wrapper name to its builder.
    ///
    /// Tries the exact name, then its lowercase form, then with `-`
    /// replaced by `_`. Resolved names are cached.
    pub fn builder(&mut self, wrapper_name: &str) -> SamnotatorResult<ModelBuilder> {
        if let Some(builder) = self.cache.get(wrapper_name) {
            return Ok(builder.clone());
        }

        let mut tried = Vec::new();
        for candidate in [
            wrapper_name.to_string(),
            wrapper_name.to_lowercase(),
            wrapper_name.to_lowercase().replace('-', "_"),
        ] {
            if tried.contains(&candidate) {
                continue;
            }
            if let Some(builder) = self.builders.get(&candidate) {
                let builder = builder.clone();
                self.cache.insert(wrapper_name.to_string(), builder.clone());
                return Ok(builder);
            }
            tried.push(candidate);
        }

        Err(SamnotatorError::model(format!(
            "Unable to find model builder for '{wrapper_name}'. Tried: {tried:?}"
        )))
    }

    /// Build a model instance for `wrapper_name` at `path`.
    pub fn build(
        &mut self,
        wrapper_name: &str,
        path: &Path,
    ) -> SamnotatorResult<Box<dyn ModelInterface>> {
        let builder = self.builder(wrapper_name)?;
        builder(path).ok_or_else(|| {
            SamnotatorError::model(format!(
                "Model builder failed for type {wrapper_name} at path {}",
                path.display()
            ))
        })
    }
}

/// Models from `config`, as [`ModelInfo`], in configured order.
pub fn configured_models(config: &AppConfig) -> Vec<ModelInfo> {
    config.models.iter().map(ModelInfo::from).collect()
}
