//! Samnotator Inference
//!
//! Runs segmentation models off the UI thread:
//! - **Interface:** PVS task/result types and the [`ModelInterface`] trait
//! - **SAM3:** prompt batching and mask post-processing
//! - **Registry:** wrapper name to model builder
//! - **Worker:** dedicated model thread driven over channels
//! - **Controller:** request bookkeeping on top of the worker
//! - **Backends:** the SAM3 bridge process and a geometric reference model

pub mod backends;
pub mod controller;
pub mod interface;
pub mod registry;
pub mod sam3;
pub mod worker;

pub use controller::{InferenceRequest, InferenceResult, ModelController, ModelEvent};
pub use interface::*;
pub use registry::{configured_models, ModelInfo, ModelRegistry};
pub use worker::{ModelWorker, WorkerCommand, WorkerMessage, NO_MODEL_LOADED};
