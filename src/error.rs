//! Crate-wide error types.
//!
//! A `thiserror` enum for genuinely exceptional conditions (bad config, I/O
//! failure). Expected control-flow branches of a reflection attempt are
//! *not* modeled as errors here — see
//! [`crate::orchestrator::ReflectionOutcome`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type ReflectionResult<T> = Result<T, ReflectionError>;

/// Errors that can occur in the reflection sidecar outside of a single
/// reflection attempt's expected control flow.
#[derive(Error, Debug)]
pub enum ReflectionError {
    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config {path}: {source}")]
    ConfigYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse JSON config {path}: {source}")]
    ConfigJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("host runtime transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid model spec: {0}")]
    InvalidModelSpec(String),
}
