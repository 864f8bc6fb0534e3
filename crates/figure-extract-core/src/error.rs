//! Error types for configuration and orchestration

use figure_extract_common::ProcessingError;
use figure_fusion::FusionError;
use figure_storage::StorageError;
use figure_zero_shot_detection::ZeroShotError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load page: {0}")]
    Page(#[from] ProcessingError),

    #[error("Zero-shot detection failed: {0}")]
    ZeroShot(#[from] ZeroShotError),

    #[error("Fusion error: {0}")]
    Fusion(#[from] FusionError),

    #[error("Failed to persist figures: {0}")]
    Storage(#[from] StorageError),

    #[error("Page task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
