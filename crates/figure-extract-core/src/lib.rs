//! Figure extraction core - configuration and page orchestration
//!
//! Ties the two detectors, the fusion engine and the persister together.
//! Each page runs layout detection, then zero-shot detection, then the merge
//! and finally persistence. Pages are processed best-effort: a failing page
//! is reported and the run continues.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError};
pub use pipeline::{FigurePipeline, PageOutcome, PageReport};
