//! ONNX Runtime session creation for the detection model

use crate::ZeroShotError;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Environment variable overriding the intra-op thread count
pub const THREADS_ENV: &str = "FIGURE_EXTRACT_THREADS";

/// Intra-op threads: `FIGURE_EXTRACT_THREADS` if set and valid, else physical cores
#[must_use]
pub fn intra_op_threads() -> usize {
    std::env::var(THREADS_ENV)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(num_cpus::get_physical)
}

/// Create an optimized session for `model_path`
///
/// Uses full graph optimization and tries CUDA before falling back to CPU.
pub fn create_session(model_path: &Path) -> Result<Session, ZeroShotError> {
    if !model_path.exists() {
        return Err(ZeroShotError::ModelLoad(format!(
            "model file not found: {}",
            model_path.display()
        )));
    }

    let threads = intra_op_threads();
    let start = Instant::now();

    let session = Session::builder()
        .map_err(|e| ZeroShotError::ModelLoad(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| ZeroShotError::ModelLoad(e.to_string()))?
        .with_intra_threads(threads)
        .map_err(|e| ZeroShotError::ModelLoad(e.to_string()))?
        .with_execution_providers([
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ])
        .map_err(|e| ZeroShotError::ModelLoad(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| ZeroShotError::ModelLoad(format!("{}: {e}", model_path.display())))?;

    info!(
        "Loaded {} with {} intra-op threads in {:.2}s",
        model_path.display(),
        threads,
        start.elapsed().as_secs_f64()
    );

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file() {
        let err = create_session(Path::new("/no/such/model.onnx")).unwrap_err();
        assert!(matches!(err, ZeroShotError::ModelLoad(_)));
    }

    #[test]
    fn test_intra_op_threads_positive() {
        assert!(intra_op_threads() > 0);
    }
}
