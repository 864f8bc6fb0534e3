//! Layout detection through an external layout-analysis tool
//!
//! The tool (a MinerU-compatible `magic-pdf` binary by default) is run once per
//! page image. It writes a `<stem>_model.json` result that lists page regions
//! with a category, a confidence and a four-corner polygon. Figure regions are
//! kept and mapped into the pixel space of the loaded raster.
//!
//! Every failure mode of the tool (spawn error, timeout, non-zero exit,
//! missing or malformed result) yields zero detections for the page. The
//! failure is logged and the pipeline moves on.
//!
//! # Example
//! ```no_run
//! use figure_extract_common::PageImage;
//! use figure_layout_detection::{LayoutConfig, LayoutDetector};
//! use std::path::Path;
//!
//! # async fn run() -> figure_extract_common::Result<()> {
//! let detector = LayoutDetector::new(LayoutConfig::default());
//! let page = PageImage::open("page_012.png")?;
//! let figures = detector.detect(&page, Path::new("output")).await;
//! println!("{} layout figures", figures.len());
//! # Ok(())
//! # }
//! ```

pub mod model_json;

pub use model_json::{parse_layout_result, LayoutRegion};

use figure_extract_common::{Detection, PageImage, DEFAULT_PAGE_AREA_RATIO};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Category id the layout tool assigns to figure regions
pub const FIGURE_CATEGORY_ID: u32 = 3;

/// Configuration for the layout tool wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Path or name of the layout tool executable
    pub binary: PathBuf,
    /// Parse method passed with `-m`; also the name of the result subdirectory
    pub method: String,
    /// Wall-clock limit for one tool run
    pub timeout_secs: u64,
    /// Regions must score strictly above this to be kept
    pub min_score: f32,
    /// Category id of figure regions
    pub figure_category_id: u32,
    /// Page-area ratio above which a region is a whole-page false positive
    #[serde(skip)]
    pub page_area_ratio: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("magic-pdf"),
            method: "auto".to_string(),
            timeout_secs: 120,
            min_score: 0.5,
            figure_category_id: FIGURE_CATEGORY_ID,
            page_area_ratio: DEFAULT_PAGE_AREA_RATIO,
        }
    }
}

/// Error types for layout detection
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Failed to start layout tool {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Layout tool timed out after {0}s")]
    Timeout(u64),

    #[error("Layout tool exited with {status}: {stderr}")]
    ToolFailed { status: ExitStatus, stderr: String },

    #[error("Layout tool produced no result at {0}")]
    MissingOutput(PathBuf),

    #[error("Invalid layout result: {0}")]
    InvalidResult(String),

    #[error("Failed to parse layout result: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Paths the layout tool uses for one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutputPaths {
    /// Directory passed with `-o`
    pub output_root: PathBuf,
    /// `<output_root>/<stem>/<method>/<stem>_model.json`
    pub model_json: PathBuf,
    /// Directory of crops written by the tool
    pub images_dir: PathBuf,
}

impl ToolOutputPaths {
    #[must_use]
    pub fn new(work_dir: &Path, page_name: &str, method: &str) -> Self {
        let output_root = work_dir.join("mineru");
        let method_dir = output_root.join(page_name).join(method);
        Self {
            model_json: method_dir.join(format!("{page_name}_model.json")),
            images_dir: method_dir.join("images"),
            output_root,
        }
    }
}

/// Wrapper around the external layout-analysis tool
#[derive(Debug, Clone)]
pub struct LayoutDetector {
    config: LayoutConfig,
}

impl LayoutDetector {
    #[must_use]
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Detect figure regions on `page`, never failing
    ///
    /// Tool output goes under `<work_dir>/mineru/`. Any failure is logged and
    /// reported as zero detections.
    pub async fn detect(&self, page: &PageImage, work_dir: &Path) -> Vec<Detection> {
        match self.try_detect(page, work_dir).await {
            Ok(figures) => {
                info!("[layout] {}: {} figure regions", page.name(), figures.len());
                figures
            }
            Err(e) => {
                warn!("[layout] {}: no detections ({})", page.name(), e);
                Vec::new()
            }
        }
    }

    /// Detect figure regions on `page`, surfacing the failure reason
    pub async fn try_detect(
        &self,
        page: &PageImage,
        work_dir: &Path,
    ) -> Result<Vec<Detection>, LayoutError> {
        let paths = ToolOutputPaths::new(work_dir, &page.name(), &self.config.method);
        tokio::fs::create_dir_all(&paths.output_root).await?;

        self.run_tool(page.path(), &paths.output_root).await?;

        if !paths.model_json.exists() {
            return Err(LayoutError::MissingOutput(paths.model_json));
        }

        let content = tokio::fs::read_to_string(&paths.model_json).await?;
        let crops = list_crops(&paths.images_dir).await;

        parse_layout_result(&content, page.width(), page.height(), &self.config, &crops)
    }

    /// Run the tool once, bounded by the configured timeout
    async fn run_tool(&self, image_path: &Path, output_root: &Path) -> Result<(), LayoutError> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("-p")
            .arg(image_path)
            .arg("-o")
            .arg(output_root)
            .arg("-m")
            .arg(&self.config.method)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Running {} -p {} -o {} -m {}",
            self.config.binary.display(),
            image_path.display(),
            output_root.display(),
            self.config.method
        );

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(result) => result.map_err(|source| LayoutError::Spawn {
                binary: self.config.binary.display().to_string(),
                source,
            })?,
            // Dropping the output future kills the child
            Err(_) => return Err(LayoutError::Timeout(self.config.timeout_secs)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LayoutError::ToolFailed {
                status: output.status,
                stderr: tail(&stderr, 400),
            });
        }

        Ok(())
    }
}

/// Crop files written by the tool, sorted by file name
async fn list_crops(images_dir: &Path) -> Vec<PathBuf> {
    let mut crops = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(images_dir).await else {
        return crops;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.is_file() {
            crops.push(path);
        }
    }

    crops.sort();
    crops
}

/// Last `max_chars` characters of `text`, trimmed
fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}
