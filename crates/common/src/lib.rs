//! Common types and utilities for textbook figure extraction

pub mod geometry;
pub mod image_io;

pub use geometry::{
    is_whole_page, normalize_polygon, overlap_ratio, BoundingBox, DEFAULT_PAGE_AREA_RATIO,
};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

/// Result type for processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Which detector produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionSource {
    /// External layout-analysis tool (priority source during fusion)
    #[serde(rename = "layout")]
    Layout,
    /// Open-vocabulary zero-shot detection model
    #[serde(rename = "zeroshot")]
    ZeroShot,
}

impl DetectionSource {
    /// One-letter tag used in crop filenames
    #[must_use]
    pub fn tag(&self) -> char {
        match self {
            DetectionSource::Layout => 'L',
            DetectionSource::ZeroShot => 'Z',
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Layout => "layout",
            DetectionSource::ZeroShot => "zeroshot",
        }
    }
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed category set for detected figure regions
///
/// Each category has a stable identifier (JSON labels, filenames) and the
/// phrase used in the zero-shot prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FigureCategory {
    Chart,
    Diagram,
    Figure,
    GeometricShape,
    Graph,
    Table,
    Picture,
}

impl FigureCategory {
    /// All categories in prompt order
    pub const ALL: [FigureCategory; 7] = [
        FigureCategory::Chart,
        FigureCategory::Diagram,
        FigureCategory::Figure,
        FigureCategory::GeometricShape,
        FigureCategory::Graph,
        FigureCategory::Table,
        FigureCategory::Picture,
    ];

    /// Stable identifier
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            FigureCategory::Chart => "chart",
            FigureCategory::Diagram => "diagram",
            FigureCategory::Figure => "figure",
            FigureCategory::GeometricShape => "geometric_shape",
            FigureCategory::Graph => "graph",
            FigureCategory::Table => "table",
            FigureCategory::Picture => "picture",
        }
    }

    /// Phrase in the zero-shot vocabulary
    #[must_use]
    pub fn phrase(&self) -> &'static str {
        match self {
            FigureCategory::GeometricShape => "geometric shape",
            other => other.id(),
        }
    }

    /// Look up a category by its prompt phrase (case-insensitive, trimmed)
    #[must_use]
    pub fn from_phrase(phrase: &str) -> Option<Self> {
        let phrase = phrase.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.phrase().eq_ignore_ascii_case(phrase))
    }
}

impl fmt::Display for FigureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A single detected region on a page
///
/// Immutable once built. The box is clipped to the page and has positive area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    bbox: BoundingBox,
    source: DetectionSource,
    score: f32,
    label: FigureCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    crop_ref: Option<PathBuf>,
}

impl Detection {
    /// Build a detection, clipping the box to the page
    ///
    /// Fails when the clipped box has no positive area or the score is not finite.
    /// Scores are clamped to `[0, 1]`.
    pub fn new(
        bbox: BoundingBox,
        source: DetectionSource,
        score: f32,
        label: FigureCategory,
        page_width: u32,
        page_height: u32,
    ) -> Result<Self> {
        if !score.is_finite() {
            return Err(ProcessingError::InvalidGeometry(format!(
                "non-finite score {score} for {source} detection"
            )));
        }

        let clipped = bbox.clamp_to(page_width, page_height);
        if !clipped.is_valid() {
            return Err(ProcessingError::InvalidGeometry(format!(
                "degenerate box ({:.1}, {:.1}, {:.1}, {:.1}) on {}x{} page",
                bbox.x1, bbox.y1, bbox.x2, bbox.y2, page_width, page_height
            )));
        }

        Ok(Self {
            bbox: clipped,
            source,
            score: score.clamp(0.0, 1.0),
            label,
            crop_ref: None,
        })
    }

    /// Attach a detector-produced crop path (informational only)
    #[must_use]
    pub fn with_crop_ref(mut self, crop_ref: impl Into<PathBuf>) -> Self {
        self.crop_ref = Some(crop_ref.into());
        self
    }

    #[must_use]
    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    #[must_use]
    pub fn source(&self) -> DetectionSource {
        self.source
    }

    #[must_use]
    pub fn score(&self) -> f32 {
        self.score
    }

    #[must_use]
    pub fn label(&self) -> FigureCategory {
        self.label
    }

    #[must_use]
    pub fn crop_ref(&self) -> Option<&Path> {
        self.crop_ref.as_deref()
    }
}

/// A decoded page raster with its source path
///
/// Cloning is cheap: pixels are shared.
#[derive(Debug, Clone)]
pub struct PageImage {
    path: PathBuf,
    pixels: Arc<RgbImage>,
}

impl PageImage {
    /// Load and decode a page image from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pixels = image_io::load_image(path)?;
        Ok(Self::from_rgb(path, pixels))
    }

    /// Wrap an already decoded raster
    #[must_use]
    pub fn from_rgb(path: impl Into<PathBuf>, pixels: RgbImage) -> Self {
        Self {
            path: path.into(),
            pixels: Arc::new(pixels),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page name: the file stem of the source path
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string())
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[must_use]
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}
