//! Zero-shot figure detection with an open-vocabulary detection model
//!
//! The detector holds one model instance for the whole run. Loading the model
//! is expensive, so callers build a [`ZeroShotDetector`] once and pass it to
//! every page. The model sits behind a mutex: inference calls are serialized,
//! everything else (box conversion, cropping) runs on the caller's thread.
//!
//! # Features
//! - Fixed prompt vocabulary built from [`FigureCategory`] phrases
//! - Independent box and text confidence thresholds
//! - Whole-page false positives dropped before fusion
//! - Each surviving region cropped to `<work_dir>/gdino/<page>/` right away
//!
//! # Example
//! ```no_run
//! use figure_extract_common::PageImage;
//! use figure_zero_shot_detection::{ZeroShotConfig, ZeroShotDetector};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let detector = ZeroShotDetector::from_config(ZeroShotConfig::default())?;
//! let page = PageImage::open("page_012.png")?;
//! for det in detector.detect(&page, Path::new("output"))? {
//!     println!("{} {:.2} {:?}", det.label(), det.score(), det.bbox());
//! }
//! # Ok(())
//! # }
//! ```

pub mod grounding_dino;
pub mod session;

pub use grounding_dino::GroundingDinoModel;

use figure_extract_common::image_io::{crop_region, save_jpeg, DEFAULT_JPEG_QUALITY};
use figure_extract_common::{
    is_whole_page, BoundingBox, Detection, DetectionSource, FigureCategory, PageImage,
    ProcessingError, DEFAULT_PAGE_AREA_RATIO,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// Configuration for zero-shot detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroShotConfig {
    /// ONNX export of the detection model
    pub model_path: PathBuf,
    /// `tokenizer.json` matching the model's text encoder
    pub tokenizer_path: PathBuf,
    /// Minimum box confidence (0.0-1.0), exclusive
    pub box_threshold: f32,
    /// Minimum text-token confidence for a phrase to label a box (0.0-1.0), exclusive
    pub text_threshold: f32,
    /// Target length of the shorter image side after resizing
    pub max_short_side: u32,
    /// Upper bound on the longer image side after resizing
    pub max_long_side: u32,
    /// Page-area ratio above which a box is a whole-page false positive
    #[serde(skip)]
    pub page_area_ratio: f32,
}

impl Default for ZeroShotConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/grounding-dino/grounding_dino_base.onnx"),
            tokenizer_path: PathBuf::from("models/grounding-dino/tokenizer.json"),
            box_threshold: 0.2,
            text_threshold: 0.2,
            max_short_side: 800,
            max_long_side: 1333,
            page_area_ratio: DEFAULT_PAGE_AREA_RATIO,
        }
    }
}

/// Error types for zero-shot detection
#[derive(Debug, Error)]
pub enum ZeroShotError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    #[error("Image processing error: {0}")]
    Image(#[from] ProcessingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw model output: parallel sequences of boxes, scores and matched phrases
///
/// Boxes are `[x1, y1, x2, y2]` in pixels of the image passed to the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub labels: Vec<String>,
}

impl RawDetections {
    #[must_use]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Open-vocabulary detection model
///
/// Given an image, the prompt phrases and both thresholds, returns the boxes
/// that pass them together with their scores and matched phrases.
pub trait ZeroShotModel: Send {
    fn predict(
        &mut self,
        image: &RgbImage,
        phrases: &[&str],
        box_threshold: f32,
        text_threshold: f32,
    ) -> Result<RawDetections, ZeroShotError>;
}

/// Prompt phrases in [`FigureCategory::ALL`] order
#[must_use]
pub fn figure_phrases() -> Vec<&'static str> {
    FigureCategory::ALL.iter().map(FigureCategory::phrase).collect()
}

/// Long-lived zero-shot detector shared across pages
pub struct ZeroShotDetector {
    model: Mutex<Box<dyn ZeroShotModel>>,
    config: ZeroShotConfig,
    phrases: Vec<&'static str>,
}

impl ZeroShotDetector {
    /// Wrap an already constructed model
    pub fn new(model: impl ZeroShotModel + 'static, config: ZeroShotConfig) -> Self {
        Self {
            model: Mutex::new(Box::new(model)),
            config,
            phrases: figure_phrases(),
        }
    }

    /// Load the Grounding DINO model named in `config`
    pub fn from_config(config: ZeroShotConfig) -> Result<Self, ZeroShotError> {
        let model = GroundingDinoModel::load(&config)?;
        Ok(Self::new(model, config))
    }

    #[must_use]
    pub fn config(&self) -> &ZeroShotConfig {
        &self.config
    }

    /// Detect figure regions on `page`
    ///
    /// Surviving regions are cropped to `<work_dir>/gdino/<page>/crop_<i>_<label>.jpg`
    /// where `i` is the raw model output index.
    pub fn detect(&self, page: &PageImage, work_dir: &Path) -> Result<Vec<Detection>, ZeroShotError> {
        let raw = {
            // A panic in an earlier predict fails only that page
            let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
            model.predict(
                page.pixels(),
                &self.phrases,
                self.config.box_threshold,
                self.config.text_threshold,
            )?
        };

        if raw.scores.len() != raw.len() || raw.labels.len() != raw.len() {
            return Err(ZeroShotError::InvalidOutput(format!(
                "mismatched output lengths: {} boxes, {} scores, {} labels",
                raw.len(),
                raw.scores.len(),
                raw.labels.len()
            )));
        }

        let crop_dir = work_dir.join("gdino").join(page.name());
        std::fs::create_dir_all(&crop_dir)?;

        let (width, height) = (page.width(), page.height());
        let mut figures = Vec::with_capacity(raw.len());

        for (i, ((raw_box, &score), phrase)) in raw
            .boxes
            .iter()
            .zip(&raw.scores)
            .zip(&raw.labels)
            .enumerate()
        {
            let bbox = BoundingBox::new(raw_box[0], raw_box[1], raw_box[2], raw_box[3]).truncate();

            if is_whole_page(&bbox, width, height, self.config.page_area_ratio) {
                debug!("Skipping whole-page box {} {:?}", i, bbox);
                continue;
            }

            let label = FigureCategory::from_phrase(phrase).unwrap_or_else(|| {
                debug!("Unmatched phrase {:?}, labelling as figure", phrase);
                FigureCategory::Figure
            });

            let detection = match Detection::new(
                bbox,
                DetectionSource::ZeroShot,
                score,
                label,
                width,
                height,
            ) {
                Ok(detection) => detection,
                Err(e) => {
                    debug!("Skipping box {}: {}", i, e);
                    continue;
                }
            };

            let crop_path = crop_dir.join(format!("crop_{i}_{}.jpg", label.id()));
            let crop = crop_region(page.pixels(), detection.bbox())?;
            save_jpeg(&crop, &crop_path, DEFAULT_JPEG_QUALITY)?;

            figures.push(detection.with_crop_ref(crop_path));
        }

        info!(
            "[zero-shot] {}: {} regions ({} raw, whole-page filtered)",
            page.name(),
            figures.len(),
            raw.len()
        );

        Ok(figures)
    }
}
