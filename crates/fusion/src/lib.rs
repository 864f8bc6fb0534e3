//! Fusion Layer - Overlap-based merging of detector outputs
//!
//! Combines the detections of two page-level detectors into a single
//! deduplicated list. One detector is declared the *priority* source: all of
//! its detections are kept. Every detection of the *secondary* source is
//! checked against the priority detections and dropped when it overlaps any of
//! them by more than the configured ratio.
//!
//! ## Ordering
//!
//! The output is always `priority detections (input order)` followed by
//! `surviving secondary detections (input order)`. Downstream figure indices
//! are assigned from this order.
//!
//! Secondary detections are not compared with each other, so two overlapping
//! secondary boxes can both survive.
//!
//! ## Example
//!
//! ```rust
//! use figure_extract_common::{BoundingBox, Detection, DetectionSource, FigureCategory};
//! use figure_fusion::merge;
//!
//! let layout = Detection::new(
//!     BoundingBox::new(100.0, 100.0, 400.0, 300.0),
//!     DetectionSource::Layout, 0.9, FigureCategory::Figure, 1000, 800,
//! ).unwrap();
//! let near_duplicate = Detection::new(
//!     BoundingBox::new(110.0, 105.0, 410.0, 305.0),
//!     DetectionSource::ZeroShot, 0.85, FigureCategory::Chart, 1000, 800,
//! ).unwrap();
//!
//! let merged = merge(vec![layout.clone()], vec![near_duplicate], 0.3);
//! assert_eq!(merged, vec![layout]);
//! ```

use figure_extract_common::{overlap_ratio, Detection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default overlap ratio above which a secondary detection is a duplicate
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;

/// Fusion errors
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid fusion config: {0}")]
    InvalidConfig(String),
}

/// Configuration for the fusion engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Overlap ratio (0.0-1.0) above which a secondary detection is discarded
    pub iou_threshold: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), FusionError> {
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(FusionError::InvalidConfig(format!(
                "iou_threshold must be within [0, 1], got {}",
                self.iou_threshold
            )));
        }
        Ok(())
    }
}

/// Counts describing one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Priority detections (all kept)
    pub priority: usize,
    /// Secondary detections offered to the merge
    pub secondary: usize,
    /// Secondary detections that survived
    pub secondary_kept: usize,
}

impl MergeSummary {
    /// Secondary detections dropped as duplicates
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.secondary - self.secondary_kept
    }

    /// Total merged detections
    #[must_use]
    pub fn total(&self) -> usize {
        self.priority + self.secondary_kept
    }
}

/// Result of a merge: ordered detections plus counts
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub detections: Vec<Detection>,
    pub summary: MergeSummary,
}

/// Merge detections, keeping every priority detection
///
/// A secondary detection is dropped when its overlap ratio with any priority
/// detection is strictly greater than `iou_threshold`.
#[must_use]
pub fn merge(
    priority: Vec<Detection>,
    secondary: Vec<Detection>,
    iou_threshold: f32,
) -> Vec<Detection> {
    merge_with_summary(priority, secondary, iou_threshold).detections
}

fn merge_with_summary(
    priority: Vec<Detection>,
    secondary: Vec<Detection>,
    iou_threshold: f32,
) -> FusionResult {
    let mut summary = MergeSummary {
        priority: priority.len(),
        secondary: secondary.len(),
        secondary_kept: 0,
    };

    let priority_count = priority.len();
    let mut merged = priority;
    merged.reserve(secondary.len());

    for candidate in secondary {
        let duplicate_of = merged[..priority_count]
            .iter()
            .position(|kept| overlap_ratio(candidate.bbox(), kept.bbox()) > iou_threshold);

        match duplicate_of {
            Some(idx) => {
                debug!(
                    "Dropping {} {} ({:.3}) overlapping priority detection {}",
                    candidate.source(),
                    candidate.label(),
                    candidate.score(),
                    idx
                );
            }
            None => {
                summary.secondary_kept += 1;
                merged.push(candidate);
            }
        }
    }

    FusionResult {
        detections: merged,
        summary,
    }
}

/// Fusion engine bound to a validated configuration
#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Result<Self, FusionError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Merge `priority` and `secondary` detections
    #[must_use]
    pub fn fuse(&self, priority: Vec<Detection>, secondary: Vec<Detection>) -> FusionResult {
        merge_with_summary(priority, secondary, self.config.iou_threshold)
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self {
            config: FusionConfig::default(),
        }
    }
}
