//! Persistence of merged figures
//!
//! For every page the persister writes, under `<output>/merged/<page>/`:
//! - one JPEG crop per merged detection, recropped from the original page
//! - `figures.json`, the metadata records in emission order
//! - optionally `annotated.jpg`, the page with every merged box drawn on it
//!
//! Crop names are `fig_<NN>_<S>_<label>.jpg`: a zero-padded index, the
//! one-letter source tag and the category identifier (at most 15 characters).

pub mod annotate;

use figure_extract_common::image_io::{crop_region, save_jpeg, DEFAULT_JPEG_QUALITY};
use figure_extract_common::{Detection, DetectionSource, FigureCategory, PageImage, ProcessingError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the per-page metadata file
pub const METADATA_FILE: &str = "figures.json";

/// Name of the optional annotated page preview
pub const ANNOTATED_FILE: &str = "annotated.jpg";

const MAX_LABEL_CHARS: usize = 15;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image error: {0}")]
    Image(#[from] ProcessingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JPEG quality for crops and previews (1-100)
    pub jpeg_quality: u8,
    /// Write `annotated.jpg` next to the crops
    pub annotate: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            annotate: false,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> StorageResult<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(StorageError::InvalidConfig(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

/// One persisted figure, as written to `figures.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedFigure {
    /// Dense 0-based position in the page's merged output
    pub index: usize,
    pub source: DetectionSource,
    pub label: FigureCategory,
    /// Detector confidence rounded to 3 decimals
    pub score: f64,
    /// `[x1, y1, x2, y2]` in page pixels
    pub bbox: [u32; 4],
    /// Crop file name, relative to the page directory
    pub crop_file: String,
}

/// `fig_<NN>_<S>_<label>.jpg`
#[must_use]
pub fn figure_file_name(index: usize, source: DetectionSource, label: FigureCategory) -> String {
    let label: String = label.id().chars().take(MAX_LABEL_CHARS).collect();
    format!("fig_{index:02}_{}_{label}.jpg", source.tag())
}

/// Round to 3 decimal places
#[must_use]
pub fn round_score(score: f32) -> f64 {
    (f64::from(score) * 1000.0).round() / 1000.0
}

/// `<output_root>/merged/<page_name>`
#[must_use]
pub fn page_dir(output_root: &Path, page_name: &str) -> PathBuf {
    output_root.join("merged").join(page_name)
}

/// Writes merged detections of a page to disk
#[derive(Debug, Clone, Default)]
pub struct Persister {
    config: StorageConfig,
}

impl Persister {
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Recrop, name and record every detection of `page`
    ///
    /// `detections` must already be in fusion output order; indices follow it.
    /// Returns the records written to `figures.json`.
    pub fn persist(
        &self,
        page: &PageImage,
        detections: &[Detection],
        output_root: &Path,
    ) -> StorageResult<Vec<MergedFigure>> {
        let dir = page_dir(output_root, &page.name());
        std::fs::create_dir_all(&dir)?;

        let mut records = Vec::with_capacity(detections.len());
        for (index, det) in detections.iter().enumerate() {
            let crop_file = figure_file_name(index, det.source(), det.label());
            let crop = crop_region(page.pixels(), det.bbox())?;
            save_jpeg(&crop, &dir.join(&crop_file), self.config.jpeg_quality)?;

            debug!(
                "{}: {} {} {:.3} {:?}",
                page.name(),
                crop_file,
                det.source(),
                det.score(),
                det.bbox()
            );

            records.push(MergedFigure {
                index,
                source: det.source(),
                label: det.label(),
                score: round_score(det.score()),
                bbox: det.bbox().to_pixels(),
                crop_file,
            });
        }

        write_metadata(&dir.join(METADATA_FILE), &records)?;

        if self.config.annotate {
            let preview = annotate::draw_detections(page.pixels(), detections);
            save_jpeg(&preview, &dir.join(ANNOTATED_FILE), self.config.jpeg_quality)?;
        }

        info!(
            "[persist] {}: {} figures -> {}",
            page.name(),
            records.len(),
            dir.display()
        );

        Ok(records)
    }
}

/// Write records as a pretty-printed JSON array
pub fn write_metadata(path: &Path, records: &[MergedFigure]) -> StorageResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.flush()?;
    Ok(())
}

/// Read back a `figures.json`
pub fn read_metadata(path: &Path) -> StorageResult<Vec<MergedFigure>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_figure_file_name() {
        assert_eq!(
            figure_file_name(0, DetectionSource::Layout, FigureCategory::Figure),
            "fig_00_L_figure.jpg"
        );
        assert_eq!(
            figure_file_name(12, DetectionSource::ZeroShot, FigureCategory::GeometricShape),
            "fig_12_Z_geometric_shape.jpg"
        );
        assert_eq!(
            figure_file_name(105, DetectionSource::ZeroShot, FigureCategory::Chart),
            "fig_105_Z_chart.jpg"
        );
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(0.85), 0.85);
        assert_eq!(round_score(0.123_456), 0.123);
        assert_eq!(round_score(0.9996), 1.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(StorageConfig::default().validate().is_ok());
        let bad = StorageConfig {
            jpeg_quality: 0,
            ..StorageConfig::default()
        };
        assert!(matches!(bad.validate(), Err(StorageError::InvalidConfig(_))));
        assert!(Persister::new(bad).is_err());
    }

    #[test]
    fn test_merged_figure_json_shape() {
        let record = MergedFigure {
            index: 1,
            source: DetectionSource::ZeroShot,
            label: FigureCategory::GeometricShape,
            score: 0.7,
            bbox: [600, 500, 900, 750],
            crop_file: "fig_01_Z_geometric_shape.jpg".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["source"], "zeroshot");
        assert_eq!(value["label"], "geometric_shape");
        assert_eq!(value["bbox"], serde_json::json!([600, 500, 900, 750]));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_metadata_reports_full_disk() {
        let record = MergedFigure {
            index: 0,
            source: DetectionSource::Layout,
            label: FigureCategory::Figure,
            score: 0.9,
            bbox: [0, 0, 10, 10],
            crop_file: "fig_00_L_figure.jpg".to_string(),
        };
        let result = write_metadata(Path::new("/dev/full"), &[record]);
        assert!(matches!(result, Err(StorageError::IoError(_))));
    }
}
