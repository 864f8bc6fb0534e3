//! Pipeline configuration
//!
//! Every field has a default, so an empty YAML document is a valid config.
//!
//! ```yaml
//! output_dir: output
//! page_area_ratio: 0.6
//! max_concurrent_pages: 1
//! layout:
//!   binary: magic-pdf
//!   timeout_secs: 120
//! zero_shot:
//!   model_path: models/grounding-dino/grounding_dino_base.onnx
//!   box_threshold: 0.2
//! fusion:
//!   iou_threshold: 0.3
//! storage:
//!   jpeg_quality: 95
//!   annotate: false
//! ```

use crate::error::ConfigError;
use figure_extract_common::DEFAULT_PAGE_AREA_RATIO;
use figure_fusion::FusionConfig;
use figure_layout_detection::LayoutConfig;
use figure_storage::StorageConfig;
use figure_zero_shot_detection::ZeroShotConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root for `merged/`, `mineru/` and `gdino/`
    pub output_dir: PathBuf,
    /// Page-area ratio above which any detection is a whole-page false positive
    pub page_area_ratio: f32,
    /// Pages processed at the same time (1 = strictly sequential)
    pub max_concurrent_pages: usize,
    pub layout: LayoutConfig,
    pub zero_shot: ZeroShotConfig,
    pub fusion: FusionConfig,
    pub storage: StorageConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            page_area_ratio: DEFAULT_PAGE_AREA_RATIO,
            max_concurrent_pages: 1,
            layout: LayoutConfig::default(),
            zero_shot: ZeroShotConfig::default(),
            fusion: FusionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Check ranges of every threshold and limit
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("page_area_ratio", self.page_area_ratio)?;
        if self.page_area_ratio == 0.0 {
            return invalid("page_area_ratio must be greater than 0".to_string());
        }
        if self.max_concurrent_pages == 0 {
            return invalid("max_concurrent_pages must be at least 1".to_string());
        }

        if self.layout.timeout_secs == 0 {
            return invalid("layout.timeout_secs must be at least 1".to_string());
        }
        check_unit("layout.min_score", self.layout.min_score)?;

        check_unit("zero_shot.box_threshold", self.zero_shot.box_threshold)?;
        check_unit("zero_shot.text_threshold", self.zero_shot.text_threshold)?;
        if self.zero_shot.max_short_side == 0
            || self.zero_shot.max_long_side < self.zero_shot.max_short_side
        {
            return invalid(format!(
                "zero_shot sides must satisfy 0 < max_short_side <= max_long_side, got {} and {}",
                self.zero_shot.max_short_side, self.zero_shot.max_long_side
            ));
        }

        self.fusion
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.storage
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }

    /// Layout settings with the shared page-area ratio applied
    #[must_use]
    pub fn layout_config(&self) -> LayoutConfig {
        LayoutConfig {
            page_area_ratio: self.page_area_ratio,
            ..self.layout.clone()
        }
    }

    /// Zero-shot settings with the shared page-area ratio applied
    #[must_use]
    pub fn zero_shot_config(&self) -> ZeroShotConfig {
        ZeroShotConfig {
            page_area_ratio: self.page_area_ratio,
            ..self.zero_shot.clone()
        }
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return invalid(format!("{name} must be within [0, 1], got {value}"));
    }
    Ok(())
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_pages, 1);
        assert_eq!(config.fusion.iou_threshold, 0.3);
        assert_eq!(config.storage.jpeg_quality, 95);
        assert!(!config.storage.annotate);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = PipelineConfig::from_yaml_str("").unwrap();
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.layout.binary, PathBuf::from("magic-pdf"));
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "
page_area_ratio: 0.75
max_concurrent_pages: 4
layout:
  binary: /opt/mineru/bin/magic-pdf
  timeout_secs: 30
zero_shot:
  box_threshold: 0.35
storage:
  annotate: true
";
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_pages, 4);
        assert_eq!(config.layout.timeout_secs, 30);
        assert_eq!(config.layout.method, "auto");
        assert_eq!(config.zero_shot.box_threshold, 0.35);
        assert_eq!(config.zero_shot.text_threshold, 0.2);
        assert!(config.storage.annotate);

        assert_eq!(config.layout_config().page_area_ratio, 0.75);
        assert_eq!(config.zero_shot_config().page_area_ratio, 0.75);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = PipelineConfig::default();
        config.fusion.iou_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.max_concurrent_pages = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.layout.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.zero_shot.text_threshold = -0.1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.storage.jpeg_quality = 101;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.zero_shot.max_long_side = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let err = PipelineConfig::from_yaml_str("max_concurrent_pages: [1, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_file(Path::new("/no/such/figures.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
