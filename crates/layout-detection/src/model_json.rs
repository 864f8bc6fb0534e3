//! Parser for the layout tool's `<stem>_model.json` result file
//!
//! The file is a JSON array with one record per page:
//!
//! ```json
//! [{"page_info": {"width": 1224, "height": 1584},
//!   "layout_dets": [{"category_id": 3, "score": 0.93,
//!                    "poly": [x1, y1, x2, y2, x3, y3, x4, y4]}]}]
//! ```
//!
//! Coordinates are in the tool's own page space, which may differ from the
//! raster the pipeline loaded.

use crate::{LayoutConfig, LayoutError};
use figure_extract_common::{
    is_whole_page, normalize_polygon, Detection, DetectionSource, FigureCategory,
};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ModelPage {
    page_info: PageInfo,
    #[serde(default)]
    layout_dets: Vec<LayoutRegion>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    width: f32,
    height: f32,
}

/// One region record produced by the layout tool
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutRegion {
    pub category_id: u32,
    pub score: f32,
    pub poly: Vec<f32>,
}

/// Parse a model result into figure detections for a `image_width` x `image_height` raster
///
/// `crops` are the crop files the tool wrote for this page, sorted by name.
/// The n-th kept figure is paired with the n-th crop. That pairing is purely
/// ordinal and can be wrong on pages with several figures; the persisted
/// crops are always recomputed from the boxes instead.
pub fn parse_layout_result(
    content: &str,
    image_width: u32,
    image_height: u32,
    config: &LayoutConfig,
    crops: &[PathBuf],
) -> Result<Vec<Detection>, LayoutError> {
    let pages: Vec<ModelPage> = serde_json::from_str(content)?;
    let page = pages
        .into_iter()
        .next()
        .ok_or_else(|| LayoutError::InvalidResult("result contains no pages".to_string()))?;

    if page.page_info.width <= 0.0 || page.page_info.height <= 0.0 {
        return Err(LayoutError::InvalidResult(format!(
            "invalid page size {}x{}",
            page.page_info.width, page.page_info.height
        )));
    }

    let scale_x = image_width as f32 / page.page_info.width;
    let scale_y = image_height as f32 / page.page_info.height;
    debug!(
        "Layout page {}x{} -> image {}x{} (scale {:.3}, {:.3})",
        page.page_info.width, page.page_info.height, image_width, image_height, scale_x, scale_y
    );

    let mut figures = Vec::new();
    for region in page
        .layout_dets
        .iter()
        .filter(|r| r.category_id == config.figure_category_id && r.score > config.min_score)
    {
        let bbox = match normalize_polygon(&region.poly, scale_x, scale_y) {
            Ok(bbox) => bbox.truncate(),
            Err(e) => {
                warn!("Skipping layout region: {}", e);
                continue;
            }
        };

        if is_whole_page(&bbox, image_width, image_height, config.page_area_ratio) {
            debug!("Skipping whole-page layout region {:?}", bbox);
            continue;
        }

        let detection = match Detection::new(
            bbox,
            DetectionSource::Layout,
            region.score,
            FigureCategory::Figure,
            image_width,
            image_height,
        ) {
            Ok(detection) => detection,
            Err(e) => {
                warn!("Skipping layout region: {}", e);
                continue;
            }
        };

        let detection = match crops.get(figures.len()) {
            Some(crop) => detection.with_crop_ref(crop),
            None => detection,
        };
        figures.push(detection);
    }

    Ok(figures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figure_extract_common::BoundingBox;

    fn config() -> LayoutConfig {
        LayoutConfig::default()
    }

    const RESULT: &str = r#"[{
        "page_info": {"width": 500, "height": 400},
        "layout_dets": [
            {"category_id": 3, "score": 0.93, "poly": [50, 50, 200, 50, 200, 150, 50, 150]},
            {"category_id": 1, "score": 0.99, "poly": [0, 0, 500, 0, 500, 30, 0, 30]},
            {"category_id": 3, "score": 0.40, "poly": [300, 200, 400, 200, 400, 300, 300, 300]},
            {"category_id": 3, "score": 0.88, "poly": [0, 0, 500, 0, 500, 390, 0, 390]},
            {"category_id": 3, "score": 0.75, "poly": [300.6, 250.2, 450.9, 250.2, 450.9, 380.7, 300.6, 380.7], "extra": true}
        ]
    }]"#;

    #[test]
    fn test_filters_category_score_and_whole_page() {
        let dets = parse_layout_result(RESULT, 1000, 800, &config(), &[]).unwrap();
        assert_eq!(dets.len(), 2);

        assert_eq!(*dets[0].bbox(), BoundingBox::new(100.0, 100.0, 400.0, 300.0));
        assert_eq!(dets[0].source(), DetectionSource::Layout);
        assert_eq!(dets[0].label(), FigureCategory::Figure);
        assert!((dets[0].score() - 0.93).abs() < 1e-6);
    }

    #[test]
    fn test_scaled_boxes_are_truncated() {
        let dets = parse_layout_result(RESULT, 1000, 800, &config(), &[]).unwrap();
        // 300.6*2 = 601.2, 250.2*2 = 500.4, 450.9*2 = 901.8, 380.7*2 = 761.4
        assert_eq!(*dets[1].bbox(), BoundingBox::new(601.0, 500.0, 901.0, 761.0));
    }

    #[test]
    fn test_ordinal_crop_association() {
        let crops = vec![PathBuf::from("images/a.jpg")];
        let dets = parse_layout_result(RESULT, 1000, 800, &config(), &crops).unwrap();
        assert_eq!(dets[0].crop_ref(), Some(crops[0].as_path()));
        assert!(dets[1].crop_ref().is_none());
    }

    #[test]
    fn test_custom_score_threshold() {
        let cfg = LayoutConfig {
            min_score: 0.8,
            ..LayoutConfig::default()
        };
        let dets = parse_layout_result(RESULT, 1000, 800, &cfg, &[]).unwrap();
        assert_eq!(dets.len(), 1);
    }

    #[test]
    fn test_malformed_json_is_error() {
        let result = parse_layout_result("{not json", 100, 100, &config(), &[]);
        assert!(matches!(result, Err(LayoutError::Parse(_))));
    }

    #[test]
    fn test_empty_page_list_is_error() {
        let result = parse_layout_result("[]", 100, 100, &config(), &[]);
        assert!(matches!(result, Err(LayoutError::InvalidResult(_))));
    }

    #[test]
    fn test_zero_page_size_is_error() {
        let json = r#"[{"page_info": {"width": 0, "height": 400}, "layout_dets": []}]"#;
        let result = parse_layout_result(json, 100, 100, &config(), &[]);
        assert!(matches!(result, Err(LayoutError::InvalidResult(_))));
    }

    #[test]
    fn test_bad_polygon_skipped() {
        let json = r#"[{"page_info": {"width": 100, "height": 100}, "layout_dets": [
            {"category_id": 3, "score": 0.9, "poly": [1, 2, 3]},
            {"category_id": 3, "score": 0.9, "poly": [10, 10, 10, 10, 10, 40, 10, 40]},
            {"category_id": 3, "score": 0.9, "poly": [10, 10, 40, 10, 40, 40, 10, 40]}
        ]}]"#;
        let dets = parse_layout_result(json, 100, 100, &config(), &[]).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(*dets[0].bbox(), BoundingBox::new(10.0, 10.0, 40.0, 40.0));
    }
}
