//! Box geometry shared by every detector and the fusion engine
//!
//! All coordinates are page pixel coordinates with a top-left origin.

use crate::{ProcessingError, Result};
use serde::{Deserialize, Serialize};

/// Default page-area ratio above which a detection is treated as a whole-page false positive
pub const DEFAULT_PAGE_AREA_RATIO: f32 = 0.6;

/// Axis-aligned bounding box `(x1, y1, x2, y2)` in page pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x1: f32,
    /// Top edge
    pub y1: f32,
    /// Right edge
    pub x2: f32,
    /// Bottom edge
    pub y2: f32,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates
    #[must_use]
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[must_use]
    #[inline]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[must_use]
    #[inline]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area of the box; zero for inverted or empty boxes
    #[must_use]
    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// True when `x1 < x2` and `y1 < y2`
    #[must_use]
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Area of the intersection with another box
    #[must_use]
    #[inline]
    pub fn intersection_area(&self, other: &Self) -> f32 {
        let x_overlap = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let y_overlap = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        x_overlap * y_overlap
    }

    /// Truncate every coordinate toward zero (integer pixel grid)
    #[must_use]
    pub fn truncate(&self) -> Self {
        Self {
            x1: self.x1.trunc(),
            y1: self.y1.trunc(),
            x2: self.x2.trunc(),
            y2: self.y2.trunc(),
        }
    }

    /// Clip the box to `[0, width] x [0, height]`
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    /// Integer pixel coordinates `[x1, y1, x2, y2]`
    ///
    /// Negative coordinates saturate to 0; callers clamp to the page first.
    #[must_use]
    pub fn to_pixels(&self) -> [u32; 4] {
        [
            self.x1 as u32,
            self.y1 as u32,
            self.x2 as u32,
            self.y2 as u32,
        ]
    }
}

/// Intersection area divided by union area of two boxes
///
/// Returns 0 when the union area is 0.
#[must_use]
pub fn overlap_ratio(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let intersection = a.intersection_area(b);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// True when the box covers more than `threshold` of the page area
#[must_use]
pub fn is_whole_page(bbox: &BoundingBox, page_width: u32, page_height: u32, threshold: f32) -> bool {
    let page_area = page_width as f32 * page_height as f32;
    if page_area <= 0.0 {
        return false;
    }
    bbox.area() / page_area > threshold
}

/// Convert a four-corner polygon `[x1,y1,x2,y2,x3,y3,x4,y4]` to its axis-aligned bounding box
///
/// Each x is multiplied by `scale_x` and each y by `scale_y` before the min/max.
pub fn normalize_polygon(poly: &[f32], scale_x: f32, scale_y: f32) -> Result<BoundingBox> {
    if poly.len() != 8 {
        return Err(ProcessingError::InvalidGeometry(format!(
            "polygon must have 8 coordinates, got {}",
            poly.len()
        )));
    }

    let mut bbox = BoundingBox::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for point in poly.chunks_exact(2) {
        let x = point[0] * scale_x;
        let y = point[1] * scale_y;
        bbox.x1 = bbox.x1.min(x);
        bbox.y1 = bbox.y1.min(y);
        bbox.x2 = bbox.x2.max(x);
        bbox.y2 = bbox.y2.max(y);
    }

    Ok(bbox)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_ratio_self_is_one() {
        let a = BoundingBox::new(10.0, 20.0, 110.0, 220.0);
        assert!((overlap_ratio(&a, &a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_overlap_ratio_symmetric() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let b = BoundingBox::new(50.0, 25.0, 175.0, 90.0);
        assert_eq!(overlap_ratio(&a, &b), overlap_ratio(&b, &a));
        assert!(overlap_ratio(&a, &b) > 0.0);
    }

    #[test]
    fn test_overlap_ratio_disjoint_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(overlap_ratio(&a, &b), 0.0);

        // Touching edges share no area
        let c = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(overlap_ratio(&a, &c), 0.0);
    }

    #[test]
    fn test_overlap_ratio_half() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let b = BoundingBox::new(0.0, 0.0, 100.0, 50.0);
        assert!((overlap_ratio(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_ratio_zero_union() {
        let empty = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(overlap_ratio(&empty, &empty), 0.0);
    }

    #[test]
    fn test_is_whole_page_thresholds() {
        let seventy = BoundingBox::new(0.0, 0.0, 1000.0, 700.0);
        let fifty = BoundingBox::new(0.0, 0.0, 1000.0, 500.0);
        assert!(is_whole_page(&seventy, 1000, 1000, DEFAULT_PAGE_AREA_RATIO));
        assert!(!is_whole_page(&fifty, 1000, 1000, DEFAULT_PAGE_AREA_RATIO));
    }

    #[test]
    fn test_is_whole_page_is_strict() {
        let exactly = BoundingBox::new(0.0, 0.0, 1000.0, 600.0);
        assert!(!is_whole_page(&exactly, 1000, 1000, 0.6));
    }

    #[test]
    fn test_is_whole_page_empty_page() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(!is_whole_page(&bbox, 0, 1000, 0.6));
    }

    #[test]
    fn test_normalize_polygon_scaled_square() {
        let poly = [0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0];
        let bbox = normalize_polygon(&poly, 2.0, 2.0).unwrap();
        assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 20.0, 20.0));
    }

    #[test]
    fn test_normalize_polygon_rotated_quad() {
        // Diamond: corners on each axis
        let poly = [50.0, 0.0, 100.0, 50.0, 50.0, 100.0, 0.0, 50.0];
        let bbox = normalize_polygon(&poly, 1.0, 0.5).unwrap();
        assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 100.0, 50.0));
    }

    #[test]
    fn test_normalize_polygon_wrong_length() {
        assert!(normalize_polygon(&[0.0, 0.0, 1.0, 1.0], 1.0, 1.0).is_err());
    }

    #[test]
    fn test_truncate_and_clamp() {
        let bbox = BoundingBox::new(-3.7, 10.9, 1200.2, 99.99);
        let clamped = bbox.clamp_to(1000, 800).truncate();
        assert_eq!(clamped, BoundingBox::new(0.0, 10.0, 1000.0, 99.0));
        assert_eq!(clamped.to_pixels(), [0, 10, 1000, 99]);
    }
}
