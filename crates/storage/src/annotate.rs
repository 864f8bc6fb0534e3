//! Annotated page previews for visual QA

use figure_extract_common::{Detection, DetectionSource};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const LINE_THICKNESS: u32 = 3;

/// Box colour per detection source
#[must_use]
pub fn source_color(source: DetectionSource) -> Rgb<u8> {
    match source {
        DetectionSource::Layout => Rgb([0, 170, 0]),
        DetectionSource::ZeroShot => Rgb([220, 40, 40]),
    }
}

/// Copy of `page` with every detection outlined in its source colour
#[must_use]
pub fn draw_detections(page: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut img = page.clone();

    for det in detections {
        let [x1, y1, x2, y2] = det.bbox().to_pixels();
        let w = x2.saturating_sub(x1);
        let h = y2.saturating_sub(y1);
        let color = source_color(det.source());

        for t in 0..LINE_THICKNESS {
            let inner_w = w.saturating_sub(2 * t);
            let inner_h = h.saturating_sub(2 * t);
            if inner_w > 0 && inner_h > 0 {
                let rect = Rect::at((x1 + t) as i32, (y1 + t) as i32).of_size(inner_w, inner_h);
                draw_hollow_rect_mut(&mut img, rect, color);
            }
        }
    }

    img
}
