use image::GrayImage;
use tapevision_core::{find_contours, Contour};

use crate::settings::ContourFilter;

/// Extract contours from `mask` and keep those passing `filter`.
pub(super) fn contour_stage(mask: &GrayImage, filter: &ContourFilter) -> Vec<Contour> {
    let image_area = (mask.width() as f64) * (mask.height() as f64);
    if image_area <= 0.0 {
        return Vec::new();
    }

    let found = find_contours(mask, filter.min_pixels);
    let total = found.len();
    let kept: Vec<Contour> = found
        .into_iter()
        .filter(|c| filter.area.contains(100.0 * c.area() / image_area))
        .filter(|c| filter.ratio.contains(c.aspect_ratio()))
        .filter(|c| filter.fullness.contains(c.fullness_percent()))
        .collect();

    log::debug!("contours: {} found, {} kept", total, kept.len());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::FloatRange;
    use image::Luma;

    fn mask_with(rects: &[(u32, u32, u32, u32)]) -> GrayImage {
        let mut mask = GrayImage::new(100, 100);
        for &(x0, y0, x1, y1) in rects {
            for y in y0..y1 {
                for x in x0..x1 {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        mask
    }

    #[test]
    fn area_filter_uses_percent_of_image() {
        // 10x10 = 1 %, 30x30 = 9 %
        let mask = mask_with(&[(0, 0, 10, 10), (50, 50, 80, 80)]);
        let filter = ContourFilter {
            area: FloatRange::new(2.0, 100.0),
            ..ContourFilter::default()
        };
        let kept = contour_stage(&mask, &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].pixel_count, 900);
    }

    #[test]
    fn ratio_filter_rejects_wide_strips() {
        let mask = mask_with(&[(0, 0, 60, 5), (10, 20, 20, 40)]);
        let filter = ContourFilter {
            ratio: FloatRange::new(0.0, 2.0),
            ..ContourFilter::default()
        };
        let kept = contour_stage(&mask, &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bounds.width, 10.0);
    }

    #[test]
    fn fullness_filter_rejects_sparse_shapes() {
        // an L shape fills ~19 % of its bounding rectangle
        let mask = mask_with(&[(0, 0, 40, 4), (0, 4, 4, 40), (60, 60, 80, 80)]);
        let filter = ContourFilter {
            fullness: FloatRange::new(50.0, 100.0),
            ..ContourFilter::default()
        };
        let kept = contour_stage(&mask, &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].pixel_count, 400);
    }
}
