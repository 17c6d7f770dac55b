use image::RgbImage;
use tapevision_core::{threshold_hsv, FrameBuffer, HsvThreshold};

/// Threshold `rgb` into a new mask buffer owned by the caller.
pub(super) fn threshold_stage(rgb: &RgbImage, hsv: &HsvThreshold) -> FrameBuffer {
    if hsv.is_degenerate() {
        log::trace!("threshold covers the full HSV domain, selecting every pixel");
    }
    FrameBuffer::acquire(threshold_hsv(rgb, hsv))
}
