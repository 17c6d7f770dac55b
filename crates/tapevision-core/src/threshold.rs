//! HSV colour thresholding.
//!
//! Hue, saturation and value use the 8-bit convention: hue in `0..=179`
//! (degrees halved), saturation and value in `0..=255`.

use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Largest representable hue.
pub const HUE_MAX: u8 = 179;

/// Inclusive channel range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub lo: u8,
    pub hi: u8,
}

impl ChannelRange {
    pub const fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    #[inline]
    pub fn contains(&self, v: u8) -> bool {
        self.lo <= v && v <= self.hi
    }

    fn covers(&self, max: u8) -> bool {
        self.lo == 0 && self.hi >= max
    }
}

/// Pixel selection by HSV ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvThreshold {
    pub hue: ChannelRange,
    pub saturation: ChannelRange,
    pub value: ChannelRange,
    /// Select hues outside `hue` instead of inside (red wraps around 0).
    #[serde(default)]
    pub hue_inverted: bool,
}

impl Default for HsvThreshold {
    /// Bright green retroreflective tape under a green ring light.
    fn default() -> Self {
        Self {
            hue: ChannelRange::new(50, 180),
            saturation: ChannelRange::new(50, 255),
            value: ChannelRange::new(50, 255),
            hue_inverted: false,
        }
    }
}

impl HsvThreshold {
    /// Ranges that select every pixel.
    pub fn full() -> Self {
        Self {
            hue: ChannelRange::new(0, HUE_MAX),
            saturation: ChannelRange::new(0, 255),
            value: ChannelRange::new(0, 255),
            hue_inverted: false,
        }
    }

    /// True when the ranges select every pixel, so the stage can be skipped.
    pub fn is_degenerate(&self) -> bool {
        !self.hue_inverted
            && self.hue.covers(HUE_MAX)
            && self.saturation.covers(255)
            && self.value.covers(255)
    }

    #[inline]
    pub fn accepts(&self, hsv: [u8; 3]) -> bool {
        let [h, s, v] = hsv;
        self.hue.contains(h) != self.hue_inverted
            && self.saturation.contains(s)
            && self.value.contains(v)
    }
}

/// Convert one RGB pixel to 8-bit HSV.
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

    let mut h = if delta <= 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h = ((h / 2.0).round() as u32 % 180) as u8;
    [h, s.round() as u8, max as u8]
}

/// Binary mask of the pixels `threshold` accepts; set pixels are `255`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, threshold), fields(w = img.width(), h = img.height()))
)]
pub fn threshold_hsv(img: &RgbImage, threshold: &HsvThreshold) -> GrayImage {
    let (w, h) = img.dimensions();
    if threshold.is_degenerate() {
        return GrayImage::from_pixel(w, h, Luma([255]));
    }

    let mut out = GrayImage::new(w, h);
    for (src, dst) in img.pixels().zip(out.pixels_mut()) {
        if threshold.accepts(rgb_to_hsv(src.0)) {
            dst.0[0] = 255;
        }
    }
    out
}
