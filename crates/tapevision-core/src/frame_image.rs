//! Pixel formats carried by a [`FrameBuffer`](crate::FrameBuffer).

use image::{GrayImage, RgbImage};

/// Image payload owned by a frame buffer.
///
/// Camera frames arrive as 8-bit RGB; the threshold stage produces a
/// single-channel mask where set pixels are `255`.
#[derive(Clone, Debug)]
pub enum FrameImage {
    Rgb(RgbImage),
    Mask(GrayImage),
}

impl FrameImage {
    pub fn width(&self) -> u32 {
        match self {
            FrameImage::Rgb(img) => img.width(),
            FrameImage::Mask(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            FrameImage::Rgb(img) => img.height(),
            FrameImage::Mask(img) => img.height(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Allocation size in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            FrameImage::Rgb(img) => img.as_raw().len(),
            FrameImage::Mask(img) => img.as_raw().len(),
        }
    }

    pub fn as_rgb(&self) -> Option<&RgbImage> {
        match self {
            FrameImage::Rgb(img) => Some(img),
            FrameImage::Mask(_) => None,
        }
    }

    pub fn as_mask(&self) -> Option<&GrayImage> {
        match self {
            FrameImage::Mask(img) => Some(img),
            FrameImage::Rgb(_) => None,
        }
    }
}

impl From<RgbImage> for FrameImage {
    fn from(img: RgbImage) -> Self {
        FrameImage::Rgb(img)
    }
}

impl From<GrayImage> for FrameImage {
    fn from(img: GrayImage) -> Self {
        FrameImage::Mask(img)
    }
}
