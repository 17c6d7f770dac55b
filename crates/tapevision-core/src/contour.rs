//! Connected-region extraction from binary masks.
//!
//! Regions are 8-connected sets of set pixels (`> 0`). Each region yields its
//! outer boundary, traced with Moore-neighbour tracing; holes are ignored.

use std::collections::VecDeque;

use image::GrayImage;
use nalgebra::{Point2, Vector2};

use crate::geometry::{min_area_rect, Rect};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Neighbour offsets, clockwise on screen (y down) starting east.
const NEIGHBOURS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

fn neighbour_index(dx: i64, dy: i64) -> usize {
    NEIGHBOURS
        .iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(4)
}

/// Second-order central moments of a pixel region.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CentralMoments {
    pub mu20: f64,
    pub mu02: f64,
    pub mu11: f64,
}

impl CentralMoments {
    /// Angle of the principal (major) axis, radians in image coordinates.
    pub fn orientation(&self) -> f64 {
        0.5 * (2.0 * self.mu11).atan2(self.mu20 - self.mu02)
    }
}

/// One connected region of a mask.
#[derive(Clone, Debug)]
pub struct Contour {
    /// Outer boundary pixel centres in tracing order.
    pub boundary: Vec<Point2<f64>>,
    /// Number of pixels in the region.
    pub pixel_count: usize,
    /// Pixel extents (width/height count pixels, so a single pixel is 1×1).
    pub bounds: Rect,
    pub centroid: Point2<f64>,
    pub moments: CentralMoments,
}

impl Contour {
    #[inline]
    pub fn area(&self) -> f64 {
        self.pixel_count as f64
    }

    /// Bounding width over height.
    pub fn aspect_ratio(&self) -> f64 {
        if self.bounds.height <= 0.0 {
            return 0.0;
        }
        self.bounds.width / self.bounds.height
    }

    /// Unit vector along the principal axis.
    pub fn principal_axis(&self) -> Vector2<f64> {
        let a = self.moments.orientation();
        Vector2::new(a.cos(), a.sin())
    }

    /// Area of the minimum-area rectangle covering the region's pixels.
    pub fn min_rect_area(&self) -> f64 {
        let corners: Vec<Point2<f64>> = self
            .boundary
            .iter()
            .flat_map(|p| {
                [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)]
                    .map(|(dx, dy)| Point2::new(p.x + dx, p.y + dy))
            })
            .collect();
        min_area_rect(&corners).map_or(0.0, |r| r.area())
    }

    /// Region pixel count over its minimum-area rectangle, in percent.
    pub fn fullness_percent(&self) -> f64 {
        let rect = self.min_rect_area();
        if rect <= 0.0 {
            return 0.0;
        }
        (100.0 * self.area() / rect).min(100.0)
    }
}

#[derive(Default)]
struct RegionStats {
    count: usize,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl RegionStats {
    fn new(x: u32, y: u32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x,
            y1: y,
            ..Self::default()
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        let (fx, fy) = (x as f64, y as f64);
        self.count += 1;
        self.sx += fx;
        self.sy += fy;
        self.sxx += fx * fx;
        self.syy += fy * fy;
        self.sxy += fx * fy;
        self.x0 = self.x0.min(x);
        self.y0 = self.y0.min(y);
        self.x1 = self.x1.max(x);
        self.y1 = self.y1.max(y);
    }

    fn centroid(&self) -> Point2<f64> {
        let n = self.count as f64;
        Point2::new(self.sx / n, self.sy / n)
    }

    fn moments(&self) -> CentralMoments {
        let n = self.count as f64;
        let c = self.centroid();
        CentralMoments {
            mu20: self.sxx / n - c.x * c.x,
            mu02: self.syy / n - c.y * c.y,
            mu11: self.sxy / n - c.x * c.y,
        }
    }

    fn bounds(&self) -> Rect {
        Rect {
            x: self.x0 as f64,
            y: self.y0 as f64,
            width: (self.x1 - self.x0 + 1) as f64,
            height: (self.y1 - self.y0 + 1) as f64,
        }
    }
}

struct Labels {
    width: i64,
    height: i64,
    data: Vec<u32>,
}

impl Labels {
    #[inline]
    fn get(&self, x: i64, y: i64) -> u32 {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return 0;
        }
        self.data[(y * self.width + x) as usize]
    }
}

/// Extract every region with at least `min_pixels` pixels.
///
/// Contours come out in raster order of their first (top-most, then
/// left-most) pixel.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(mask), fields(w = mask.width(), h = mask.height()))
)]
pub fn find_contours(mask: &GrayImage, min_pixels: usize) -> Vec<Contour> {
    let (w, h) = mask.dimensions();
    let mut labels = Labels {
        width: w as i64,
        height: h as i64,
        data: vec![0; (w as usize) * (h as usize)],
    };
    let raw = mask.as_raw();
    let set = |x: i64, y: i64| raw[(y * w as i64 + x) as usize] > 0;

    let mut contours = Vec::new();
    let mut next_label = 1u32;
    let mut queue = VecDeque::new();

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let idx = (y * w as i64 + x) as usize;
            if !set(x, y) || labels.data[idx] != 0 {
                continue;
            }

            let label = next_label;
            next_label += 1;
            labels.data[idx] = label;
            let mut stats = RegionStats::new(x as u32, y as u32);
            queue.push_back((x, y));

            while let Some((cx, cy)) = queue.pop_front() {
                stats.add(cx as u32, cy as u32);
                for (dx, dy) in NEIGHBOURS {
                    let (nx, ny) = (cx + dx, cy + dy);
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let nidx = (ny * w as i64 + nx) as usize;
                    if set(nx, ny) && labels.data[nidx] == 0 {
                        labels.data[nidx] = label;
                        queue.push_back((nx, ny));
                    }
                }
            }

            if stats.count < min_pixels.max(1) {
                continue;
            }

            let boundary = trace_boundary(&labels, label, (x, y), stats.count);
            contours.push(Contour {
                boundary,
                pixel_count: stats.count,
                bounds: stats.bounds(),
                centroid: stats.centroid(),
                moments: stats.moments(),
            });
        }
    }

    contours
}

/// Moore-neighbour tracing from the region's first raster pixel, whose west
/// neighbour is guaranteed to be outside the region.
fn trace_boundary(
    labels: &Labels,
    label: u32,
    start: (i64, i64),
    pixel_count: usize,
) -> Vec<Point2<f64>> {
    let step = |c: (i64, i64), back: (i64, i64)| -> Option<((i64, i64), (i64, i64))> {
        let from = neighbour_index(back.0 - c.0, back.1 - c.1);
        let mut prev = back;
        for k in 1..=8 {
            let (dx, dy) = NEIGHBOURS[(from + k) % 8];
            let n = (c.0 + dx, c.1 + dy);
            if labels.get(n.0, n.1) == label {
                return Some((n, prev));
            }
            prev = n;
        }
        None
    };

    let mut boundary = Vec::new();
    let mut current = start;
    let mut back = (start.0 - 1, start.1);
    let mut second = None;
    // Every boundary pixel is entered at most four times.
    let limit = 4 * pixel_count + 8;

    while boundary.len() < limit {
        let Some((next, next_back)) = step(current, back) else {
            boundary.push(current);
            break;
        };
        if current == start {
            match second {
                None => second = Some(next),
                Some(s) if s == next => break,
                Some(_) => {}
            }
        }
        boundary.push(current);
        current = next;
        back = next_back;
    }

    boundary
        .into_iter()
        .map(|(x, y)| Point2::new(x as f64, y as f64))
        .collect()
}
