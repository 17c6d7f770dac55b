//! Four-corner extraction from a candidate's outline.
//!
//! [`detect_corners`] picks four vertices of the simplified outline;
//! [`refine_corners`] then moves them to sub-pixel positions by intersecting
//! lines fitted along each side.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use nalgebra::{Point2, Vector2};
use tapevision_core::{approx_poly_dp, arc_length, convex_hull, Rect};

/// Search bands (pixels either side of the current side estimate) of the
/// successive refinement passes.
const SIDE_BANDS: [f64; 3] = [3.0, 1.5, 1.5];
/// Samples closer than this to a corner along its side are ignored; corner
/// tips are truncated by rasterization.
const SIDE_END_MARGIN: f64 = 1.5;

/// Polygon the corners of a candidate are taken from: the convex hull of
/// `points`, or `points` as a closed polygon in order.
pub fn candidate_polygon(points: &[Point2<f64>], use_convex_hull: bool) -> Vec<Point2<f64>> {
    if use_convex_hull {
        convex_hull(points)
    } else {
        points.to_vec()
    }
}

/// Extract `[bottom-left, bottom-right, top-right, top-left]` corners from a
/// closed polygon.
///
/// The polygon is simplified with a Douglas–Peucker tolerance of
/// `accuracy_percentage / 600` of its perimeter.
///
/// Top corners are the simplified vertices nearest the bounding box's top
/// corners. Bottom corners are, among the other vertices below the box
/// centre, the ones farthest from the centre on either side of their mean x.
/// Returns `None` when fewer than four vertices survive or a side is empty.
pub fn detect_corners(
    polygon: &[Point2<f64>],
    accuracy_percentage: f64,
) -> Option<[Point2<f64>; 4]> {
    if polygon.len() < 4 {
        return None;
    }

    let epsilon = accuracy_percentage.max(0.0) / 600.0 * arc_length(polygon);
    let simplified = approx_poly_dp(polygon, epsilon);
    if simplified.len() < 4 {
        return None;
    }

    let bounds = Rect::bounding(polygon)?;
    let nearest = |target: Point2<f64>| {
        simplified
            .iter()
            .enumerate()
            .min_by(|a, b| {
                (a.1 - target)
                    .norm_squared()
                    .total_cmp(&(b.1 - target).norm_squared())
            })
            .map(|(i, _)| i)
    };
    let tl = nearest(bounds.top_left())?;
    let tr = nearest(bounds.top_right())?;
    if tl == tr {
        return None;
    }

    let center = bounds.center();
    let below: Vec<Point2<f64>> = simplified
        .iter()
        .enumerate()
        .filter(|&(i, p)| i != tl && i != tr && p.y > center.y)
        .map(|(_, p)| *p)
        .collect();
    if below.len() < 2 {
        return None;
    }
    let mean_x = below.iter().map(|p| p.x).sum::<f64>() / below.len() as f64;

    let farthest = |left: bool| {
        below
            .iter()
            .filter(|p| (p.x < mean_x) == left)
            .max_by(|a, b| {
                (*a - center)
                    .norm_squared()
                    .total_cmp(&(*b - center).norm_squared())
            })
            .copied()
    };
    let bl = farthest(true)?;
    let br = farthest(false)?;

    Some([bl, br, simplified[tr], simplified[tl]])
}

/// Sub-pixel corners from the region pixels along each side of `corners`.
///
/// For every side, the outermost boundary pixel of each scan line (columns
/// for shallow sides, rows for steep ones) within a band around the side is
/// kept, and a total-least-squares line is fitted through them. Boundary
/// pixel centres lie on average half a scan step inside the true edge, so
/// the line is pushed out by that much before adjacent sides are
/// intersected. Three passes narrow the band.
///
/// Returns `None` when a side has fewer than two samples, adjacent sides
/// are parallel, or a corner would move by more than a quarter of the
/// shortest side; callers keep the coarse corners then.
pub fn refine_corners(
    corners: &[Point2<f64>; 4],
    boundary: &[Point2<f64>],
) -> Option<[Point2<f64>; 4]> {
    let shortest = (0..4)
        .map(|k| (corners[(k + 1) % 4] - corners[k]).norm())
        .fold(f64::INFINITY, f64::min);
    let max_shift = shortest / 4.0;

    let mut current = *corners;
    for band in SIDE_BANDS {
        let centre = Point2::from(current.iter().map(|p| p.coords).sum::<Vector2<f64>>() / 4.0);
        let mut sides = [SideLine::default(); 4];
        for (k, side) in sides.iter_mut().enumerate() {
            *side = fit_side(current[k], current[(k + 1) % 4], centre, boundary, band)?;
        }
        for (k, corner) in current.iter_mut().enumerate() {
            *corner = sides[(k + 3) % 4].intersect(&sides[k])?;
        }
    }

    let moved = current
        .iter()
        .zip(corners)
        .all(|(a, b)| (a - b).norm() <= max_shift);
    moved.then_some(current)
}

#[derive(Clone, Copy, Debug, Default)]
struct SideLine {
    point: Point2<f64>,
    direction: Vector2<f64>,
}

impl SideLine {
    fn intersect(&self, other: &SideLine) -> Option<Point2<f64>> {
        let (u, v) = (self.direction, other.direction);
        let denom = u.x * v.y - u.y * v.x;
        if denom.abs() < 1e-9 {
            return None;
        }
        let w = other.point - self.point;
        let s = (w.x * v.y - w.y * v.x) / denom;
        Some(self.point + u * s)
    }
}

fn fit_side(
    a: Point2<f64>,
    b: Point2<f64>,
    centre: Point2<f64>,
    boundary: &[Point2<f64>],
    band: f64,
) -> Option<SideLine> {
    let along = b - a;
    let len = along.norm();
    if len < 1e-9 {
        return None;
    }
    let d = along / len;
    let mut outward = Vector2::new(-d.y, d.x);
    if (centre - a).dot(&outward) > 0.0 {
        outward = -outward;
    }
    let by_column = d.x.abs() >= d.y.abs();

    // outermost sample per scan line, keyed by its column or row
    let mut outermost: BTreeMap<i64, (f64, Point2<f64>)> = BTreeMap::new();
    for p in boundary {
        let v = p - a;
        let (t, s) = (v.dot(&d), v.dot(&outward));
        if t < SIDE_END_MARGIN || t > len - SIDE_END_MARGIN || s.abs() > band {
            continue;
        }
        let key = if by_column { p.x } else { p.y }.round() as i64;
        match outermost.entry(key) {
            Entry::Vacant(e) => {
                e.insert((s, *p));
            }
            Entry::Occupied(mut e) => {
                if s > e.get().0 {
                    e.insert((s, *p));
                }
            }
        }
    }
    if outermost.len() < 2 {
        return None;
    }

    let n = outermost.len() as f64;
    let mean = outermost.values().map(|(_, p)| p.coords).sum::<Vector2<f64>>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (_, p) in outermost.values() {
        let q = p.coords - mean;
        sxx += q.x * q.x;
        syy += q.y * q.y;
        sxy += q.x * q.y;
    }
    let angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let direction = Vector2::new(angle.cos(), angle.sin());
    let mut normal = Vector2::new(-direction.y, direction.x);
    if normal.dot(&outward) < 0.0 {
        normal = -normal;
    }
    let inset = 0.5 * normal.x.abs().max(normal.y.abs());

    Some(SideLine {
        point: Point2::from(mean + normal * inset),
        direction,
    })
}
