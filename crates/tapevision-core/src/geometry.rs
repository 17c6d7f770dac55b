//! Planar polygon helpers: convex hull, perimeter, Douglas–Peucker
//! simplification and the minimum-area enclosing rectangle.
//!
//! All points are in image pixel coordinates (x right, y down).

use nalgebra::{Point2, Vector2};

/// Axis-aligned box in image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Tightest box containing `points`, or `None` if empty.
    pub fn bounding(points: &[Point2<f64>]) -> Option<Self> {
        let first = points.first()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn top_left(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    pub fn top_right(&self) -> Point2<f64> {
        Point2::new(self.x + self.width, self.y)
    }
}

/// Rotated rectangle, as produced by [`min_area_rect`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotatedRect {
    pub center: Point2<f64>,
    pub width: f64,
    pub height: f64,
    /// Direction of the `width` side, radians.
    pub angle: f64,
}

impl RotatedRect {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[inline]
fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull by Andrew's monotone chain. Collinear points are dropped.
pub fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts: Vec<Point2<f64>> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(2 * pts.len());
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Perimeter of a closed polygon.
pub fn arc_length(polygon: &[Point2<f64>]) -> f64 {
    if polygon.len() < 2 {
        return 0.0;
    }
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(a, b)| (b - a).norm())
        .sum()
}

/// Shoelace area of a closed polygon (absolute value).
pub fn polygon_area(polygon: &[Point2<f64>]) -> f64 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let twice: f64 = polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

fn segment_distance(p: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 < 1e-18 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

fn farthest_from(points: &[Point2<f64>], from: usize) -> usize {
    let origin = points[from];
    let mut best = from;
    let mut best_d = -1.0;
    for (i, p) in points.iter().enumerate() {
        let d = (p - origin).norm_squared();
        if d > best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

fn simplify_chain(points: &[Point2<f64>], chain: &[usize], epsilon: f64, keep: &mut [bool]) {
    if chain.len() < 3 {
        return;
    }
    let a = points[chain[0]];
    let b = points[chain[chain.len() - 1]];
    let mut split = 0;
    let mut max_d = 0.0;
    for (k, &idx) in chain.iter().enumerate().take(chain.len() - 1).skip(1) {
        let d = segment_distance(points[idx], a, b);
        if d > max_d {
            max_d = d;
            split = k;
        }
    }
    if max_d > epsilon {
        keep[chain[split]] = true;
        simplify_chain(points, &chain[..=split], epsilon, keep);
        simplify_chain(points, &chain[split..], epsilon, keep);
    }
}

/// Douglas–Peucker simplification of a closed polygon.
///
/// The polygon is split at its two mutually farthest vertices and each half
/// is simplified with tolerance `epsilon` (pixels). Vertex order is kept.
pub fn approx_poly_dp(polygon: &[Point2<f64>], epsilon: f64) -> Vec<Point2<f64>> {
    let n = polygon.len();
    if n < 3 {
        return polygon.to_vec();
    }
    let a = farthest_from(polygon, 0);
    let b = farthest_from(polygon, a);
    let (i, j) = (a.min(b), a.max(b));
    if i == j {
        return vec![polygon[i]];
    }

    let mut keep = vec![false; n];
    keep[i] = true;
    keep[j] = true;
    let first: Vec<usize> = (i..=j).collect();
    let second: Vec<usize> = (j..n).chain(0..=i).collect();
    simplify_chain(polygon, &first, epsilon, &mut keep);
    simplify_chain(polygon, &second, epsilon, &mut keep);

    (0..n).filter(|&k| keep[k]).map(|k| polygon[k]).collect()
}

/// Minimum-area enclosing rectangle via rotating calipers over the hull.
pub fn min_area_rect(points: &[Point2<f64>]) -> Option<RotatedRect> {
    let hull = convex_hull(points);
    match hull.len() {
        0 => return None,
        1 => {
            return Some(RotatedRect {
                center: hull[0],
                width: 0.0,
                height: 0.0,
                angle: 0.0,
            })
        }
        _ => {}
    }

    let mut best: Option<(f64, RotatedRect)> = None;
    for k in 0..hull.len() {
        let edge = hull[(k + 1) % hull.len()] - hull[k];
        let len = edge.norm();
        if len < 1e-12 {
            continue;
        }
        let u = edge / len;
        let v = Vector2::new(-u.y, u.x);

        let (mut u0, mut u1, mut v0, mut v1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for p in &hull {
            let d = p.coords;
            let pu = d.dot(&u);
            let pv = d.dot(&v);
            u0 = u0.min(pu);
            u1 = u1.max(pu);
            v0 = v0.min(pv);
            v1 = v1.max(pv);
        }
        let area = (u1 - u0) * (v1 - v0);
        if best.as_ref().is_none_or(|(a, _)| area < *a) {
            let c = u * ((u0 + u1) / 2.0) + v * ((v0 + v1) / 2.0);
            best = Some((
                area,
                RotatedRect {
                    center: Point2::from(c),
                    width: u1 - u0,
                    height: v1 - v0,
                    angle: u.y.atan2(u.x),
                },
            ));
        }
    }
    best.map(|(_, r)| r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64) -> Point2<f64> {
        Point2::new(x, y)
    }

    #[test]
    fn hull_drops_interior_and_collinear_points() {
        let pts = [
            p(0.0, 0.0),
            p(2.0, 0.0),
            p(4.0, 0.0),
            p(4.0, 4.0),
            p(0.0, 4.0),
            p(2.0, 2.0),
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!(!hull.contains(&p(2.0, 2.0)));
        assert!(!hull.contains(&p(2.0, 0.0)));
        assert_relative_eq!(polygon_area(&hull), 16.0);
        assert_relative_eq!(arc_length(&hull), 16.0);
    }

    #[test]
    fn simplification_keeps_square_corners() {
        let mut square = Vec::new();
        for i in 0..10 {
            square.push(p(i as f64, 0.0));
        }
        for i in 0..10 {
            square.push(p(10.0, i as f64));
        }
        for i in 0..10 {
            square.push(p(10.0 - i as f64, 10.0));
        }
        for i in 0..10 {
            square.push(p(0.0, 10.0 - i as f64));
        }
        let simplified = approx_poly_dp(&square, 0.5);
        assert_eq!(simplified.len(), 4);
        for corner in [p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0), p(0.0, 10.0)] {
            assert!(simplified.contains(&corner), "missing {corner:?}");
        }
    }

    #[test]
    fn larger_tolerance_gives_fewer_vertices() {
        let octagon: Vec<_> = (0..8)
            .map(|k| {
                let a = k as f64 * std::f64::consts::FRAC_PI_4;
                p(50.0 * a.cos(), 50.0 * a.sin())
            })
            .collect();
        let fine = approx_poly_dp(&octagon, 1.0);
        let coarse = approx_poly_dp(&octagon, 20.0);
        assert_eq!(fine.len(), 8);
        assert!(coarse.len() < fine.len());
    }

    #[test]
    fn min_area_rect_of_rotated_square() {
        let a = 0.3_f64;
        let (c, s) = (a.cos(), a.sin());
        let pts: Vec<_> = [(-5.0, -2.0), (5.0, -2.0), (5.0, 2.0), (-5.0, 2.0)]
            .iter()
            .map(|&(x, y)| p(100.0 + c * x - s * y, 50.0 + s * x + c * y))
            .collect();
        let r = min_area_rect(&pts).expect("rect");
        assert_relative_eq!(r.area(), 40.0, epsilon = 1e-9);
        assert_relative_eq!(r.center.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(r.center.y, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn bounding_rect_corners() {
        let r = Rect::bounding(&[p(3.0, 4.0), p(7.0, 1.0), p(5.0, 9.0)]).expect("rect");
        assert_eq!(r.top_left(), p(3.0, 1.0));
        assert_eq!(r.top_right(), p(7.0, 1.0));
        assert_eq!(r.center(), p(5.0, 5.0));
        assert!(Rect::bounding(&[]).is_none());
    }
}
