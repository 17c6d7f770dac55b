//! Contour grouping: single contours or pairs meeting in a direction.

use nalgebra::{Point2, Vector2};
use tapevision_core::Contour;

use crate::settings::{ContourGrouping, IntersectionDirection};

/// One candidate target: a single contour or a pair.
#[derive(Clone, Debug)]
pub struct ContourGroup<'a> {
    pub members: Vec<&'a Contour>,
}

impl ContourGroup<'_> {
    /// Total pixel area.
    pub fn area(&self) -> f64 {
        self.members.iter().map(|c| c.area()).sum()
    }

    /// Area-weighted centroid.
    pub fn centroid(&self) -> Point2<f64> {
        mass_center(&self.members)
    }

    /// Boundary points of every member.
    pub fn points(&self) -> Vec<Point2<f64>> {
        self.members
            .iter()
            .flat_map(|c| c.boundary.iter().copied())
            .collect()
    }

    pub fn is_pair(&self) -> bool {
        self.members.len() > 1
    }
}

fn mass_center(contours: &[&Contour]) -> Point2<f64> {
    let total: f64 = contours.iter().map(|c| c.area()).sum();
    if total <= 0.0 {
        return Point2::origin();
    }
    let weighted: Vector2<f64> = contours
        .iter()
        .map(|c| c.centroid.coords * c.area())
        .sum();
    Point2::from(weighted / total)
}

/// Whether the principal axes of `a` and `b` meet on side `direction` of
/// the pair's mass centre. Parallel axes never meet; `None` accepts any pair.
pub fn intersects(a: &Contour, b: &Contour, direction: IntersectionDirection) -> bool {
    if direction == IntersectionDirection::None {
        return true;
    }

    let (da, db) = (a.principal_axis(), b.principal_axis());
    let denom = da.x * db.y - da.y * db.x;
    if denom.abs() < 1e-9 {
        return false;
    }
    let w = b.centroid - a.centroid;
    let s = (w.x * db.y - w.y * db.x) / denom;
    let hit = a.centroid + da * s;
    let center = mass_center(&[a, b]);

    // image y grows downwards
    match direction {
        IntersectionDirection::Up => hit.y < center.y,
        IntersectionDirection::Down => hit.y > center.y,
        IntersectionDirection::Left => hit.x < center.x,
        IntersectionDirection::Right => hit.x > center.x,
        IntersectionDirection::None => true,
    }
}

/// Group contours into candidates.
///
/// Dual grouping walks the contours along the pairing axis (x for
/// up/down/none, y for left/right) and pairs each unpaired contour with the
/// later unpaired contour that intersects it and lies closest along the
/// perpendicular axis, then closest along the pairing axis. Contours left
/// without a partner are dropped.
pub fn group_contours(
    contours: &[Contour],
    grouping: ContourGrouping,
    direction: IntersectionDirection,
) -> Vec<ContourGroup<'_>> {
    match grouping {
        ContourGrouping::Single => contours
            .iter()
            .map(|c| ContourGroup { members: vec![c] })
            .collect(),
        ContourGrouping::Dual => pair_contours(contours, direction),
    }
}

fn pair_contours(
    contours: &[Contour],
    direction: IntersectionDirection,
) -> Vec<ContourGroup<'_>> {
    let vertical_pairing = matches!(
        direction,
        IntersectionDirection::Left | IntersectionDirection::Right
    );
    let along = |c: &Contour| {
        if vertical_pairing {
            c.centroid.y
        } else {
            c.centroid.x
        }
    };
    let across = |c: &Contour| {
        if vertical_pairing {
            c.centroid.x
        } else {
            c.centroid.y
        }
    };

    let mut order: Vec<usize> = (0..contours.len()).collect();
    order.sort_by(|&i, &j| along(&contours[i]).total_cmp(&along(&contours[j])));

    let mut used = vec![false; contours.len()];
    let mut groups = Vec::new();

    for (rank, &i) in order.iter().enumerate() {
        if used[i] {
            continue;
        }
        let a = &contours[i];
        let partner = order[rank + 1..]
            .iter()
            .copied()
            .filter(|&j| !used[j] && intersects(a, &contours[j], direction))
            .min_by(|&j, &k| {
                let (cj, ck) = (&contours[j], &contours[k]);
                let perp_j = (across(cj) - across(a)).abs();
                let perp_k = (across(ck) - across(a)).abs();
                let gap_j = (along(cj) - along(a)).abs();
                let gap_k = (along(ck) - along(a)).abs();
                perp_j.total_cmp(&perp_k).then(gap_j.total_cmp(&gap_k))
            });

        if let Some(j) = partner {
            used[i] = true;
            used[j] = true;
            groups.push(ContourGroup {
                members: vec![a, &contours[j]],
            });
        }
    }

    log::debug!(
        "dual grouping: {} contours, {} pairs",
        contours.len(),
        groups.len()
    );
    groups
}
