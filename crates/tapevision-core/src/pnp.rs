//! Perspective-n-point pose estimation.
//!
//! The solver works in normalized image coordinates:
//! 1. image points are undistorted through the calibration,
//! 2. a plane is fitted to the model and a homography from plane coordinates
//!    to the normalized points seeds rotation and translation,
//! 3. Levenberg–Marquardt refines the six pose parameters on the
//!    reprojection residuals.
//!
//! Any failure (bad correspondence count, degenerate geometry, non-finite
//! values, points behind the camera) yields `None`.

use nalgebra::{Matrix3, Matrix6, Point2, Point3, Rotation3, Vector3, Vector6};

use crate::calibration::CameraCalibration;
use crate::homography::estimate_homography;
use crate::pose::CameraPose;
use crate::target_model::TargetModel;

#[cfg(feature = "tracing")]
use tracing::instrument;

const MAX_ITERS: usize = 50;
const MAX_DAMPING_TRIES: usize = 12;

/// Solve for the target-to-camera transform.
///
/// `image_points[i]` corresponds to `model.points()[i]`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(n = image_points.len()))
)]
pub fn solve_pnp(
    model: &TargetModel,
    image_points: &[Point2<f64>],
    calibration: &CameraCalibration,
) -> Option<CameraPose> {
    let object = model.points();
    if image_points.len() != object.len() || object.len() < 4 {
        return None;
    }

    let normalized: Vec<Point2<f64>> = image_points
        .iter()
        .map(|&p| calibration.normalize(p))
        .collect::<Option<_>>()?;

    let (rotation, translation) = initial_estimate(object, &normalized)?;
    let (rotation, translation) = refine(object, &normalized, rotation, translation);

    let pose = CameraPose::new(rotation, translation);
    let valid = translation.iter().all(|v| v.is_finite())
        && rotation.matrix().iter().all(|v| v.is_finite())
        && object.iter().all(|p| pose.transform_point(p).z > 0.0);
    valid.then_some(pose)
}

/// Root-mean-square reprojection error in pixels.
pub fn reprojection_rms(
    model: &TargetModel,
    image_points: &[Point2<f64>],
    calibration: &CameraCalibration,
    pose: &CameraPose,
) -> Option<f64> {
    if image_points.len() != model.len() || model.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    for (p, obs) in model.points().iter().zip(image_points) {
        let proj = calibration.project(&pose.transform_point(p))?;
        sum += (proj - obs).norm_squared();
    }
    Some((sum / model.len() as f64).sqrt())
}

/// Orthonormal in-plane basis (rows `e1`, `e2`, `e1 × e2`) and centroid of
/// the model's best-fit plane.
fn fit_plane(object: &[Point3<f64>]) -> Option<(Matrix3<f64>, Point3<f64>)> {
    let n = object.len() as f64;
    let centroid = Point3::from(object.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n);
    let mut cov = Matrix3::zeros();
    for p in object {
        let d = p - centroid;
        cov += d * d.transpose();
    }

    let eig = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    if eig.eigenvalues[order[1]] <= 1e-12 {
        // collinear model
        return None;
    }
    let e1: Vector3<f64> = eig.eigenvectors.column(order[0]).into_owned();
    let e2: Vector3<f64> = eig.eigenvectors.column(order[1]).into_owned();
    let e3 = e1.cross(&e2);
    Some((Matrix3::from_rows(&[e1.transpose(), e2.transpose(), e3.transpose()]), centroid))
}

fn nearest_rotation(m: &Matrix3<f64>) -> Option<Rotation3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }
    Some(Rotation3::from_matrix_unchecked(r))
}

fn initial_estimate(
    object: &[Point3<f64>],
    normalized: &[Point2<f64>],
) -> Option<(Rotation3<f64>, Vector3<f64>)> {
    let (basis, centroid) = fit_plane(object)?;
    let plane: Vec<Point2<f64>> = object
        .iter()
        .map(|p| {
            let q = basis * (p - centroid);
            Point2::new(q.x, q.y)
        })
        .collect();

    let h = estimate_homography(&plane, normalized)?.h;
    let (h1, h2, h3) = (h.column(0), h.column(1), h.column(2));
    let norm = h1.norm() + h2.norm();
    if norm < 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / norm;
    if lambda * h3[2] < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let t = h3 * lambda;
    let r3 = r1.cross(&r2);
    let plane_rotation = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;

    let rotation = Rotation3::from_matrix_unchecked(plane_rotation.matrix() * basis);
    let translation = t - rotation * centroid.coords;
    Some((rotation, translation))
}

fn residuals(
    object: &[Point3<f64>],
    normalized: &[Point2<f64>],
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
    out: &mut Vec<f64>,
) -> Option<f64> {
    out.clear();
    let mut cost = 0.0;
    for (p, obs) in object.iter().zip(normalized) {
        let c = rotation * p + translation;
        if c.z <= 1e-9 {
            return None;
        }
        let (rx, ry) = (c.x / c.z - obs.x, c.y / c.z - obs.y);
        out.push(rx);
        out.push(ry);
        cost += rx * rx + ry * ry;
    }
    cost.is_finite().then_some(cost)
}

fn perturbed(
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
    delta: &Vector6<f64>,
) -> (Rotation3<f64>, Vector3<f64>) {
    let dw = Vector3::new(delta[0], delta[1], delta[2]);
    let dt = Vector3::new(delta[3], delta[4], delta[5]);
    (Rotation3::new(dw) * rotation, translation + dt)
}

fn refine(
    object: &[Point3<f64>],
    normalized: &[Point2<f64>],
    mut rotation: Rotation3<f64>,
    mut translation: Vector3<f64>,
) -> (Rotation3<f64>, Vector3<f64>) {
    let mut res = Vec::with_capacity(2 * object.len());
    let Some(mut cost) = residuals(object, normalized, &rotation, &translation, &mut res) else {
        return (rotation, translation);
    };

    let mut damping = 1e-3;
    let mut plus = Vec::with_capacity(res.len());
    let mut minus = Vec::with_capacity(res.len());
    let mut scratch = Vec::with_capacity(res.len());

    for _ in 0..MAX_ITERS {
        if cost < 1e-24 {
            break;
        }

        // Central-difference Jacobian, one column per parameter.
        let mut jac = vec![vec![0.0; res.len()]; 6];
        for (k, col) in jac.iter_mut().enumerate() {
            let h = if k < 3 {
                1e-7
            } else {
                1e-7 * (1.0 + translation.norm())
            };
            let mut d = Vector6::zeros();
            d[k] = h;
            let (rp, tp) = perturbed(&rotation, &translation, &d);
            let (rm, tm) = perturbed(&rotation, &translation, &(-d));
            if residuals(object, normalized, &rp, &tp, &mut plus).is_none()
                || residuals(object, normalized, &rm, &tm, &mut minus).is_none()
            {
                return (rotation, translation);
            }
            for (j, v) in col.iter_mut().enumerate() {
                *v = (plus[j] - minus[j]) / (2.0 * h);
            }
        }

        let mut jtj = Matrix6::zeros();
        let mut jtr = Vector6::zeros();
        for a in 0..6 {
            jtr[a] = jac[a].iter().zip(&res).map(|(j, r)| j * r).sum();
            for b in a..6 {
                let v: f64 = jac[a].iter().zip(&jac[b]).map(|(x, y)| x * y).sum();
                jtj[(a, b)] = v;
                jtj[(b, a)] = v;
            }
        }

        let mut improved = false;
        let mut step_norm = 0.0;
        for _ in 0..MAX_DAMPING_TRIES {
            let mut a = jtj;
            for k in 0..6 {
                a[(k, k)] += damping * (1.0 + jtj[(k, k)]);
            }
            let Some(delta) = a.cholesky().map(|c| c.solve(&(-jtr))) else {
                damping *= 10.0;
                continue;
            };
            let (r_new, t_new) = perturbed(&rotation, &translation, &delta);
            match residuals(object, normalized, &r_new, &t_new, &mut scratch) {
                Some(new_cost) if new_cost < cost => {
                    rotation = r_new;
                    translation = t_new;
                    cost = new_cost;
                    std::mem::swap(&mut res, &mut scratch);
                    damping = (damping / 10.0).max(1e-12);
                    step_norm = delta.norm();
                    improved = true;
                    break;
                }
                _ => damping *= 10.0,
            }
        }

        if !improved || step_norm < 1e-12 {
            break;
        }
    }

    (rotation, translation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Distortion;
    use approx::assert_relative_eq;

    fn facing() -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
    }

    fn project_all(
        model: &TargetModel,
        cal: &CameraCalibration,
        pose: &CameraPose,
    ) -> Vec<Point2<f64>> {
        model
            .points()
            .iter()
            .map(|p| cal.project(&pose.transform_point(p)).expect("visible"))
            .collect()
    }

    fn assert_pose_close(a: &CameraPose, b: &CameraPose) {
        assert_relative_eq!(a.translation, b.translation, epsilon = 1e-6);
        assert_relative_eq!(*a.rotation.matrix(), *b.rotation.matrix(), epsilon = 1e-6);
    }

    #[test]
    fn recovers_pose_of_tilted_rectangle() {
        let cal = CameraCalibration::pinhole(600.0, 600.0, 320.0, 240.0).expect("cal");
        let model = TargetModel::rectangle(20.0, 10.0).expect("model");
        let truth = CameraPose::new(
            Rotation3::from_euler_angles(0.1, 0.4, -0.05) * facing(),
            Vector3::new(-8.0, 3.0, 120.0),
        );
        let pts = project_all(&model, &cal, &truth);

        let est = solve_pnp(&model, &pts, &cal).expect("solve");
        assert_pose_close(&est, &truth);
        let rms = reprojection_rms(&model, &pts, &cal, &est).expect("rms");
        assert!(rms < 1e-6, "rms {rms}");
    }

    #[test]
    fn handles_offset_plane_and_distortion() {
        let cal = CameraCalibration::new(
            Matrix3::new(700.0, 0.0, 330.0, 0.0, 690.0, 235.0, 0.0, 0.0, 1.0),
            Distortion::from_array([0.08, -0.2, 0.001, -0.0005, 0.1]),
        )
        .expect("cal");
        let model = TargetModel::power_port_2020(36.0);
        let truth = CameraPose::new(
            Rotation3::from_axis_angle(&Vector3::y_axis(), 0.5) * facing(),
            Vector3::new(-40.0, 10.0, 250.0),
        );
        let pts = project_all(&model, &cal, &truth);

        let est = solve_pnp(&model, &pts, &cal).expect("solve");
        assert_pose_close(&est, &truth);
    }

    #[test]
    fn refinement_absorbs_pixel_noise() {
        let cal = CameraCalibration::pinhole(600.0, 600.0, 320.0, 240.0).expect("cal");
        let model = TargetModel::new(vec![
            Point3::new(-10.0, -5.0, 0.0),
            Point3::new(10.0, -5.0, 0.0),
            Point3::new(10.0, 5.0, 0.0),
            Point3::new(-10.0, 5.0, 0.0),
            Point3::new(0.0, 8.0, 0.0),
            Point3::new(0.0, -8.0, 0.0),
        ])
        .expect("model");
        let truth = CameraPose::new(facing(), Vector3::new(2.0, -1.0, 80.0));
        let mut pts = project_all(&model, &cal, &truth);
        for (i, p) in pts.iter_mut().enumerate() {
            let s = if i % 2 == 0 { 0.2 } else { -0.2 };
            p.x += s;
            p.y -= s;
        }

        let est = solve_pnp(&model, &pts, &cal).expect("solve");
        assert!((est.translation - truth.translation).norm() < 0.5);
    }

    #[test]
    fn rejects_bad_correspondences() {
        let cal = CameraCalibration::pinhole(600.0, 600.0, 320.0, 240.0).expect("cal");
        let model = TargetModel::dual_tape_2019();
        let three = [Point2::new(0.0, 0.0); 3];
        assert!(solve_pnp(&model, &three, &cal).is_none());

        let collapsed = [Point2::new(100.0, 100.0); 4];
        assert!(solve_pnp(&model, &collapsed, &cal).is_none());
    }
}
