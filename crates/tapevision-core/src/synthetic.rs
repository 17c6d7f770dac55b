//! Synthetic scene rendering.
//!
//! Renders lit retroreflective tape as flat-colour polygons seen through a
//! pinhole camera. Used for test fixtures, benchmarks and the test-mode
//! frame sources, where no real camera is attached.

use image::{Rgb, RgbImage};
use nalgebra::{Point2, Point3, Rotation3, Vector3};

use crate::calibration::CameraCalibration;
use crate::pose::{CameraPose, Pose2d};

/// Tape colour under a green ring light (hue ≈ 72, saturation ≈ 195).
pub const TAPE_GREEN: Rgb<u8> = Rgb([60, 255, 140]);
/// Dark field background.
pub const BACKGROUND: Rgb<u8> = Rgb([20, 20, 30]);

/// The two tilted strips of the 2019 target, in the target frame.
///
/// The convex hull of both strips is the
/// [`dual_tape_2019`](crate::TargetModel::dual_tape_2019) model quad.
pub fn dual_tape_2019_strips() -> [Vec<Point3<f64>>; 2] {
    let left = vec![
        Point3::new(-7.313, -2.662, 0.0),
        Point3::new(-5.877, -2.662, 0.0),
        Point3::new(-4.5, 2.662, 0.0),
        Point3::new(-5.936, 2.662, 0.0),
    ];
    let right = left
        .iter()
        .rev()
        .map(|p| Point3::new(-p.x, p.y, p.z))
        .collect();
    [left, right]
}

/// Solid outline of the 2020 power port target.
pub fn power_port_2020_outline(offset: f64) -> Vec<Point3<f64>> {
    crate::TargetModel::power_port_2020(offset).points().to_vec()
}

/// Camera pose that places a target at `robot` (zero pitch, no mount
/// offset): the inverse of [`robot_relative`](crate::robot_relative).
pub fn camera_pose_for(robot: &Pose2d) -> CameraPose {
    let t = Vector3::new(-robot.y, 0.0, robot.x);
    let yaw = t.x.atan2(t.z) - robot.rotation;
    let facing = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
    let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), yaw) * facing;
    CameraPose::new(rotation, t)
}

/// Project target-frame points to pixels; `None` if any is behind the camera.
pub fn project_points(
    points: &[Point3<f64>],
    calibration: &CameraCalibration,
    pose: &CameraPose,
) -> Option<Vec<Point2<f64>>> {
    points
        .iter()
        .map(|p| calibration.project(&pose.transform_point(p)))
        .collect()
}

fn contains(polygon: &[Point2<f64>], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > y) != (b.y > y) && x < (b.x - a.x) * (y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Fill pixel-space polygons (pixel centres at integer coordinates).
pub fn render_polygons(
    width: u32,
    height: u32,
    background: Rgb<u8>,
    fill: Rgb<u8>,
    polygons: &[Vec<Point2<f64>>],
) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, background);
    for poly in polygons.iter().filter(|p| p.len() >= 3) {
        let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for p in poly {
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        let xs = x0.floor().max(0.0) as u32;
        let ys = y0.floor().max(0.0) as u32;
        let xe = (x1.ceil().max(0.0) as u32).min(width.saturating_sub(1));
        let ye = (y1.ceil().max(0.0) as u32).min(height.saturating_sub(1));
        for y in ys..=ye {
            for x in xs..=xe {
                if contains(poly, x as f64, y as f64) {
                    img.put_pixel(x, y, fill);
                }
            }
        }
    }
    img
}

/// Render target-frame outlines seen from `pose`.
pub fn render_scene(
    width: u32,
    height: u32,
    calibration: &CameraCalibration,
    pose: &CameraPose,
    outlines: &[Vec<Point3<f64>>],
) -> Option<RgbImage> {
    let polygons = outlines
        .iter()
        .map(|o| project_points(o, calibration, pose))
        .collect::<Option<Vec<_>>>()?;
    Some(render_polygons(width, height, BACKGROUND, TAPE_GREEN, &polygons))
}
