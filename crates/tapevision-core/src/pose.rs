//! Camera-relative and robot-relative poses.

use nalgebra::{Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid transform from the target frame into the camera frame:
/// `p_cam = rotation * p_target + translation`.
///
/// The camera frame is x right, y down, z forward.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl CameraPose {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation * p + self.translation
    }

    /// Camera centre expressed in the target frame.
    pub fn camera_position(&self) -> Point3<f64> {
        Point3::from(-(self.rotation.inverse() * self.translation))
    }

    /// Axis-angle rotation vector (radians).
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }
}

/// Planar pose on the field: x forward, y left, rotation counter-clockwise
/// (radians).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2d {
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
}

impl Pose2d {
    pub fn new(x: f64, y: f64, rotation: f64) -> Self {
        Self { x, y, rotation }
    }

    pub fn rotation_degrees(&self) -> f64 {
        self.rotation.to_degrees()
    }

    /// `self ∘ other`: `other` expressed in `self`'s parent frame.
    pub fn compose(&self, other: &Pose2d) -> Pose2d {
        let (s, c) = self.rotation.sin_cos();
        Pose2d {
            x: self.x + c * other.x - s * other.y,
            y: self.y + s * other.x + c * other.y,
            rotation: self.rotation + other.rotation,
        }
    }
}

/// Where the camera sits on the robot, in the robot frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraMount {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub yaw_deg: f64,
}

impl CameraMount {
    pub fn as_pose(&self) -> Pose2d {
        Pose2d::new(self.x, self.y, self.yaw_deg.to_radians())
    }
}

/// Convert a camera-relative pose into a robot-relative planar pose.
///
/// Distance along the floor is the pitch-corrected optical-axis depth; the
/// lateral offset is the negated camera x; the rotation is the bearing of the
/// camera as seen from the target. The mount offset is applied last.
pub fn robot_relative(pose: &CameraPose, pitch_rad: f64, mount: &CameraMount) -> Pose2d {
    let t = pose.translation;
    let (sp, cp) = pitch_rad.sin_cos();
    let forward = t.z * cp + t.y * sp;

    let cam = pose.camera_position();
    let rotation = -cam.x.atan2(cam.z);

    mount
        .as_pose()
        .compose(&Pose2d::new(forward, -t.x, rotation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn facing() -> Rotation3<f64> {
        // target y up / z toward viewer -> camera y down / z forward
        Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
    }

    #[test]
    fn target_straight_ahead_and_to_the_right() {
        let pose = CameraPose::new(facing(), Vector3::new(10.0, 0.0, 100.0));
        let robot = robot_relative(&pose, 0.0, &CameraMount::default());
        assert_relative_eq!(robot.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(robot.y, -10.0, epsilon = 1e-9);
        assert_relative_eq!(robot.rotation_degrees(), 5.710593, epsilon = 1e-5);
    }

    #[test]
    fn pitch_projects_depth_onto_floor() {
        let pose = CameraPose::new(facing(), Vector3::new(0.0, -20.0, 100.0));
        let pitch = 15.0_f64.to_radians();
        let robot = robot_relative(&pose, pitch, &CameraMount::default());
        assert_relative_eq!(
            robot.x,
            100.0 * pitch.cos() - 20.0 * pitch.sin(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn mount_offset_is_composed_on_the_left() {
        let pose = CameraPose::new(facing(), Vector3::new(0.0, 0.0, 50.0));
        let mount = CameraMount {
            x: 5.0,
            y: 2.0,
            yaw_deg: 90.0,
        };
        let robot = robot_relative(&pose, 0.0, &mount);
        assert_relative_eq!(robot.x, 5.0, epsilon = 1e-9);
        assert_relative_eq!(robot.y, 52.0, epsilon = 1e-9);
        assert_relative_eq!(robot.rotation_degrees(), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn camera_position_inverts_transform() {
        let r = Rotation3::from_euler_angles(0.1, -0.3, 0.2);
        let pose = CameraPose::new(r, Vector3::new(1.0, 2.0, 30.0));
        let c = pose.camera_position();
        assert_relative_eq!(pose.transform_point(&c).coords.norm(), 0.0, epsilon = 1e-9);
    }
}
