use nalgebra::Point2;
use tapevision_core::{
    robot_relative, solve_pnp, CameraCalibration, CameraMount, CameraPose, Pose2d, TargetModel,
};

/// Camera- and robot-relative pose of one candidate, or `None` if the
/// solver fails.
pub(super) fn solve_stage(
    corners: &[Point2<f64>; 4],
    model: &TargetModel,
    calibration: &CameraCalibration,
    camera_pitch_deg: f64,
    mount: &CameraMount,
) -> Option<(CameraPose, Pose2d)> {
    let Some(camera) = solve_pnp(model, corners, calibration) else {
        log::trace!("pose solve failed for corners {corners:?}");
        return None;
    };
    let robot = robot_relative(&camera, camera_pitch_deg.to_radians(), mount);
    Some((camera, robot))
}
