use nalgebra::Point2;
use tapevision_core::{CameraPose, Pose2d};

/// One detected target in one frame. Immutable after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedTarget {
    area: f64,
    area_percent: f64,
    centroid: Point2<f64>,
    contour_count: usize,
    outline: Vec<Point2<f64>>,
    corners: Option<[Point2<f64>; 4]>,
    camera_pose: Option<CameraPose>,
    robot_pose: Option<Pose2d>,
}

impl TrackedTarget {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        area: f64,
        area_percent: f64,
        centroid: Point2<f64>,
        contour_count: usize,
        outline: Vec<Point2<f64>>,
        corners: Option<[Point2<f64>; 4]>,
        camera_pose: Option<CameraPose>,
        robot_pose: Option<Pose2d>,
    ) -> Self {
        Self {
            area,
            area_percent,
            centroid,
            contour_count,
            outline,
            corners,
            camera_pose,
            robot_pose,
        }
    }

    /// Pixel area of all source contours.
    pub fn area(&self) -> f64 {
        self.area
    }

    /// Area as a percentage of the frame.
    pub fn area_percent(&self) -> f64 {
        self.area_percent
    }

    pub fn centroid(&self) -> Point2<f64> {
        self.centroid
    }

    /// Number of contours grouped into this target (1 or 2).
    pub fn contour_count(&self) -> usize {
        self.contour_count
    }

    /// Convex hull (or raw boundary) the corners were taken from.
    pub fn outline(&self) -> &[Point2<f64>] {
        &self.outline
    }

    /// `[bottom-left, bottom-right, top-right, top-left]` in pixels.
    pub fn corners(&self) -> Option<&[Point2<f64>; 4]> {
        self.corners.as_ref()
    }

    pub fn camera_pose(&self) -> Option<&CameraPose> {
        self.camera_pose.as_ref()
    }

    pub fn robot_pose(&self) -> Option<&Pose2d> {
        self.robot_pose.as_ref()
    }
}
