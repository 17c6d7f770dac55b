//! Core types for retroreflective target tracking.
//!
//! This crate holds everything a single pipeline run needs that is not tied
//! to pipeline configuration: reference-counted frame buffers, colour
//! thresholding, contour extraction and polygon geometry, camera
//! calibration, target models, and the pose solver with its robot-frame
//! transform. It does no I/O besides calibration JSON and spawns no threads.

mod calibration;
mod contour;
mod frame;
mod frame_image;
mod geometry;
mod homography;
mod logger;
mod pnp;
mod pose;
mod target_model;
mod threshold;

pub mod synthetic;

pub use calibration::{CalibrationError, CalibrationFile, CameraCalibration, Distortion, JsonMat};
pub use contour::{find_contours, CentralMoments, Contour};
pub use frame::{frame_audit, FrameAudit, FrameBuffer};
pub use geometry::{
    approx_poly_dp, arc_length, convex_hull, min_area_rect, polygon_area, Rect, RotatedRect,
};
pub use frame_image::FrameImage;
pub use homography::{estimate_homography, Homography};
pub use pnp::{reprojection_rms, solve_pnp};
pub use pose::{robot_relative, CameraMount, CameraPose, Pose2d};
pub use target_model::{TargetModel, TargetModelError, TargetModelKind};
pub use threshold::{rgb_to_hsv, threshold_hsv, ChannelRange, HsvThreshold, HUE_MAX};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
