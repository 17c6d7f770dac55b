//! The per-frame stage chain.
//!
//! Stages run in a fixed order: threshold, contour extraction, grouping,
//! corner detection, pose solve and the robot-relative transform. The chain
//! borrows its settings for the duration of one run only, so a settings swap
//! between runs can never affect a run in flight.

mod contours;
mod corners;
mod error;
mod grouping;
mod result;
mod run;
mod solve;
mod threshold;

pub use corners::{candidate_polygon, detect_corners, refine_corners};
pub use error::PipelineError;
pub use grouping::{group_contours, intersects, ContourGroup};
pub use result::PipelineResult;
pub use run::run_pipeline;
