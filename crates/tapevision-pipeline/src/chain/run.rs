use std::time::Instant;

use image::RgbImage;
use tapevision_core::{CameraCalibration, FrameBuffer, FrameImage, TargetModel};

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::contours::contour_stage;
use super::corners::{candidate_polygon, detect_corners, refine_corners};
use super::grouping::{group_contours, ContourGroup};
use super::solve::solve_stage;
use super::threshold::threshold_stage;
use super::{PipelineError, PipelineResult};
use crate::settings::{OutputMode, PipelineKind, PipelineSettings, ReflectiveParams};
use crate::target::TrackedTarget;

/// Run one pipeline over `input`.
///
/// The input handle is only borrowed; the result holds its own handle to
/// whichever frame it outputs. Any intermediate buffer not carried by the
/// result is released before returning. `calibration` is the camera's
/// calibration if one was loaded; without it targets carry no pose.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(input, settings, calibration), fields(pipeline = %settings.nickname))
)]
pub fn run_pipeline(
    input: &FrameBuffer,
    settings: &PipelineSettings,
    calibration: Option<&CameraCalibration>,
    sequence: u64,
) -> Result<PipelineResult, PipelineError> {
    let started = Instant::now();
    let image = input.image().ok_or(PipelineError::ReleasedFrame)?;
    if image.is_empty() {
        return Err(PipelineError::EmptyFrame);
    }

    let (targets, output) = match &settings.kind {
        PipelineKind::Driver => (Vec::new(), input.clone()),
        PipelineKind::Reflective(params) => {
            let rgb = image.as_rgb().ok_or(PipelineError::NotRgb)?;
            let (targets, mask) = run_reflective(rgb, params, calibration)?;
            let output = match params.output_mode {
                OutputMode::Input => input.clone(),
                OutputMode::Thresholded => mask,
            };
            (targets, output)
        }
    };

    Ok(PipelineResult {
        targets,
        output,
        latency: started.elapsed(),
        sequence,
    })
}

fn run_reflective(
    rgb: &RgbImage,
    params: &ReflectiveParams,
    calibration: Option<&CameraCalibration>,
) -> Result<(Vec<TrackedTarget>, FrameBuffer), PipelineError> {
    let model = if params.solve_pnp_enabled {
        Some(params.target_model.build()?)
    } else {
        None
    };
    if params.solve_pnp_enabled && calibration.is_none() {
        log::debug!("pose estimation enabled but no calibration loaded");
    }

    let mask = threshold_stage(rgb, &params.hsv);
    let targets = match mask.image().and_then(FrameImage::as_mask) {
        Some(mask_img) => {
            let contours = contour_stage(mask_img, &params.filter);
            let mut groups = group_contours(&contours, params.grouping, params.intersection);
            groups.sort_by(|a, b| b.area().total_cmp(&a.area()));

            let image_area = (rgb.width() as f64) * (rgb.height() as f64);
            let mut targets: Vec<TrackedTarget> = groups
                .iter()
                .filter_map(|g| build_target(g, params, model.as_ref(), calibration, image_area))
                .collect();
            log::debug!("{} candidates, {} targets", groups.len(), targets.len());
            if !params.output_show_multiple {
                targets.truncate(1);
            }
            targets
        }
        None => Vec::new(),
    };

    Ok((targets, mask))
}

fn build_target(
    group: &ContourGroup<'_>,
    params: &ReflectiveParams,
    model: Option<&TargetModel>,
    calibration: Option<&CameraCalibration>,
    image_area: f64,
) -> Option<TrackedTarget> {
    let use_hull = params.corners.use_convex_hulls || group.is_pair();
    let boundary = group.points();
    let outline = candidate_polygon(&boundary, use_hull);
    let corners = detect_corners(&outline, params.corners.accuracy_percentage)
        .map(|coarse| refine_corners(&coarse, &boundary).unwrap_or(coarse));

    let (camera_pose, robot_pose) = match (model, calibration) {
        (Some(model), Some(calibration)) => {
            let (camera, robot) = solve_stage(
                &corners?,
                model,
                calibration,
                params.camera_pitch_deg,
                &params.mount,
            )?;
            (Some(camera), Some(robot))
        }
        _ => (None, None),
    };

    let area = group.area();
    Some(TrackedTarget::new(
        area,
        100.0 * area / image_area,
        group.centroid(),
        group.members.len(),
        outline,
        corners,
        camera_pose,
        robot_pose,
    ))
}
