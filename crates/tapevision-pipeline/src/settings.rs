//! Pipeline settings.
//!
//! A camera owns an ordered list of named [`PipelineSettings`]. Each one is a
//! tagged [`PipelineKind`]: the reflective-tape chain with its parameter
//! bundle, or the driver pipeline that passes frames through untouched.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tapevision_core::{CameraMount, HsvThreshold, TargetModelKind};

#[derive(thiserror::Error, Debug)]
pub enum SettingsIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Closed interval of `f64`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloatRange {
    pub min: f64,
    pub max: f64,
}

impl FloatRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, v: f64) -> bool {
        self.min <= v && v <= self.max
    }
}

/// Shape filter applied to every extracted contour.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourFilter {
    /// Pixel area as a percentage of the image.
    pub area: FloatRange,
    /// Bounding-box width over height.
    pub ratio: FloatRange,
    /// Pixel area over minimum-area-rectangle area, in percent.
    pub fullness: FloatRange,
    /// Regions with fewer pixels are discarded before any other test.
    pub min_pixels: usize,
}

impl Default for ContourFilter {
    fn default() -> Self {
        Self {
            area: FloatRange::new(0.0, 100.0),
            ratio: FloatRange::new(0.0, 20.0),
            fullness: FloatRange::new(0.0, 100.0),
            min_pixels: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContourGrouping {
    #[default]
    Single,
    Dual,
}

/// Side of a contour pair on which the principal axes must meet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntersectionDirection {
    #[default]
    None,
    Up,
    Down,
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerDetection {
    /// Simplify the convex hull instead of the raw boundary.
    pub use_convex_hulls: bool,
    /// Simplification tolerance, percent of perimeter scaled by 1/6.
    pub accuracy_percentage: f64,
}

impl Default for CornerDetection {
    fn default() -> Self {
        Self {
            use_convex_hulls: true,
            accuracy_percentage: 10.0,
        }
    }
}

/// Which image the result carries as its output frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Input,
    Thresholded,
}

/// Parameters of the reflective-tape stage chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectiveParams {
    pub hsv: HsvThreshold,
    pub filter: ContourFilter,
    pub grouping: ContourGrouping,
    pub intersection: IntersectionDirection,
    pub corners: CornerDetection,
    pub target_model: TargetModelKind,
    pub solve_pnp_enabled: bool,
    /// Camera pitch above horizontal, degrees.
    pub camera_pitch_deg: f64,
    pub mount: CameraMount,
    /// Keep every target instead of only the largest.
    pub output_show_multiple: bool,
    pub output_mode: OutputMode,
}

impl Default for ReflectiveParams {
    fn default() -> Self {
        Self {
            hsv: HsvThreshold::default(),
            filter: ContourFilter::default(),
            grouping: ContourGrouping::Single,
            intersection: IntersectionDirection::Up,
            corners: CornerDetection::default(),
            target_model: TargetModelKind::default(),
            solve_pnp_enabled: false,
            camera_pitch_deg: 0.0,
            mount: CameraMount::default(),
            output_show_multiple: false,
            output_mode: OutputMode::Input,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineKind {
    Reflective(ReflectiveParams),
    /// No processing; the output frame is the input frame.
    Driver,
}

/// One named pipeline configuration of a camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub nickname: String,
    pub kind: PipelineKind,
}

impl PipelineSettings {
    pub fn reflective(nickname: impl Into<String>, params: ReflectiveParams) -> Self {
        Self {
            nickname: nickname.into(),
            kind: PipelineKind::Reflective(params),
        }
    }

    pub fn driver(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            kind: PipelineKind::Driver,
        }
    }

    pub fn reflective_params(&self) -> Option<&ReflectiveParams> {
        match &self.kind {
            PipelineKind::Reflective(p) => Some(p),
            PipelineKind::Driver => None,
        }
    }

    pub fn reflective_params_mut(&mut self) -> Option<&mut ReflectiveParams> {
        match &mut self.kind {
            PipelineKind::Reflective(p) => Some(p),
            PipelineKind::Driver => None,
        }
    }

    /// Load settings from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SettingsIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write settings as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SettingsIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::reflective("New Pipeline", ReflectiveParams::default())
    }
}
