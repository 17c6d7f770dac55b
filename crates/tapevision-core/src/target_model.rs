//! 3-D point models of physical vision targets.
//!
//! Target frame: x right, y up, z out of the target face toward the viewer,
//! in inches. Points are listed bottom-left, bottom-right, top-right,
//! top-left, matching the corner order produced by corner detection.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TargetModelError {
    #[error("a target model needs at least 4 points, got {0}")]
    TooFewPoints(usize),
    #[error("target model contains non-finite coordinates")]
    NonFinite,
    #[error("rectangle dimensions must be positive, got {width}x{height}")]
    InvalidRectangle { width: f64, height: f64 },
}

/// Ordered, immutable 3-D point set.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetModel {
    points: Vec<Point3<f64>>,
}

impl TargetModel {
    pub fn new(points: Vec<Point3<f64>>) -> Result<Self, TargetModelError> {
        if points.len() < 4 {
            return Err(TargetModelError::TooFewPoints(points.len()));
        }
        if !points.iter().all(|p| p.coords.iter().all(|v| v.is_finite())) {
            return Err(TargetModelError::NonFinite);
        }
        Ok(Self { points })
    }

    #[inline]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Outer corners of the 2019 pair of tilted tape strips.
    pub fn dual_tape_2019() -> Self {
        Self {
            points: vec![
                Point3::new(-7.313, -2.662, 0.0),
                Point3::new(7.313, -2.662, 0.0),
                Point3::new(5.936, 2.662, 0.0),
                Point3::new(-5.936, 2.662, 0.0),
            ],
        }
    }

    /// Corners of the 2020 power port hexagon outline.
    ///
    /// The model origin sits `offset` inches behind the target face.
    pub fn power_port_2020(offset: f64) -> Self {
        Self {
            points: vec![
                Point3::new(-9.819867, -17.0, offset),
                Point3::new(9.819867, -17.0, offset),
                Point3::new(19.625, 0.0, offset),
                Point3::new(-19.625, 0.0, offset),
            ],
        }
    }

    pub fn rectangle(width: f64, height: f64) -> Result<Self, TargetModelError> {
        if !(width > 0.0 && height > 0.0) {
            return Err(TargetModelError::InvalidRectangle { width, height });
        }
        let (hw, hh) = (width / 2.0, height / 2.0);
        Ok(Self {
            points: vec![
                Point3::new(-hw, -hh, 0.0),
                Point3::new(hw, -hh, 0.0),
                Point3::new(hw, hh, 0.0),
                Point3::new(-hw, hh, 0.0),
            ],
        })
    }
}

/// Serializable target model selection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetModelKind {
    #[default]
    #[serde(rename = "dual_tape_2019")]
    DualTape2019,
    #[serde(rename = "power_port_2020")]
    PowerPort2020 {
        #[serde(default)]
        offset: f64,
    },
    Rectangle {
        width: f64,
        height: f64,
    },
    Custom {
        points: Vec<[f64; 3]>,
    },
}

impl TargetModelKind {
    pub fn build(&self) -> Result<TargetModel, TargetModelError> {
        match self {
            TargetModelKind::DualTape2019 => Ok(TargetModel::dual_tape_2019()),
            TargetModelKind::PowerPort2020 { offset } => {
                if !offset.is_finite() {
                    return Err(TargetModelError::NonFinite);
                }
                Ok(TargetModel::power_port_2020(*offset))
            }
            TargetModelKind::Rectangle { width, height } => TargetModel::rectangle(*width, *height),
            TargetModelKind::Custom { points } => TargetModel::new(
                points
                    .iter()
                    .map(|&[x, y, z]| Point3::new(x, y, z))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_models_list_bottom_corners_first() {
        for model in [
            TargetModel::dual_tape_2019(),
            TargetModel::power_port_2020(36.0),
        ] {
            let p = model.points();
            assert_eq!(p.len(), 4);
            assert!(p[0].y < p[3].y && p[1].y < p[2].y);
            assert!(p[0].x < p[1].x && p[3].x < p[2].x);
        }
        assert_eq!(TargetModel::power_port_2020(36.0).points()[2].z, 36.0);
    }

    #[test]
    fn custom_models_need_four_points() {
        let kind = TargetModelKind::Custom {
            points: vec![[0.0, 0.0, 0.0]; 3],
        };
        assert_eq!(kind.build(), Err(TargetModelError::TooFewPoints(3)));
        assert!(TargetModelKind::Rectangle {
            width: 0.0,
            height: 2.0
        }
        .build()
        .is_err());
    }

    #[test]
    fn kind_deserializes_from_tagged_json() {
        let kind: TargetModelKind =
            serde_json::from_str(r#"{"kind": "power_port_2020", "offset": 36.0}"#).expect("parse");
        assert_eq!(kind, TargetModelKind::PowerPort2020 { offset: 36.0 });
        let kind: TargetModelKind =
            serde_json::from_str(r#"{"kind": "dual_tape_2019"}"#).expect("parse");
        assert_eq!(kind.build(), Ok(TargetModel::dual_tape_2019()));
    }
}
