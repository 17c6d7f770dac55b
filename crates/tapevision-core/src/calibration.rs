//! Camera calibration: pinhole intrinsics plus Brown–Conrady distortion.
//!
//! On disk a calibration is a JSON object with two matrices,
//! `cameraIntrinsics` (3×3, row-major) and `cameraExtrinsics` (1×5,
//! `k1 k2 p1 p2 k3`), each stored as `{ "rows", "cols", "data" }`. Shape is
//! checked while deserializing, so a [`CameraCalibration`] value always has
//! the right dimensions.

use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{name} must be {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    Shape {
        name: &'static str,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },
    #[error("{name} declares {expected} values but holds {actual}")]
    DataLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("calibration contains non-finite values")]
    NonFinite,
    #[error("focal lengths must be non-zero")]
    ZeroFocal,
}

/// Dense matrix as stored in calibration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonMat {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl JsonMat {
    fn checked(
        &self,
        name: &'static str,
        rows: usize,
        cols: usize,
    ) -> Result<&[f64], CalibrationError> {
        if self.rows != rows || self.cols != cols {
            return Err(CalibrationError::Shape {
                name,
                expected_rows: rows,
                expected_cols: cols,
                rows: self.rows,
                cols: self.cols,
            });
        }
        if self.data.len() != rows * cols {
            return Err(CalibrationError::DataLength {
                name,
                expected: rows * cols,
                actual: self.data.len(),
            });
        }
        if !self.data.iter().all(|v| v.is_finite()) {
            return Err(CalibrationError::NonFinite);
        }
        Ok(&self.data)
    }
}

/// Raw on-disk layout, before shape validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationFile {
    pub camera_intrinsics: JsonMat,
    pub camera_extrinsics: JsonMat,
}

/// Brown–Conrady radial-tangential distortion coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn from_array([k1, k2, p1, p2, k3]: [f64; 5]) -> Self {
        Self { k1, k2, p1, p2, k3 }
    }

    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Apply distortion to normalized coordinates.
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, distorted: Point2<f64>) -> Option<Point2<f64>> {
        const MAX_ITERS: usize = 20;
        let (mut x, mut y) = (distorted.x, distorted.y);
        for _ in 0..MAX_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let nx = (distorted.x - dx) / radial;
            let ny = (distorted.y - dy) / radial;
            let step = (nx - x).hypot(ny - y);
            x = nx;
            y = ny;
            if step < 1e-12 {
                break;
            }
        }
        (x.is_finite() && y.is_finite()).then(|| Point2::new(x, y))
    }
}

/// Intrinsics and distortion of one camera at one resolution.
///
/// Immutable once loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalibrationFile", into = "CalibrationFile")]
pub struct CameraCalibration {
    camera_matrix: Matrix3<f64>,
    distortion: Distortion,
}

impl TryFrom<CalibrationFile> for CameraCalibration {
    type Error = CalibrationError;

    fn try_from(file: CalibrationFile) -> Result<Self, Self::Error> {
        let k = file.camera_intrinsics.checked("cameraIntrinsics", 3, 3)?;
        let d = file.camera_extrinsics.checked("cameraExtrinsics", 1, 5)?;
        Self::new(
            Matrix3::from_row_slice(k),
            Distortion::from_array([d[0], d[1], d[2], d[3], d[4]]),
        )
    }
}

impl From<CameraCalibration> for CalibrationFile {
    fn from(cal: CameraCalibration) -> Self {
        let m = cal.camera_matrix;
        Self {
            camera_intrinsics: JsonMat {
                rows: 3,
                cols: 3,
                data: (0..3)
                    .flat_map(|r| (0..3).map(move |c| m[(r, c)]))
                    .collect(),
            },
            camera_extrinsics: JsonMat {
                rows: 1,
                cols: 5,
                data: cal.distortion.to_array().to_vec(),
            },
        }
    }
}

impl CameraCalibration {
    pub fn new(camera_matrix: Matrix3<f64>, distortion: Distortion) -> Result<Self, CalibrationError> {
        if !camera_matrix.iter().all(|v| v.is_finite())
            || !distortion.to_array().iter().all(|v| v.is_finite())
        {
            return Err(CalibrationError::NonFinite);
        }
        if camera_matrix[(0, 0)].abs() < 1e-12 || camera_matrix[(1, 1)].abs() < 1e-12 {
            return Err(CalibrationError::ZeroFocal);
        }
        Ok(Self {
            camera_matrix,
            distortion,
        })
    }

    /// Distortion-free pinhole camera.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, CalibrationError> {
        Self::new(
            Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            Distortion::default(),
        )
    }

    /// Pinhole camera with the principal point at the image centre and the
    /// given horizontal field of view.
    pub fn from_fov(width: u32, height: u32, fov_deg: f64) -> Result<Self, CalibrationError> {
        let f = (width as f64 / 2.0) / (fov_deg.to_radians() / 2.0).tan();
        Self::pinhole(f, f, width as f64 / 2.0, height as f64 / 2.0)
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    /// Pixel to undistorted normalized image coordinates.
    pub fn normalize(&self, pixel: Point2<f64>) -> Option<Point2<f64>> {
        let k = &self.camera_matrix;
        let (fx, fy, skew) = (k[(0, 0)], k[(1, 1)], k[(0, 1)]);
        let (cx, cy) = (k[(0, 2)], k[(1, 2)]);
        let yd = (pixel.y - cy) / fy;
        let xd = (pixel.x - cx - skew * yd) / fx;
        self.distortion.undistort(Point2::new(xd, yd))
    }

    /// Project a camera-frame point to pixels. `None` behind the camera.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        let d = self.distortion.distort(Point2::new(p.x / p.z, p.y / p.z));
        let k = &self.camera_matrix;
        Some(Point2::new(
            k[(0, 0)] * d.x + k[(0, 1)] * d.y + k[(0, 2)],
            k[(1, 1)] * d.y + k[(1, 2)],
        ))
    }

    /// Load a calibration JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load a calibration, logging and returning `None` on any failure.
    ///
    /// The camera then runs without pose estimation.
    pub fn load_optional(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        match Self::load_json(path) {
            Ok(cal) => Some(cal),
            Err(err) => {
                log::warn!("failed to load calibration {}: {err}", path.display());
                None
            }
        }
    }

    /// Write this calibration as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LIFECAM_240P: &str = r#"{
        "cameraIntrinsics": {
            "rows": 3, "cols": 3,
            "data": [353.0, 0.0, 163.7, 0.0, 340.0, 115.9, 0.0, 0.0, 1.0]
        },
        "cameraExtrinsics": {
            "rows": 1, "cols": 5,
            "data": [0.136, -1.10, 0.002, -0.001, 2.0]
        }
    }"#;

    #[test]
    fn parses_calibration_with_fixed_shapes() {
        let cal: CameraCalibration = serde_json::from_str(LIFECAM_240P).expect("parse");
        assert_eq!(cal.camera_matrix().shape(), (3, 3));
        assert_eq!(cal.distortion().to_array().len(), 5);
        assert_relative_eq!(cal.camera_matrix()[(0, 2)], 163.7);
        assert_relative_eq!(cal.distortion().k3, 2.0);
    }

    #[test]
    fn rejects_wrong_shapes() {
        let bad = LIFECAM_240P.replace(r#""rows": 1, "cols": 5"#, r#""rows": 5, "cols": 1"#);
        let err = serde_json::from_str::<CameraCalibration>(&bad).unwrap_err();
        assert!(err.to_string().contains("cameraExtrinsics must be 1x5"), "{err}");

        let short = LIFECAM_240P.replace("0.0, 0.0, 1.0]", "0.0, 1.0]");
        assert!(serde_json::from_str::<CameraCalibration>(&short).is_err());
    }

    #[test]
    fn load_optional_returns_none_for_malformed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calibration.json");
        fs::write(&path, r#"{"cameraIntrinsics": {"rows": 2}}"#).expect("write");
        assert!(CameraCalibration::load_optional(&path).is_none());
        assert!(CameraCalibration::load_optional(dir.path().join("missing.json")).is_none());
    }

    #[test]
    fn write_then_load_preserves_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cal.json");
        let cal: CameraCalibration = serde_json::from_str(LIFECAM_240P).expect("parse");
        cal.write_json(&path).expect("write");
        assert_eq!(CameraCalibration::load_json(&path).expect("load"), cal);
    }

    #[test]
    fn undistort_inverts_projection() {
        let cal: CameraCalibration = serde_json::from_str(LIFECAM_240P).expect("parse");
        let p = Point3::new(4.0, -3.0, 40.0);
        let px = cal.project(&p).expect("in front");
        let n = cal.normalize(px).expect("normalize");
        assert_relative_eq!(n.x, 0.1, epsilon = 1e-9);
        assert_relative_eq!(n.y, -0.075, epsilon = 1e-9);
        assert!(cal.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }
}
