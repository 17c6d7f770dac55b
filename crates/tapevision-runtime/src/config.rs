//! Per-camera configuration persistence.
//!
//! [`JsonConfigStore`] keeps one directory per camera:
//!
//! ```text
//! <root>/cameras/<source-id>/config.json       camera config and pipelines
//! <root>/cameras/<source-id>/calibration.json  cameraIntrinsics / cameraExtrinsics
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tapevision_core::{CalibrationError, CameraCalibration};
use tapevision_pipeline::PipelineSettings;

use crate::lock;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// Persisted state of one camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub nickname: String,
    /// Horizontal field of view, degrees.
    pub fov: f64,
    pub active_index: usize,
    pub pipelines: Vec<PipelineSettings>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            fov: 60.0,
            active_index: 0,
            pipelines: vec![PipelineSettings::default()],
        }
    }
}

impl CameraConfig {
    pub fn new(nickname: impl Into<String>, pipelines: Vec<PipelineSettings>) -> Self {
        Self {
            nickname: nickname.into(),
            pipelines,
            ..Self::default()
        }
    }

    /// Guarantee at least one pipeline and an in-range active index.
    pub fn normalized(mut self) -> Self {
        if self.pipelines.is_empty() {
            log::warn!("camera {:?} has no pipelines, adding a default one", self.nickname);
            self.pipelines.push(PipelineSettings::default());
        }
        if self.active_index >= self.pipelines.len() {
            log::warn!(
                "camera {:?}: active pipeline {} out of range, using 0",
                self.nickname,
                self.active_index
            );
            self.active_index = 0;
        }
        self
    }

    pub fn active(&self) -> Option<&PipelineSettings> {
        self.pipelines.get(self.active_index)
    }
}

pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when nothing was saved for `source_id`.
    fn load_camera(&self, source_id: &str) -> Result<Option<CameraConfig>, ConfigError>;
    fn save_camera(&self, source_id: &str, config: &CameraConfig) -> Result<(), ConfigError>;
    fn load_calibration(&self, source_id: &str) -> Result<Option<CameraCalibration>, ConfigError>;
    fn save_calibration(
        &self,
        source_id: &str,
        calibration: &CameraCalibration,
    ) -> Result<(), ConfigError>;
}

/// JSON files under a root directory.
#[derive(Clone, Debug)]
pub struct JsonConfigStore {
    root: PathBuf,
}

impl JsonConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn camera_dir(&self, source_id: &str) -> PathBuf {
        self.root.join("cameras").join(source_id)
    }

    fn ensure_dir(&self, source_id: &str) -> Result<PathBuf, ConfigError> {
        let dir = self.camera_dir(source_id);
        fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl ConfigStore for JsonConfigStore {
    fn load_camera(&self, source_id: &str) -> Result<Option<CameraConfig>, ConfigError> {
        let path = self.camera_dir(source_id).join("config.json");
        let Some(raw) = read_optional(&path)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| ConfigError::Json { path, source })
    }

    fn save_camera(&self, source_id: &str, config: &CameraConfig) -> Result<(), ConfigError> {
        let dir = self.ensure_dir(source_id)?;
        write_pretty(&dir.join("config.json"), config)
    }

    fn load_calibration(&self, source_id: &str) -> Result<Option<CameraCalibration>, ConfigError> {
        let path = self.camera_dir(source_id).join("calibration.json");
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(CameraCalibration::load_json(&path)?))
    }

    fn save_calibration(
        &self,
        source_id: &str,
        calibration: &CameraCalibration,
    ) -> Result<(), ConfigError> {
        let dir = self.ensure_dir(source_id)?;
        calibration.write_json(dir.join("calibration.json"))?;
        Ok(())
    }
}

/// In-memory store for tests and runs that should not touch disk.
#[derive(Default)]
pub struct MemoryConfigStore {
    cameras: Mutex<HashMap<String, CameraConfig>>,
    calibrations: Mutex<HashMap<String, CameraCalibration>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_camera(&self, source_id: &str) -> Result<Option<CameraConfig>, ConfigError> {
        Ok(lock(&self.cameras).get(source_id).cloned())
    }

    fn save_camera(&self, source_id: &str, config: &CameraConfig) -> Result<(), ConfigError> {
        lock(&self.cameras).insert(source_id.to_owned(), config.clone());
        Ok(())
    }

    fn load_calibration(&self, source_id: &str) -> Result<Option<CameraCalibration>, ConfigError> {
        Ok(lock(&self.calibrations).get(source_id).cloned())
    }

    fn save_calibration(
        &self,
        source_id: &str,
        calibration: &CameraCalibration,
    ) -> Result<(), ConfigError> {
        lock(&self.calibrations).insert(source_id.to_owned(), calibration.clone());
        Ok(())
    }
}
