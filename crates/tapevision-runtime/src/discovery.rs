//! Source discovery.
//!
//! A [`SourceDiscovery`] reports sources that are not registered yet;
//! [`SourceManager`] feeds them to the [`ModuleManager`] once or on a timer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tapevision_core::synthetic::{
    camera_pose_for, dual_tape_2019_strips, power_port_2020_outline, render_scene,
};
use tapevision_core::{CameraCalibration, ChannelRange, HsvThreshold, Pose2d, TargetModelKind};
use tapevision_pipeline::{
    ContourGrouping, CornerDetection, IntersectionDirection, PipelineSettings, ReflectiveParams,
};

use crate::config::CameraConfig;
use crate::lock;
use crate::manager::{DiscoveredSource, ModuleManager};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::source::{FileSource, StaticSource};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Name of the recurring discovery task.
pub const DISCOVERY_TASK: &str = "SourceDiscovery";

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("test scene {0} could not be rendered")]
    Render(&'static str),
}

pub trait SourceDiscovery: Send {
    /// Sources not yet known. `is_known` tells which ids are registered so
    /// they are not opened again.
    fn discover(
        &mut self,
        is_known: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<DiscoveredSource>, DiscoveryError>;
}

/// Treats every image file in a directory as a camera keyed by file stem.
pub struct DirectoryDiscovery {
    dir: PathBuf,
    fps: f64,
}

impl DirectoryDiscovery {
    pub fn new(dir: impl Into<PathBuf>, fps: f64) -> Self {
        Self {
            dir: dir.into(),
            fps,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

impl SourceDiscovery for DirectoryDiscovery {
    fn discover(
        &mut self,
        is_known: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<DiscoveredSource>, DiscoveryError> {
        let scan_err = |source| DiscoveryError::Scan {
            path: self.dir.clone(),
            source,
        };
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(scan_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        paths.sort();

        let mut found = Vec::new();
        for path in paths {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_known(id) {
                continue;
            }
            match FileSource::open(id, &path, self.fps) {
                Ok(source) => found.push(DiscoveredSource::new(Box::new(source))),
                Err(e) => log::warn!("skipping {}: {e}", path.display()),
            }
        }
        Ok(found)
    }
}

/// A fixed set of sources, handed out on the first call.
pub struct StaticDiscovery {
    pending: Vec<DiscoveredSource>,
}

impl StaticDiscovery {
    pub fn new(sources: Vec<DiscoveredSource>) -> Self {
        Self { pending: sources }
    }

    /// The two rendered field scenes used when running without cameras:
    /// `WPI2019` (cargo ship tape pair) and `WPI2020` (power port).
    pub fn test_mode(fps: f64) -> Result<Self, DiscoveryError> {
        Ok(Self::new(vec![cargo_ship_scene(fps)?, power_port_scene(fps)?]))
    }
}

impl SourceDiscovery for StaticDiscovery {
    fn discover(
        &mut self,
        is_known: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<DiscoveredSource>, DiscoveryError> {
        Ok(std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|d| !is_known(d.source.id()))
            .collect())
    }
}

fn green_tape(value_lo: u8) -> HsvThreshold {
    HsvThreshold {
        hue: ChannelRange::new(60, 100),
        saturation: ChannelRange::new(100, 255),
        value: ChannelRange::new(value_lo, 255),
        hue_inverted: false,
    }
}

fn cargo_ship_scene(fps: f64) -> Result<DiscoveredSource, DiscoveryError> {
    const ID: &str = "WPI2019";
    let cal = CameraCalibration::from_fov(320, 240, 60.0).map_err(|_| DiscoveryError::Render(ID))?;
    let pose = camera_pose_for(&Pose2d::new(41.96, -1.03, 1.46_f64.to_radians()));
    let image = render_scene(320, 240, &cal, &pose, &dual_tape_2019_strips())
        .ok_or(DiscoveryError::Render(ID))?;

    let params = ReflectiveParams {
        hsv: green_tape(190),
        grouping: ContourGrouping::Dual,
        intersection: IntersectionDirection::Up,
        target_model: TargetModelKind::DualTape2019,
        solve_pnp_enabled: true,
        ..ReflectiveParams::default()
    };
    Ok(DiscoveredSource {
        source: Box::new(StaticSource::new(ID, image, fps)),
        defaults: Some(CameraConfig::new(
            ID,
            vec![PipelineSettings::reflective("CargoShip", params)],
        )),
        calibration: Some(cal),
    })
}

fn power_port_scene(fps: f64) -> Result<DiscoveredSource, DiscoveryError> {
    const ID: &str = "WPI2020";
    let cal = CameraCalibration::from_fov(640, 480, 60.0).map_err(|_| DiscoveryError::Render(ID))?;
    let pose = camera_pose_for(&Pose2d::new(260.26, 64.26, 36.88_f64.to_radians()));
    let image = render_scene(640, 480, &cal, &pose, &[power_port_2020_outline(36.0)])
        .ok_or(DiscoveryError::Render(ID))?;

    let params = ReflectiveParams {
        hsv: green_tape(60),
        grouping: ContourGrouping::Single,
        corners: CornerDetection {
            use_convex_hulls: true,
            accuracy_percentage: 4.0,
        },
        target_model: TargetModelKind::PowerPort2020 { offset: 36.0 },
        solve_pnp_enabled: true,
        ..ReflectiveParams::default()
    };
    Ok(DiscoveredSource {
        source: Box::new(StaticSource::new(ID, image, fps)),
        defaults: Some(CameraConfig::new(
            ID,
            vec![PipelineSettings::reflective("OuterPort", params)],
        )),
        calibration: Some(cal),
    })
}

/// Runs discovery against a module registry.
pub struct SourceManager {
    discovery: Mutex<Box<dyn SourceDiscovery>>,
    modules: Arc<ModuleManager>,
}

impl SourceManager {
    pub fn new(discovery: Box<dyn SourceDiscovery>, modules: Arc<ModuleManager>) -> Self {
        Self {
            discovery: Mutex::new(discovery),
            modules,
        }
    }

    /// One discovery pass. Returns the ids that were registered.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn discover_once(&self) -> Result<Vec<String>, DiscoveryError> {
        let modules = &self.modules;
        let found = lock(&self.discovery).discover(&|id: &str| modules.is_registered(id))?;
        if found.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.modules.add_sources(found))
    }

    /// Run [`discover_once`](Self::discover_once) on `scheduler` every
    /// `period`. Failures are logged by the scheduler and never touch
    /// registered modules.
    pub fn register(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        period: Duration,
    ) -> Result<(), SchedulerError> {
        let this = Arc::downgrade(self);
        scheduler.schedule(DISCOVERY_TASK, period, move || {
            if let Some(this) = this.upgrade() {
                this.discover_once()?;
            }
            Ok(())
        })
    }

    pub fn modules(&self) -> &Arc<ModuleManager> {
        &self.modules
    }
}
