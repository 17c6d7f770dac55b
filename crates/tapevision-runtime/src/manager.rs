//! Registry of running vision modules.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tapevision_core::CameraCalibration;

use crate::config::{CameraConfig, ConfigStore};
use crate::events::EventBus;
use crate::lock;
use crate::module::VisionModule;
use crate::source::FrameSource;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A source found by discovery, with the settings to use when nothing was
/// persisted for it.
pub struct DiscoveredSource {
    pub source: Box<dyn FrameSource>,
    pub defaults: Option<CameraConfig>,
    pub calibration: Option<CameraCalibration>,
}

impl DiscoveredSource {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            defaults: None,
            calibration: None,
        }
    }
}

impl From<Box<dyn FrameSource>> for DiscoveredSource {
    fn from(source: Box<dyn FrameSource>) -> Self {
        Self::new(source)
    }
}

/// Maps source ids to their modules.
///
/// Registration holds the registry lock for its whole duration, so
/// concurrent `add_sources` calls (discovery ticks, manual adds) are
/// serialized.
pub struct ModuleManager {
    modules: Mutex<BTreeMap<String, Arc<VisionModule>>>,
    store: Arc<dyn ConfigStore>,
    events: EventBus,
}

impl ModuleManager {
    pub fn new(store: Arc<dyn ConfigStore>, events: EventBus) -> Self {
        Self {
            modules: Mutex::new(BTreeMap::new()),
            store,
            events,
        }
    }

    /// Create and start a module for every source whose id is not yet
    /// registered. Returns the ids that were added.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(count = sources.len())))]
    pub fn add_sources(&self, sources: Vec<DiscoveredSource>) -> Vec<String> {
        let mut modules = lock(&self.modules);
        let mut added = Vec::new();

        for found in sources {
            let id = found.source.id().to_owned();
            if modules.contains_key(&id) {
                log::debug!("source {id:?} already registered");
                continue;
            }

            let camera = self.camera_config(&id, found.defaults);
            let calibration = match self.store.load_calibration(&id) {
                Ok(Some(cal)) => Some(cal),
                Ok(None) => found.calibration,
                Err(e) => {
                    log::warn!("camera {id:?}: {e}; running without pose estimation");
                    None
                }
            };

            let module = Arc::new(VisionModule::new(
                found.source,
                camera,
                calibration,
                self.events.clone(),
            ));
            if let Err(e) = module.start() {
                log::error!("camera {id:?} failed to start: {e}");
                continue;
            }
            modules.insert(id.clone(), module);
            added.push(id);
        }

        if !added.is_empty() {
            log::info!("registered cameras {added:?}");
        }
        added
    }

    fn camera_config(&self, id: &str, defaults: Option<CameraConfig>) -> CameraConfig {
        match self.store.load_camera(id) {
            Ok(Some(saved)) => return saved,
            Ok(None) => {}
            Err(e) => log::warn!("camera {id:?}: {e}; using defaults"),
        }
        let config = defaults.unwrap_or_else(|| CameraConfig::new(id, Vec::new()));
        let config = config.normalized();
        if let Err(e) = self.store.save_camera(id, &config) {
            log::warn!("camera {id:?}: could not save defaults: {e}");
        }
        config
    }

    pub fn is_registered(&self, id: &str) -> bool {
        lock(&self.modules).contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<VisionModule>> {
        lock(&self.modules).get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.modules).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.modules).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.modules).is_empty()
    }

    /// Write the current configuration of `id` back to the store.
    pub fn save(&self, id: &str) -> bool {
        let Some(module) = self.get(id) else {
            return false;
        };
        match self.store.save_camera(id, &module.camera_config()) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("camera {id:?}: {e}");
                false
            }
        }
    }

    /// Stop every module and clear the registry.
    pub fn stop_all(&self) {
        let modules = std::mem::take(&mut *lock(&self.modules));
        for module in modules.values() {
            module.stop();
        }
    }
}
