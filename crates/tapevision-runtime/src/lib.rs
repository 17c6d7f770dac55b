//! Runtime layer: per-camera loops and the services around them.
//!
//! - [`VisionModule`]: one thread per camera running the active pipeline on
//!   every frame, with settings hot-swap between iterations.
//! - [`ModuleManager`] and [`SourceManager`]: the camera registry and the
//!   discovery pass that fills it.
//! - [`Scheduler`]: named fixed-rate tasks on a shared pool, used for
//!   discovery and metrics.
//! - [`EventBus`]: typed broadcast of pipeline results and metrics.
//! - [`ConfigStore`]: persisted camera configuration and calibration.

use std::sync::{Mutex, MutexGuard, PoisonError};

mod config;
mod discovery;
mod events;
mod manager;
mod metrics;
mod module;
mod scheduler;
mod source;

pub use config::{CameraConfig, ConfigError, ConfigStore, JsonConfigStore, MemoryConfigStore};
pub use discovery::{
    DirectoryDiscovery, DiscoveryError, SourceDiscovery, SourceManager, StaticDiscovery,
    DISCOVERY_TASK,
};
pub use events::{EventBus, MetricsEvent, PipelineEvent, Publisher, TargetSummary, DEFAULT_CAPACITY};
pub use manager::{DiscoveredSource, ModuleManager};
pub use metrics::{
    register_metrics, HardwareMonitor, MonitorError, UnsupportedMonitor, METRICS_PERIOD,
    METRICS_TASK,
};
pub use module::{ModuleError, ModuleState, ModuleStats, VisionModule};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle};
pub use source::{ChannelSource, FileSource, FrameSource, SourceError, StaticSource, CHANNEL_POLL};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
