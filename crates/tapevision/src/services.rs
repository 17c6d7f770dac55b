//! Process-wide service container.
//!
//! Everything the running process needs is built once in
//! [`VisionServices::new`] and torn down in [`VisionServices::shutdown`]:
//! the scheduler, the event bus, the config store, the camera registry,
//! discovery and the metrics task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tapevision_runtime::{
    register_metrics, ConfigStore, DirectoryDiscovery, EventBus, HardwareMonitor,
    JsonConfigStore, ModuleManager, Scheduler, SourceDiscovery, SourceManager, StaticDiscovery,
    UnsupportedMonitor, METRICS_PERIOD,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Default port of the web UI, which runs outside this process.
pub const DEFAULT_PORT: u16 = 5800;

#[derive(Clone, Debug)]
pub struct ServicesConfig {
    pub config_dir: PathBuf,
    pub source_dir: PathBuf,
    /// Serve the built-in field scenes instead of discovering sources.
    pub test_mode: bool,
    pub port: u16,
    pub discovery_period: Duration,
    pub scheduler_workers: usize,
    /// Frame rate of file-backed sources.
    pub source_fps: f64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("tapevision-config"),
            source_dir: PathBuf::from("sources"),
            test_mode: false,
            port: DEFAULT_PORT,
            discovery_period: Duration::from_millis(5000),
            scheduler_workers: 2,
            source_fps: 30.0,
        }
    }
}

pub struct VisionServices {
    config: ServicesConfig,
    scheduler: Scheduler,
    events: EventBus,
    modules: Arc<ModuleManager>,
    sources: Arc<SourceManager>,
    monitor: Arc<dyn HardwareMonitor>,
    started: bool,
    stopped: bool,
}

impl VisionServices {
    /// Build services with a JSON config store under `config.config_dir`
    /// and directory discovery (or the test scenes in test mode).
    pub fn new(config: ServicesConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn ConfigStore> = Arc::new(JsonConfigStore::new(&config.config_dir));
        let discovery: Box<dyn SourceDiscovery> = if config.test_mode {
            Box::new(StaticDiscovery::test_mode(config.source_fps).context("test mode scenes")?)
        } else {
            Box::new(DirectoryDiscovery::new(&config.source_dir, config.source_fps))
        };
        Self::with_parts(config, store, discovery, Arc::new(UnsupportedMonitor))
    }

    pub fn with_parts(
        config: ServicesConfig,
        store: Arc<dyn ConfigStore>,
        discovery: Box<dyn SourceDiscovery>,
        monitor: Arc<dyn HardwareMonitor>,
    ) -> anyhow::Result<Self> {
        let scheduler =
            Scheduler::new(config.scheduler_workers).context("starting the task scheduler")?;
        let events = EventBus::default();
        let modules = Arc::new(ModuleManager::new(store, events.clone()));
        let sources = Arc::new(SourceManager::new(discovery, modules.clone()));
        Ok(Self {
            config,
            scheduler,
            events,
            modules,
            sources,
            monitor,
            started: false,
            stopped: false,
        })
    }

    /// Schedule discovery and metrics. A subsystem that fails to start is
    /// logged and left off; the rest keep running.
    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.stopped {
            anyhow::bail!("services were shut down");
        }
        if self.started {
            return Ok(());
        }
        self.started = true;

        log::info!(
            "starting: config {}, {} (ui port {})",
            self.config.config_dir.display(),
            if self.config.test_mode {
                "test mode".to_string()
            } else {
                format!("sources from {}", self.config.source_dir.display())
            },
            self.config.port
        );

        if let Err(e) = self
            .sources
            .register(&self.scheduler, self.config.discovery_period)
        {
            log::error!("source discovery not started: {e}");
        }
        if let Err(e) = register_metrics(
            &self.scheduler,
            self.monitor.clone(),
            self.events.metrics.clone(),
            METRICS_PERIOD,
        ) {
            log::error!("metrics not started: {e}");
        }
        Ok(())
    }

    /// Stop scheduled tasks, then every camera. Idempotent.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.scheduler.shutdown();
        self.modules.stop_all();
        log::info!("services stopped");
    }

    pub fn config(&self) -> &ServicesConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn modules(&self) -> &Arc<ModuleManager> {
        &self.modules
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for VisionServices {
    fn drop(&mut self) {
        self.shutdown();
    }
}
