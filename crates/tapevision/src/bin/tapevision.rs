use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser};
use log::LevelFilter;
use tapevision::{ServicesConfig, VisionServices, DEFAULT_PORT};

/// Track retroreflective vision targets on every attached camera.
#[derive(Parser, Debug)]
#[command(name = "tapevision", version, about)]
struct Cli {
    /// Debug logging; repeat for trace.
    #[arg(short, long, action = ArgAction::Count)]
    debug: u8,

    /// Serve two built-in field scenes instead of discovering cameras.
    #[arg(short, long)]
    test_mode: bool,

    /// Directory holding per-camera configuration and calibration.
    #[arg(long, default_value = "tapevision-config")]
    config_dir: PathBuf,

    /// Directory scanned for file-backed sources.
    #[arg(long, default_value = "sources")]
    source_dir: PathBuf,

    /// Port of the web UI.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = 5000)]
    discovery_period_ms: u64,

    /// Emit JSON log lines (builds with the `tracing` feature).
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn level(&self) -> LevelFilter {
        match self.debug {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) {
    if !tapevision::core::init_tracing(cli.level(), cli.json_logs) {
        eprintln!("a tracing subscriber was already installed");
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) {
    if cli.json_logs {
        eprintln!("--json-logs needs the `tracing` feature; using plain logs");
    }
    if let Err(e) = tapevision::core::init_with_level(cli.level()) {
        eprintln!("logger: {e}");
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    log::debug!("{cli:?} (log level {})", cli.level());

    let mut services = VisionServices::new(ServicesConfig {
        config_dir: cli.config_dir,
        source_dir: cli.source_dir,
        test_mode: cli.test_mode,
        port: cli.port,
        discovery_period: Duration::from_millis(cli.discovery_period_ms.max(1)),
        ..ServicesConfig::default()
    })?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("installing the Ctrl-C handler")?;
    }

    services.start()?;
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    log::info!("shutdown requested");
    services.shutdown();
    Ok(())
}
