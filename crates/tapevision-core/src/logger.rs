//! Process logger.
//!
//! Prints `[elapsed LEVEL thread] message` to stderr. Every vision module
//! runs on its own named thread, so the thread name identifies the camera a
//! line came from. Install once at startup with [`init_with_level`].

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::filter::LevelFilter as TraceLevel;
#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("-");
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            name,
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization; the first level wins.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a `tracing` subscriber.
///
/// `RUST_LOG` selects the filter when set; otherwise events up to `level`
/// pass. Returns `false` if a global subscriber was already installed.
#[cfg(feature = "tracing")]
pub fn init_tracing(level: LevelFilter, json: bool) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(trace_level(level).into())
        .from_env_lossy();
    let builder = fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE);
    if json {
        builder.json().flatten_event(true).finish().try_init().is_ok()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
            .is_ok()
    }
}

#[cfg(feature = "tracing")]
fn trace_level(level: LevelFilter) -> TraceLevel {
    match level {
        LevelFilter::Off => TraceLevel::OFF,
        LevelFilter::Error => TraceLevel::ERROR,
        LevelFilter::Warn => TraceLevel::WARN,
        LevelFilter::Info => TraceLevel::INFO,
        LevelFilter::Debug => TraceLevel::DEBUG,
        LevelFilter::Trace => TraceLevel::TRACE,
    }
}
