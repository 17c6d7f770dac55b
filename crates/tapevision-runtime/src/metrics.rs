//! Periodic hardware telemetry.

use std::sync::Arc;
use std::time::Duration;

use crate::events::{MetricsEvent, Publisher};
use crate::scheduler::{Scheduler, SchedulerError};

pub const METRICS_TASK: &str = "Metrics";
pub const METRICS_PERIOD: Duration = Duration::from_millis(1000);

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("hardware metrics are not supported on this platform")]
    Unsupported,
    #[error("failed to read {sensor}: {reason}")]
    Read { sensor: &'static str, reason: String },
}

/// Source of CPU, GPU and memory readings.
pub trait HardwareMonitor: Send + Sync {
    fn sample(&self) -> Result<MetricsEvent, MonitorError>;
}

/// Monitor for platforms without telemetry.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnsupportedMonitor;

impl HardwareMonitor for UnsupportedMonitor {
    fn sample(&self) -> Result<MetricsEvent, MonitorError> {
        Err(MonitorError::Unsupported)
    }
}

/// Schedule the metrics task: sample `monitor` every `period` and publish.
///
/// An unsupported monitor cancels the task after its first firing.
pub fn register_metrics(
    scheduler: &Scheduler,
    monitor: Arc<dyn HardwareMonitor>,
    publisher: Publisher<MetricsEvent>,
    period: Duration,
) -> Result<(), SchedulerError> {
    let handle = scheduler.handle();
    scheduler.schedule(METRICS_TASK, period, move || match monitor.sample() {
        Ok(sample) => {
            publisher.publish(sample);
            Ok(())
        }
        Err(MonitorError::Unsupported) => {
            log::info!("metrics are not available on this platform");
            handle.cancel(METRICS_TASK);
            Ok(())
        }
        Err(e) => Err(e.into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Fixed;

    impl HardwareMonitor for Fixed {
        fn sample(&self) -> Result<MetricsEvent, MonitorError> {
            Ok(MetricsEvent {
                cpu_temp: 48.5,
                ram_util: 31.0,
                ..MetricsEvent::default()
            })
        }
    }

    #[test]
    fn publishes_samples() {
        let scheduler = Scheduler::new(1).expect("scheduler");
        let publisher = Publisher::new(4);
        let rx = publisher.subscribe();
        register_metrics(&scheduler, Arc::new(Fixed), publisher, Duration::from_millis(10))
            .expect("register");
        let sample = rx.recv_timeout(Duration::from_secs(1)).expect("sample");
        assert_eq!(sample.cpu_temp, 48.5);
        assert!(scheduler.is_scheduled(METRICS_TASK));
        scheduler.shutdown();
    }

    #[test]
    fn unsupported_monitor_cancels_itself() {
        let scheduler = Scheduler::new(1).expect("scheduler");
        let publisher = Publisher::new(4);
        let rx = publisher.subscribe();
        register_metrics(
            &scheduler,
            Arc::new(UnsupportedMonitor),
            publisher,
            Duration::from_millis(5),
        )
        .expect("register");
        thread::sleep(Duration::from_millis(40));
        assert!(!scheduler.is_scheduled(METRICS_TASK));
        assert!(rx.try_recv().is_err());
        scheduler.shutdown();
    }
}
