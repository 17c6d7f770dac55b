//! Typed broadcast channels for results and metrics.
//!
//! Each subscriber gets its own bounded queue. Publishing never blocks: a
//! subscriber whose queue is full misses the event, and a subscriber whose
//! receiver was dropped is pruned on the next publish.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use tapevision_pipeline::{PipelineResult, TrackedTarget};

use crate::lock;

/// Default per-subscriber queue depth.
pub const DEFAULT_CAPACITY: usize = 16;

pub struct Publisher<T> {
    subscribers: Arc<Mutex<Vec<Sender<T>>>>,
    capacity: usize,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone> Publisher<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = bounded(self.capacity);
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Send `event` to every subscriber with room for it. Returns the number
    /// of subscribers that received it.
    pub fn publish(&self, event: T) -> usize {
        let mut subscribers = lock(&self.subscribers);
        let mut delivered = 0;
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// All event channels of a running process.
#[derive(Clone, Default)]
pub struct EventBus {
    pub results: Publisher<PipelineEvent>,
    pub metrics: Publisher<MetricsEvent>,
}

/// Per-target fields forwarded to the UI and the robot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetSummary {
    pub area: f64,
    pub area_percent: f64,
    /// Robot-relative x, y and rotation in degrees, if a pose was solved.
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub rotation_deg: Option<f64>,
    /// Camera-frame translation of the target origin.
    pub camera_translation: Option<[f64; 3]>,
}

impl From<&TrackedTarget> for TargetSummary {
    fn from(t: &TrackedTarget) -> Self {
        let robot = t.robot_pose();
        Self {
            area: t.area(),
            area_percent: t.area_percent(),
            x: robot.map(|p| p.x),
            y: robot.map(|p| p.y),
            rotation_deg: robot.map(|p| p.rotation_degrees()),
            camera_translation: t.camera_pose().map(|p| {
                let v = p.translation;
                [v.x, v.y, v.z]
            }),
        }
    }
}

/// One pipeline result, keyed by camera and pipeline.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineEvent {
    pub source_id: String,
    pub pipeline_index: usize,
    pub pipeline: String,
    pub sequence: u64,
    pub latency_ms: f64,
    pub targets: Vec<TargetSummary>,
    /// Largest target; what the robot link sends.
    pub best: Option<TargetSummary>,
}

impl PipelineEvent {
    pub fn from_result(
        source_id: &str,
        pipeline_index: usize,
        pipeline: &str,
        result: &PipelineResult,
    ) -> Self {
        let targets: Vec<TargetSummary> = result.targets.iter().map(TargetSummary::from).collect();
        Self {
            source_id: source_id.to_owned(),
            pipeline_index,
            pipeline: pipeline.to_owned(),
            sequence: result.sequence,
            latency_ms: result.latency_millis(),
            best: targets.first().cloned(),
            targets,
        }
    }
}

/// Hardware telemetry sample, published under the `metrics` key.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEvent {
    pub cpu_temp: f64,
    pub cpu_util: f64,
    pub cpu_mem: f64,
    pub gpu_temp: f64,
    pub gpu_mem: f64,
    pub ram_util: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_subscribers_miss_events_and_dropped_ones_are_pruned() {
        let publisher: Publisher<u32> = Publisher::new(1);
        let slow = publisher.subscribe();
        let gone = publisher.subscribe();
        drop(gone);

        assert_eq!(publisher.publish(1), 1);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(publisher.publish(2), 0);
        assert_eq!(slow.try_recv(), Ok(1));
        assert!(slow.try_recv().is_err());
    }

    #[test]
    fn metrics_keys_are_camel_case() {
        let json = serde_json::to_value(MetricsEvent::default()).expect("json");
        for key in ["cpuTemp", "cpuUtil", "cpuMem", "gpuTemp", "gpuMem", "ramUtil"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn clones_share_subscribers() {
        let bus = EventBus::default();
        let rx = bus.metrics.subscribe();
        let other = bus.clone();
        other.metrics.publish(MetricsEvent {
            cpu_temp: 41.0,
            ..MetricsEvent::default()
        });
        assert_eq!(rx.try_recv().map(|m| m.cpu_temp), Ok(41.0));
    }
}
