//! Per-camera vision loop.
//!
//! A [`VisionModule`] owns one frame source and the camera's pipeline list.
//! `start` moves the source onto a dedicated thread that loops: pull a frame,
//! snapshot the settings, run the active pipeline, release the result, publish.
//! `stop` clears the run flag; the loop notices it after the frame it is
//! waiting on arrives, exits without publishing, and hands the source back so
//! the module can be started again. A loop that ends on its own (the source
//! disconnected) clears the flag too, and the next `start` reclaims it.
//!
//! Settings live behind `Mutex<Arc<ModuleState>>`. Every edit builds a new
//! state and swaps the `Arc`; the loop clones the `Arc` once per iteration,
//! so an edit is seen whole at the next iteration and never mid-run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tapevision_core::CameraCalibration;
use tapevision_pipeline::{run_pipeline, PipelineSettings};

use crate::config::CameraConfig;
use crate::events::{EventBus, PipelineEvent};
use crate::lock;
use crate::source::{FrameSource, SourceError};

/// Pause after a source error before asking for the next frame.
const SOURCE_RETRY: Duration = Duration::from_millis(50);

#[derive(thiserror::Error, Debug)]
pub enum ModuleError {
    #[error("pipeline index {index} out of range ({len} pipelines)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("module {0:?} has no frame source")]
    NoSource(String),
    #[error("failed to spawn vision thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Immutable settings snapshot of one module.
#[derive(Clone, Debug)]
pub struct ModuleState {
    pub camera: CameraConfig,
    pub calibration: Option<Arc<CameraCalibration>>,
}

impl ModuleState {
    pub fn active(&self) -> Option<&PipelineSettings> {
        self.camera.active()
    }
}

/// Counters of one module.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ModuleStats {
    pub iterations: u64,
    pub failed_iterations: u64,
    pub last_latency_micros: u64,
}

#[derive(Default)]
struct StatsCounters {
    iterations: AtomicU64,
    failed: AtomicU64,
    last_latency_micros: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ModuleStats {
        ModuleStats {
            iterations: self.iterations.load(Ordering::Relaxed),
            failed_iterations: self.failed.load(Ordering::Relaxed),
            last_latency_micros: self.last_latency_micros.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
type SnapshotHook = Box<dyn Fn(&ModuleState) + Send + Sync>;

struct Shared {
    id: String,
    running: AtomicBool,
    state: Mutex<Arc<ModuleState>>,
    stats: StatsCounters,
    events: EventBus,
    /// Runs on the vision thread right after each settings snapshot.
    #[cfg(test)]
    on_snapshot: Mutex<Option<SnapshotHook>>,
}

impl Shared {
    fn snapshot(&self) -> Arc<ModuleState> {
        lock(&self.state).clone()
    }
}

pub struct VisionModule {
    shared: Arc<Shared>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    worker: Mutex<Option<JoinHandle<Box<dyn FrameSource>>>>,
}

impl VisionModule {
    pub fn new(
        source: Box<dyn FrameSource>,
        camera: CameraConfig,
        calibration: Option<CameraCalibration>,
        events: EventBus,
    ) -> Self {
        let id = source.id().to_owned();
        if calibration.is_none() {
            log::info!("camera {id:?} has no calibration, pose estimation disabled");
        }
        Self {
            shared: Arc::new(Shared {
                id,
                running: AtomicBool::new(false),
                state: Mutex::new(Arc::new(ModuleState {
                    camera: camera.normalized(),
                    calibration: calibration.map(Arc::new),
                })),
                stats: StatsCounters::default(),
                events,
                #[cfg(test)]
                on_snapshot: Mutex::new(None),
            }),
            source: Mutex::new(Some(source)),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start the loop. Returns `Ok(false)` if it was already running.
    pub fn start(&self) -> Result<bool, ModuleError> {
        let mut worker = lock(&self.worker);
        // a cleared flag with a worker present means the loop has ended
        // or is about to
        if !self.is_running() {
            if let Some(handle) = worker.take() {
                self.reclaim(handle);
            }
        }
        if worker.is_some() {
            return Ok(false);
        }
        let source = lock(&self.source)
            .take()
            .ok_or_else(|| ModuleError::NoSource(self.shared.id.clone()))?;

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("vision-{}", self.shared.id))
            .spawn(move || run_loop(shared, source));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                log::info!("camera {:?} started", self.shared.id);
                Ok(true)
            }
            Err(e) => {
                // the source went down with the closure
                self.shared.running.store(false, Ordering::SeqCst);
                Err(ModuleError::Spawn(e))
            }
        }
    }

    /// Stop the loop and wait for the current iteration to finish.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let Some(handle) = lock(&self.worker).take() else {
            return;
        };
        self.reclaim(handle);
        log::info!("camera {:?} stopped", self.shared.id);
    }

    /// Join an exited loop and take its source back.
    fn reclaim(&self, handle: JoinHandle<Box<dyn FrameSource>>) {
        match handle.join() {
            Ok(source) => *lock(&self.source) = Some(source),
            Err(_) => log::error!("vision thread of {:?} panicked", self.shared.id),
        }
    }

    #[cfg(test)]
    fn set_snapshot_hook(&self, hook: impl Fn(&ModuleState) + Send + Sync + 'static) {
        *lock(&self.shared.on_snapshot) = Some(Box::new(hook));
    }

    pub fn stats(&self) -> ModuleStats {
        self.shared.stats.snapshot()
    }

    pub fn state(&self) -> Arc<ModuleState> {
        self.shared.snapshot()
    }

    pub fn camera_config(&self) -> CameraConfig {
        self.shared.snapshot().camera.clone()
    }

    fn update<R>(&self, edit: impl FnOnce(&mut ModuleState) -> R) -> R {
        let mut slot = lock(&self.shared.state);
        let mut next = ModuleState::clone(&slot);
        let out = edit(&mut next);
        *slot = Arc::new(next);
        out
    }

    /// Make pipeline `index` the active one from the next iteration on.
    pub fn set_active(&self, index: usize) -> Result<(), ModuleError> {
        self.update(|state| {
            let len = state.camera.pipelines.len();
            if index >= len {
                return Err(ModuleError::IndexOutOfRange { index, len });
            }
            state.camera.active_index = index;
            Ok(())
        })
    }

    /// Edit the active pipeline's settings in place.
    pub fn update_active(&self, edit: impl FnOnce(&mut PipelineSettings)) {
        self.update(|state| {
            let index = state.camera.active_index;
            if let Some(settings) = state.camera.pipelines.get_mut(index) {
                edit(settings);
            }
        })
    }

    /// Replace the whole camera configuration.
    pub fn replace_camera(&self, camera: CameraConfig) {
        self.update(|state| state.camera = camera.normalized())
    }

    pub fn set_calibration(&self, calibration: Option<CameraCalibration>) {
        self.update(|state| state.calibration = calibration.map(Arc::new))
    }
}

impl Drop for VisionModule {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the run flag however the loop exits.
struct ClearOnExit<'a>(&'a AtomicBool);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn run_loop(shared: Arc<Shared>, mut source: Box<dyn FrameSource>) -> Box<dyn FrameSource> {
    let _running = ClearOnExit(&shared.running);
    let mut sequence = 0u64;

    while shared.running.load(Ordering::SeqCst) {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(SourceError::Timeout) => continue,
            Err(SourceError::Disconnected) => {
                log::warn!("camera {:?}: source disconnected", shared.id);
                break;
            }
            Err(e) => {
                log::warn!("camera {:?}: {e}", shared.id);
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                thread::sleep(SOURCE_RETRY);
                continue;
            }
        };
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let state = shared.snapshot();
        #[cfg(test)]
        if let Some(hook) = lock(&shared.on_snapshot).as_ref() {
            hook(&state);
        }
        let Some(settings) = state.active() else {
            continue;
        };
        let calibration = state.calibration.as_deref();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            run_pipeline(&frame, settings, calibration, sequence)
        }));
        drop(frame);
        shared.stats.iterations.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(result)) => {
                let micros = u64::try_from(result.latency.as_micros()).unwrap_or(u64::MAX);
                shared
                    .stats
                    .last_latency_micros
                    .store(micros, Ordering::Relaxed);
                let event = PipelineEvent::from_result(
                    &shared.id,
                    state.camera.active_index,
                    &settings.nickname,
                    &result,
                );
                // the output frame goes before anyone hears of it
                drop(result);
                shared.events.results.publish(event);
            }
            Ok(Err(e)) => {
                log::warn!("camera {:?} frame {sequence}: {e}", shared.id);
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                log::error!("camera {:?} frame {sequence}: pipeline panicked", shared.id);
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        sequence += 1;
    }

    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChannelSource, StaticSource};
    use crossbeam_channel::bounded;
    use image::RgbImage;
    use nalgebra::Point2;
    use std::time::Instant;
    use tapevision_core::synthetic::{render_polygons, BACKGROUND, TAPE_GREEN};
    use tapevision_core::FrameBuffer;
    use tapevision_pipeline::ReflectiveParams;

    fn blank_source(id: &str) -> Box<dyn FrameSource> {
        Box::new(StaticSource::new(
            id,
            RgbImage::from_pixel(32, 24, BACKGROUND),
            200.0,
        ))
    }

    #[test]
    fn start_stop_restart() {
        let events = EventBus::default();
        let rx = events.results.subscribe();
        let module = VisionModule::new(blank_source("cam"), CameraConfig::default(), None, events);

        assert!(module.start().expect("start"));
        assert!(!module.start().expect("second start"));
        let first = rx.recv_timeout(Duration::from_secs(2)).expect("event");
        assert_eq!(first.source_id, "cam");
        module.stop();
        assert!(!module.is_running());

        assert!(module.start().expect("restart"));
        rx.recv_timeout(Duration::from_secs(2)).expect("event after restart");
        module.stop();
        assert!(module.stats().iterations >= 2);
    }

    #[test]
    fn set_active_validates_the_index() {
        let module = VisionModule::new(
            blank_source("cam"),
            CameraConfig::new(
                "cam",
                vec![
                    PipelineSettings::default(),
                    PipelineSettings::driver("Driver"),
                ],
            ),
            None,
            EventBus::default(),
        );
        let before = module.state();
        module.set_active(1).expect("in range");
        assert!(matches!(
            module.set_active(2),
            Err(ModuleError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert_eq!(before.camera.active_index, 0);
        assert_eq!(module.state().camera.active_index, 1);
        assert_eq!(
            module.state().active().map(|p| p.nickname.as_str()),
            Some("Driver")
        );
    }

    #[test]
    fn failing_frames_are_counted_and_the_loop_continues() {
        let (source, tx) = ChannelSource::new("pushed", 4);
        let events = EventBus::default();
        let rx = events.results.subscribe();
        let module = VisionModule::new(
            Box::new(source),
            CameraConfig::new(
                "pushed",
                vec![PipelineSettings::reflective("p", ReflectiveParams::default())],
            ),
            None,
            events,
        );
        module.start().expect("start");

        let mut released = FrameBuffer::acquire(RgbImage::new(8, 8));
        released.release();
        tx.send(released).expect("send");
        tx.send(FrameBuffer::acquire(RgbImage::new(8, 8))).expect("send");

        let event = rx.recv_timeout(Duration::from_secs(2)).expect("event");
        assert_eq!(event.sequence, 1);
        module.stop();
        let stats = module.stats();
        assert_eq!(stats.failed_iterations, 1);
        assert_eq!(stats.iterations, 2);
    }

    #[test]
    fn disconnected_source_clears_the_run_flag() {
        let (source, tx) = ChannelSource::new("pushed", 1);
        let module = VisionModule::new(
            Box::new(source),
            CameraConfig::default(),
            None,
            EventBus::default(),
        );
        assert!(module.start().expect("start"));
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(2);
        while module.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!module.is_running());
        // the exited loop is reclaimed, so this is a real restart
        assert!(module.start().expect("restart"));
        module.stop();
        assert!(!module.is_running());
    }

    fn two_squares() -> FrameBuffer {
        let square = |x: f64, y: f64, side: f64| {
            vec![
                Point2::new(x, y),
                Point2::new(x + side, y),
                Point2::new(x + side, y + side),
                Point2::new(x, y + side),
            ]
        };
        FrameBuffer::acquire(render_polygons(
            160,
            120,
            BACKGROUND,
            TAPE_GREEN,
            &[square(10.0, 10.0, 30.0), square(90.0, 50.0, 20.0)],
        ))
    }

    #[test]
    fn edits_during_an_iteration_apply_to_the_next_one() {
        let (source, frames) = ChannelSource::new("cam", 4);
        let events = EventBus::default();
        let rx = events.results.subscribe();
        let module = VisionModule::new(
            Box::new(source),
            CameraConfig::new(
                "cam",
                vec![
                    PipelineSettings::reflective("Tape", ReflectiveParams::default()),
                    PipelineSettings::driver("Driver"),
                ],
            ),
            None,
            events,
        );

        // hold the first iteration between its snapshot and its pipeline run
        let (reached_tx, reached) = bounded(1);
        let (resume, resume_rx) = bounded::<()>(1);
        let first = AtomicBool::new(true);
        module.set_snapshot_hook(move |_| {
            if first.swap(false, Ordering::SeqCst) {
                let _ = reached_tx.send(());
                let _ = resume_rx.recv_timeout(Duration::from_secs(5));
            }
        });
        module.start().expect("start");
        let wait = || rx.recv_timeout(Duration::from_secs(2)).expect("event");

        frames.send(two_squares()).expect("send");
        reached.recv_timeout(Duration::from_secs(2)).expect("iteration in flight");
        module.update_active(|settings| {
            if let Some(p) = settings.reflective_params_mut() {
                p.output_show_multiple = true;
            }
        });
        module.set_active(1).expect("driver");
        resume.send(()).expect("resume");

        let in_flight = wait();
        assert_eq!((in_flight.pipeline_index, in_flight.pipeline.as_str()), (0, "Tape"));
        assert_eq!(in_flight.targets.len(), 1);
        assert_eq!(in_flight.sequence, 0);

        frames.send(two_squares()).expect("send");
        let next = wait();
        assert_eq!((next.pipeline_index, next.pipeline.as_str()), (1, "Driver"));
        assert!(next.targets.is_empty());

        module.set_active(0).expect("tape");
        frames.send(two_squares()).expect("send");
        assert_eq!(wait().targets.len(), 2);

        module.stop();
    }
}
