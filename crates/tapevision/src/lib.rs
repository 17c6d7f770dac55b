//! Retroreflective vision target tracking.
//!
//! This crate ties the workspace together:
//! - re-exports of the layered crates,
//! - [`VisionServices`], the process-level container that owns the
//!   scheduler, event bus, camera registry and discovery,
//! - the `tapevision` binary (feature `cli`).
//!
//! ## Quickstart
//!
//! ```no_run
//! use tapevision::{ServicesConfig, VisionServices};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut services = VisionServices::new(ServicesConfig {
//!     test_mode: true,
//!     ..ServicesConfig::default()
//! })?;
//! let results = services.events().results.subscribe();
//! services.start()?;
//! let event = results.recv()?;
//! println!("{}: {:?}", event.source_id, event.best);
//! services.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `tapevision::core`: frame buffers, thresholding, contours, calibration, pose.
//! - `tapevision::pipeline`: pipeline settings and the per-frame stage chain.
//! - `tapevision::runtime`: vision modules, scheduler, discovery, config store.

pub use tapevision_core as core;
pub use tapevision_pipeline as pipeline;
pub use tapevision_runtime as runtime;

pub use tapevision_core::{CameraCalibration, FrameBuffer, Pose2d, TargetModelKind};
pub use tapevision_pipeline::{run_pipeline, PipelineResult, PipelineSettings, TrackedTarget};
pub use tapevision_runtime::{EventBus, PipelineEvent, VisionModule};

mod services;

pub use services::{ServicesConfig, VisionServices, DEFAULT_PORT};
