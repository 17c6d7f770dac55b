//! Reflective-tape stage chain.
//!
//! [`run_pipeline`] takes one frame handle and one [`PipelineSettings`] and
//! produces a [`PipelineResult`]: tracked targets sorted by area plus an
//! output frame handle. Runs are independent; nothing is cached between
//! frames.
//!
//! ```no_run
//! use tapevision_core::{synthetic, FrameBuffer};
//! use tapevision_pipeline::{run_pipeline, PipelineSettings};
//!
//! let frame = FrameBuffer::acquire(image::RgbImage::from_pixel(
//!     320,
//!     240,
//!     synthetic::BACKGROUND,
//! ));
//! let result = run_pipeline(&frame, &PipelineSettings::default(), None, 0).unwrap();
//! println!("{} targets in {:.2} ms", result.targets.len(), result.latency_millis());
//! ```

mod chain;
mod settings;
mod target;

pub use chain::*;
pub use settings::*;
pub use target::TrackedTarget;
