use std::time::Duration;

use tapevision_core::FrameBuffer;

use crate::target::TrackedTarget;

/// Output of one pipeline run.
///
/// Owns its output frame handle; dropping the result (or calling
/// [`PipelineResult::release`]) releases it.
#[derive(Debug)]
pub struct PipelineResult {
    /// Largest target first.
    pub targets: Vec<TrackedTarget>,
    pub output: FrameBuffer,
    pub latency: Duration,
    pub sequence: u64,
}

impl PipelineResult {
    #[inline]
    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    pub fn best_target(&self) -> Option<&TrackedTarget> {
        self.targets.first()
    }

    pub fn latency_millis(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }

    /// Release the output frame and discard the targets. Idempotent.
    pub fn release(&mut self) {
        self.targets.clear();
        self.output.release();
    }
}
