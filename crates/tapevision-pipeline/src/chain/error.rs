use tapevision_core::TargetModelError;

/// Errors that abort a whole pipeline run.
///
/// Per-candidate failures (no corners, no pose) never surface here; the
/// candidate is dropped instead.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("input frame was already released")]
    ReleasedFrame,
    #[error("input frame is not an RGB image")]
    NotRgb,
    #[error("input frame is empty")]
    EmptyFrame,
    #[error("invalid target model: {0}")]
    TargetModel(#[from] TargetModelError),
}
