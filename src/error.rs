use thiserror::Error;

use crate::segmentation::Resolution;

/// Errors raised by the per-frame vision stages.
///
/// These indicate an integration mistake (a frame of the wrong size reaching a
/// stage built for another size), never a transient condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VisionError {
    #[error("{stage}: expected a {expected} frame, got {actual}")]
    ResolutionMismatch {
        stage: &'static str,
        expected: Resolution,
        actual: Resolution,
    },
}

impl VisionError {
    /// Fails with `ResolutionMismatch` unless `actual` equals `expected`.
    pub fn check(stage: &'static str, expected: Resolution, actual: Resolution) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::ResolutionMismatch {
                stage,
                expected,
                actual,
            })
        }
    }
}

/// Errors that end the frame loop.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("precondition violated: {0}")]
    Precondition(#[from] VisionError),

    #[error("capture failed {failures} times in a row")]
    CaptureExhausted {
        failures: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
