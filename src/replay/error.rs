//! Restoration errors and warnings.

use thiserror::Error;

use crate::core::error::ProcessingError;
use crate::machine::ProcessingResult;

/// A non-fatal divergence observed during replay.
///
/// Replay re-runs guards and direction functions live, so a recorded outcome
/// may legitimately differ when conditional logic consults application state.
/// Warnings are data; whether they escalate is the validator's decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record #{index} ({event}): recorded {expected:?}, replay produced {actual:?}")]
pub struct RestorationWarning {
    pub index: usize,
    pub event: String,
    pub expected: ProcessingResult,
    pub actual: ProcessingResult,
}

/// Errors that abort a restoration outright.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("recorded structure hash {recorded} does not match this machine's structure hash {actual}; the trees are likely incompatible")]
    StructureMismatch { recorded: i64, actual: i64 },

    #[error("restoration requires a freshly built machine that has never started")]
    MachineAlreadyUsed,

    #[error("recorded event log is empty")]
    EmptyRecording,

    #[error("first record must be the start event, found {0}")]
    FirstRecordNotStart(String),

    #[error("a muted restoration section is already open on this machine")]
    MutedSectionReentered,

    #[error("restoration produced {} warning(s); first: {first}", warnings.len(), first = warnings.first().map(|w| w.to_string()).unwrap_or_default())]
    ValidationFailed { warnings: Vec<RestorationWarning> },

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}
