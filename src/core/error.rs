//! Error taxonomy for configuration and event processing.
//!
//! Configuration errors are fatal to the call, not to the machine: the tree
//! stays in its pre-call shape. Resolution errors raised while processing an
//! event are fatal to the machine instance: the processing loop destroys
//! the machine best-effort and returns the error. Listener failures are
//! recoverable: they are delayed to the end of the processing step and the
//! machine stays running.

use thiserror::Error;

use crate::machine::MachineStatus;

/// Errors raised synchronously from tree-construction calls.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("state name '{0}' is already used in this machine")]
    DuplicateStateName(String),

    #[error("transition name '{0}' is already used in this machine")]
    DuplicateTransitionName(String),

    #[error("machine structure cannot change while the machine is {status:?}")]
    MutationWhileActive { status: MachineStatus },

    #[error("state '{0}' belongs to a different machine or to a nested machine's internals")]
    ForeignState(String),

    #[error("state '{parent}' cannot have children: {reason}")]
    ChildrenNotAllowed {
        parent: String,
        reason: &'static str,
    },

    #[error("state '{child}' cannot be added under parallel state '{parent}': pseudo-states and final states need an exclusive parent")]
    InvalidUnderParallel { child: String, parent: String },

    #[error("final state '{0}' cannot have outgoing transitions")]
    TransitionFromFinal(String),

    #[error("pseudo-state '{0}' cannot have outgoing transitions")]
    TransitionFromPseudo(String),

    #[error("initial state of '{parent}' must be one of its direct children")]
    InitialNotChild { parent: String },

    #[error("exclusive state '{0}' has children but no initial state")]
    MissingInitialState(String),

    #[error("default of history state '{state}' must be a sibling of the history state")]
    InvalidHistoryDefault { state: String },

    #[error("machine is destroyed")]
    Destroyed,
}

/// Failure reported by a listener callback or a fallible guard.
///
/// These are never thrown from inside a notification loop; they are
/// accumulated and handed to the listener exception handler once the current
/// processing step completes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome type for listener callbacks.
pub type ListenerResult = Result<(), ListenerError>;

/// Errors raised while starting a machine or processing an event.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("machine is destroyed")]
    MachineDestroyed,

    #[error("machine is not running")]
    NotRunning,

    #[error("machine is already running")]
    AlreadyRunning,

    #[error("start is not allowed from inside event processing")]
    StartWhileProcessing,

    #[error("machine is already processing an event and pending events are rejected; event {event}")]
    PendingEventRejected { event: String },

    #[error("event {event} matched no transition")]
    IgnoredEventRejected { event: String },

    #[error("multiple transitions match {event} at state '{state}': {transitions:?}")]
    MultipleTransitionsMatch {
        state: String,
        event: String,
        transitions: Vec<String>,
    },

    #[error("states {states:?} cannot be current simultaneously: no common ancestor with parallel child mode")]
    NoCommonParallelAncestor { states: Vec<String> },

    #[error("entry path would need exclusive state '{state}' to have both '{first}' and '{second}' current")]
    AmbiguousEntryBranch {
        state: String,
        first: String,
        second: String,
    },

    #[error("target state '{0}' belongs to a different machine or to a nested machine's internals")]
    ForeignTarget(String),

    #[error("parallel target set must resolve to at least two distinct states")]
    TooFewParallelTargets,

    #[error("initial pseudo-state of '{state}' did not resolve to a concrete state for event {event}")]
    UnresolvedInitial { state: String, event: String },

    #[error("data state '{state}' could not obtain a value of type {type_name} from event {event}")]
    DataExtractionFailed {
        state: String,
        type_name: &'static str,
        event: String,
    },

    #[error("listener failed: {0}")]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ProcessingError {
    /// Whether the error leaves the tree's bookkeeping untrustworthy. Fatal
    /// errors destroy the machine; the rest leave it running.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProcessingError::MultipleTransitionsMatch { .. }
                | ProcessingError::NoCommonParallelAncestor { .. }
                | ProcessingError::AmbiguousEntryBranch { .. }
                | ProcessingError::ForeignTarget(_)
                | ProcessingError::TooFewParallelTargets
                | ProcessingError::UnresolvedInitial { .. }
                | ProcessingError::DataExtractionFailed { .. }
        )
    }
}
