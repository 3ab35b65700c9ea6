//! Event-sourced persistence: recording processed events and replaying them
//! against a structurally equivalent machine.
//!
//! The recorder stores primitive events, not resolved decisions: replay
//! re-runs every guard, choice and direction function live, which is what
//! lets conditional logic consult application state, and why divergence is
//! surfaced as warnings instead of being impossible.
//!
//! [`RecordedEvents`] is serialization-agnostic; wire formats are an external
//! concern. The [`RecordingSummary`] envelope is serializable for layers that
//! persist metadata alongside their own event encoding.

mod checksum;
mod restore;

pub mod error;

pub use error::{RestoreError, RestorationWarning};
pub use restore::{RestorationResult, RestorationValidator, RestoreOptions};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::event::{Event, EventArgument};
use crate::machine::{EventRef, ProcessingResult, StateMachine};

/// What the recorder keeps and when it resets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Leave events that matched nothing out of the log.
    pub skip_ignored: bool,
    /// Reset the log on a stop-then-start restart, so replay always begins
    /// at the latest session's start event.
    pub clear_on_restart: bool,
}

/// One processed event and its outcome.
#[derive(Clone)]
pub struct Record {
    /// The original, unwrapped event.
    pub event: Arc<dyn Event>,
    pub argument: Option<EventArgument>,
    pub result: ProcessingResult,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("event", &self.event)
            .field("result", &self.result)
            .field("has_argument", &self.argument.is_some())
            .finish()
    }
}

/// An ordered event log gated by the structural checksum of the tree that
/// produced it. Copies share the underlying events, so a clone is an
/// equality-preserving copy of the log.
#[derive(Clone, Debug)]
pub struct RecordedEvents {
    pub structure_hash: i64,
    pub records: Vec<Record>,
}

impl RecordedEvents {
    /// Serializable view of the log's metadata.
    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            structure_hash: self.structure_hash,
            events: self
                .records
                .iter()
                .map(|record| record.event.describe())
                .collect(),
            results: self.records.iter().map(|record| record.result).collect(),
        }
    }
}

/// Metadata envelope of a recording, for external persistence layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub structure_hash: i64,
    pub events: Vec<String>,
    pub results: Vec<ProcessingResult>,
}

pub(crate) struct EventRecorder {
    config: RecorderConfig,
    records: Vec<Record>,
}

impl EventRecorder {
    pub(crate) fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            records: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, event: &EventRef, result: ProcessingResult) {
        if result == ProcessingResult::Ignored && self.config.skip_ignored {
            return;
        }
        self.records.push(Record {
            event: event.event.clone(),
            argument: event.argument.clone(),
            result,
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn on_restart(&mut self) {
        if self.config.clear_on_restart {
            self.records.clear();
        }
    }
}

impl StateMachine {
    /// The events recorded so far, or `None` when recording is not enabled.
    pub fn recorded_events(&self) -> Option<RecordedEvents> {
        self.recorder.as_ref().map(|recorder| RecordedEvents {
            structure_hash: self.structure_hash(),
            records: recorder.records.clone(),
        })
    }
}
