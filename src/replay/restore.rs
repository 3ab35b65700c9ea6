//! Replaying a recorded event log against a fresh machine.

use std::fmt;

use crate::core::event::StartEvent;
use crate::machine::{EventRef, StateMachine};
use crate::replay::error::{RestorationWarning, RestoreError};
use crate::replay::{Record, RecordedEvents};

/// Decides whether accumulated warnings abort the restoration.
pub enum RestorationValidator {
    /// Any warning (or failed replay) is an error. The default.
    Strict,
    /// Warnings are returned as data and never escalate.
    Lenient,
    /// Custom policy over the finished result.
    Custom(Box<dyn Fn(&RestorationResult) -> Result<(), RestoreError> + Send>),
}

impl fmt::Debug for RestorationValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestorationValidator::Strict => "Strict",
            RestorationValidator::Lenient => "Lenient",
            RestorationValidator::Custom(_) => "Custom",
        };
        write!(f, "RestorationValidator::{name}")
    }
}

/// How a restoration run behaves.
#[derive(Debug)]
pub struct RestoreOptions {
    /// Compare structural checksums before replaying. Disabling this skips
    /// the compatibility gate entirely.
    pub verify_structure: bool,
    /// Suppress listener notifications while replaying.
    pub mute_listeners: bool,
    pub validator: RestorationValidator,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            verify_structure: true,
            mute_listeners: true,
            validator: RestorationValidator::Strict,
        }
    }
}

/// Outcome of a completed replay.
#[derive(Debug, Default)]
pub struct RestorationResult {
    pub warnings: Vec<RestorationWarning>,
    pub replayed: usize,
}

impl StateMachine {
    /// Replay a recorded log with default options: checksum verified,
    /// listeners muted, strict validation.
    pub fn restore(&mut self, recorded: &RecordedEvents) -> Result<RestorationResult, RestoreError> {
        self.restore_with(recorded, RestoreOptions::default())
    }

    /// Replay a recorded log against this freshly built machine.
    ///
    /// The first record is always the recorded start event and actually
    /// starts the machine with its original argument; every later record
    /// goes through ordinary event processing, re-running guards and
    /// direction functions live. Result divergence becomes a
    /// [`RestorationWarning`], judged by the configured validator.
    pub fn restore_with(
        &mut self,
        recorded: &RecordedEvents,
        options: RestoreOptions,
    ) -> Result<RestorationResult, RestoreError> {
        if self.is_destroyed() {
            return Err(RestoreError::Processing(
                crate::core::ProcessingError::MachineDestroyed,
            ));
        }
        if self.has_started_once {
            return Err(RestoreError::MachineAlreadyUsed);
        }
        if recorded.records.is_empty() {
            return Err(RestoreError::EmptyRecording);
        }
        if options.verify_structure {
            let actual = self.structure_hash();
            if actual != recorded.structure_hash {
                return Err(RestoreError::StructureMismatch {
                    recorded: recorded.structure_hash,
                    actual,
                });
            }
        }

        let muting = options.mute_listeners;
        if muting {
            if self.muted {
                return Err(RestoreError::MutedSectionReentered);
            }
            self.muted = true;
        }
        log::debug!(
            "'{}' restoring {} recorded event(s)",
            self.name(),
            recorded.records.len()
        );
        let outcome = self.replay_records(&recorded.records);
        if muting {
            self.muted = false;
        }
        let result = outcome?;

        match &options.validator {
            RestorationValidator::Strict if !result.warnings.is_empty() => {
                Err(RestoreError::ValidationFailed {
                    warnings: result.warnings,
                })
            }
            RestorationValidator::Custom(validate) => {
                validate(&result)?;
                Ok(result)
            }
            _ => Ok(result),
        }
    }

    fn replay_records(&mut self, records: &[Record]) -> Result<RestorationResult, RestoreError> {
        let mut result = RestorationResult::default();
        for (index, record) in records.iter().enumerate() {
            if index == 0 {
                if !record.event.is::<StartEvent>() {
                    return Err(RestoreError::FirstRecordNotStart(record.event.describe()));
                }
                self.start_with(record.argument.clone())?;
                result.replayed += 1;
                continue;
            }
            // A later start record means the log spans a stop/restart session.
            if record.event.is::<StartEvent>() && !self.is_running() {
                self.start_with(record.argument.clone())?;
                result.replayed += 1;
                continue;
            }
            let actual = self.process(EventRef::from_arc(
                record.event.clone(),
                record.argument.clone(),
            ))?;
            result.replayed += 1;
            if actual != record.result {
                result.warnings.push(RestorationWarning {
                    index,
                    event: record.event.describe(),
                    expected: record.result,
                    actual,
                });
            }
        }
        Ok(result)
    }
}
