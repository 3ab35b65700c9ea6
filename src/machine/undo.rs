//! Undo navigation over previously active configurations.
//!
//! With undo enabled, the machine stacks the leaf configuration reached by
//! every state-changing step together with the event that produced it.
//! Processing an [`UndoEvent`](crate::UndoEvent) pops the stack and navigates
//! back to the previous configuration; listeners observe the navigation
//! through a [`WrappedEvent`](crate::WrappedEvent) carrying the event that
//! originally led there, so the wrapped and unwrapped views stay consistent.

use std::sync::Arc;

use crate::core::error::ProcessingError;
use crate::core::event::{Event, WrappedEvent};
use crate::core::transition::TransitionKind;
use crate::machine::listener::EventRef;
use crate::machine::processing::ProcessingResult;
use crate::machine::{StateMachine, ROOT};

pub(crate) struct UndoEntry {
    /// Active leaf configuration after the step.
    pub(crate) leaves: Vec<u32>,
    /// The event whose processing produced that configuration.
    pub(crate) event: EventRef,
}

impl StateMachine {
    /// Direct-call form of processing an [`UndoEvent`](crate::UndoEvent).
    pub fn undo(&mut self) -> Result<ProcessingResult, ProcessingError> {
        self.process(EventRef::new(crate::core::event::UndoEvent, None))
    }

    /// Snapshot the configuration reached by a state-changing step.
    pub(crate) fn push_undo_entry(&mut self, event: EventRef) {
        let leaves = self.active_leaf_indices();
        self.undo_stack.push(UndoEntry { leaves, event });
    }

    /// Navigate back to the previously recorded configuration.
    pub(crate) fn do_undo(
        &mut self,
        event: &EventRef,
    ) -> Result<ProcessingResult, ProcessingError> {
        if self.undo_stack.len() < 2 {
            log::debug!("'{}' has nothing to undo", self.name());
            return self.undo_exhausted(event);
        }
        let _ = self.undo_stack.pop();
        let Some(previous) = self.undo_stack.last() else {
            return self.undo_exhausted(event);
        };
        let targets = previous.leaves.clone();
        let wrapped = EventRef::from_arc(
            Arc::new(WrappedEvent {
                original: previous.event.event.clone(),
                argument: previous.event.argument.clone(),
            }) as Arc<dyn Event>,
            previous.event.argument.clone(),
        );

        let from = self
            .active_leaf_indices()
            .first()
            .copied()
            .unwrap_or(ROOT);
        log::debug!(
            "'{}' undoing to {:?}",
            self.name(),
            targets
                .iter()
                .map(|&t| self.display_name(t))
                .collect::<Vec<_>>()
        );
        self.execute_transition(from, &targets, TransitionKind::Local, &wrapped)?;
        self.drain_finished_events(&wrapped)?;
        Ok(ProcessingResult::Processed)
    }

    fn undo_exhausted(&mut self, event: &EventRef) -> Result<ProcessingResult, ProcessingError> {
        if self.config().fail_on_ignored_events {
            Err(ProcessingError::IgnoredEventRejected {
                event: event.event.describe(),
            })
        } else {
            Ok(ProcessingResult::Ignored)
        }
    }
}
