//! The event-processing loop: matching, firing, lifecycle, pending queue.
//!
//! One `process_event` call is one critical section. Re-entrant calls from
//! listener callbacks are handed to the pending-event path: rejected by
//! default, or buffered FIFO and drained by an explicit trampoline loop once
//! the outer call completes (never by recursion), provided the machine is
//! still running at drain time.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::error::{ListenerError, ProcessingError};
use crate::core::event::{DestroyEvent, Event, EventArgument, StartEvent, StopEvent, UndoEvent};
use crate::core::state::StateId;
use crate::machine::listener::{EventRef, Notification, TransitionInfo};
use crate::machine::resolver::ResolvedDirection;
use crate::machine::{MachineStatus, StateMachine, ROOT};

/// Outcome of one `process_event` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingResult {
    /// The event was queued for processing after the current call completes.
    Pending,
    /// A transition fired, or a lifecycle event was handled.
    Processed,
    /// No transition matched.
    Ignored,
}

/// A matched transition, resolved and ready to fire.
pub(crate) struct TransitionMatch {
    pub(crate) source: u32,
    pub(crate) transition: usize,
    /// `None` for a stay direction.
    pub(crate) targets: Option<Vec<u32>>,
}

impl StateMachine {
    // ---- lifecycle ---------------------------------------------------------

    /// Start the machine and enter its initial configuration.
    pub fn start(&mut self) -> Result<(), ProcessingError> {
        self.start_with(None)
    }

    /// Start with an argument visible to guards, entry listeners and data
    /// extraction along the initial path.
    pub fn start_with(&mut self, argument: Option<EventArgument>) -> Result<(), ProcessingError> {
        if self.is_destroyed() {
            return Err(ProcessingError::MachineDestroyed);
        }
        if self.is_running() {
            return Err(ProcessingError::AlreadyRunning);
        }
        if self.processing {
            return Err(ProcessingError::StartWhileProcessing);
        }
        self.validate_structure()?;

        if self.status == MachineStatus::Stopped {
            if let Some(recorder) = &mut self.recorder {
                recorder.on_restart();
            }
        }
        self.status = MachineStatus::Running;
        self.has_started_once = true;
        self.metadata.started_at = Some(Utc::now());
        log::debug!("'{}' started", self.name());

        let event = EventRef::new(StartEvent, argument);
        self.processing = true;
        let mut outcome = self.start_step(event);
        if outcome.is_ok() {
            outcome = self.drain_pending().map(|_| ());
        }
        self.processing = false;
        outcome
    }

    fn start_step(&mut self, event: EventRef) -> Result<(), ProcessingError> {
        self.nodes[ROOT as usize].active = true;
        self.notify(&Notification::Started {
            event: event.clone(),
        });
        let run = self
            .enter_initial(ROOT, &event)
            .and_then(|_| self.drain_finished_events(&event));
        match run {
            Ok(()) => {
                self.metadata.processed_events += 1;
                self.record(&event, ProcessingResult::Processed);
                if self.config().enable_undo {
                    self.push_undo_entry(event);
                }
                self.flush_delayed_errors()
            }
            Err(error) => {
                if error.is_fatal() {
                    self.do_destroy(true);
                }
                self.discard_delayed_errors();
                Err(error)
            }
        }
    }

    /// Stop the machine: the whole tree exits (exit hooks still fire) and
    /// processing halts until restarted.
    pub fn stop(&mut self) -> Result<ProcessingResult, ProcessingError> {
        self.process(EventRef::new(StopEvent, None))
    }

    /// Destroy the machine irreversibly, stopping it first if running.
    pub fn destroy(&mut self) -> Result<ProcessingResult, ProcessingError> {
        self.process(EventRef::new(DestroyEvent, None))
    }

    pub(crate) fn do_stop(&mut self) -> Result<(), ProcessingError> {
        log::debug!("'{}' stopping", self.name());
        let event = EventRef::new(StopEvent, None);
        self.exit_active_children(ROOT, &event)?;
        let root = &mut self.nodes[ROOT as usize];
        root.active = false;
        root.finished = false;
        root.current = None;
        self.status = MachineStatus::Stopped;
        self.pending.clear();
        self.finished_queue.clear();
        self.undo_stack.clear();
        self.notify(&Notification::Stopped);
        Ok(())
    }

    pub(crate) fn do_destroy(&mut self, stop_first: bool) {
        if self.is_destroyed() {
            return;
        }
        log::debug!("'{}' destroying", self.name());
        if stop_first && self.is_running() {
            // Best-effort: a failing exit hook must not keep the machine alive.
            if let Err(error) = self.do_stop() {
                log::warn!("'{}' failed to stop during destroy: {error}", self.name());
            }
        }
        self.notify(&Notification::Destroyed);
        for node in &mut self.nodes {
            node.active = false;
            node.finished = false;
            node.current = None;
            match &mut node.kind {
                crate::machine::NodeKind::Machine(inner) => inner.do_destroy(true),
                crate::machine::NodeKind::Data { value, last, .. } => {
                    *value = None;
                    *last = None;
                }
                crate::machine::NodeKind::History { stored, .. } => stored.clear(),
                _ => {}
            }
        }
        self.clear_listeners();
        self.pending.clear();
        self.finished_queue.clear();
        self.undo_stack.clear();
        self.delayed_errors.clear();
        self.status = MachineStatus::Destroyed;
    }

    /// Borrow a nested machine embedded with [`State::machine`](crate::State::machine).
    pub fn nested_machine(&self, state: StateId) -> Option<&StateMachine> {
        let index = self.index_of(state)?;
        match &self.nodes[index as usize].kind {
            crate::machine::NodeKind::Machine(inner) => Some(inner),
            _ => None,
        }
    }

    /// Mutably borrow a nested machine, e.g. to feed it its own events.
    pub fn nested_machine_mut(&mut self, state: StateId) -> Option<&mut StateMachine> {
        let index = self.index_of(state)?;
        match &mut self.nodes[index as usize].kind {
            crate::machine::NodeKind::Machine(inner) => Some(inner),
            _ => None,
        }
    }

    // ---- event intake ------------------------------------------------------

    /// Process an event against the active configuration.
    pub fn process_event(&mut self, event: impl Event) -> Result<ProcessingResult, ProcessingError> {
        self.process(EventRef::new(event, None))
    }

    /// Process an event with an argument visible to guards, direction
    /// functions, listeners and data extraction.
    pub fn process_event_with(
        &mut self,
        event: impl Event,
        argument: EventArgument,
    ) -> Result<ProcessingResult, ProcessingError> {
        self.process(EventRef::new(event, Some(argument)))
    }

    pub(crate) fn process(&mut self, event: EventRef) -> Result<ProcessingResult, ProcessingError> {
        if self.is_destroyed() {
            return Err(ProcessingError::MachineDestroyed);
        }
        let lifecycle =
            event.event.is::<StopEvent>() || event.event.is::<DestroyEvent>();
        if !self.is_running() && !lifecycle {
            return Err(ProcessingError::NotRunning);
        }
        if self.processing {
            return if self.config().queue_pending_events {
                log::debug!("queueing re-entrant event {:?}", event.event);
                self.pending.push_back(event);
                Ok(ProcessingResult::Pending)
            } else {
                Err(ProcessingError::PendingEventRejected {
                    event: event.event.describe(),
                })
            };
        }

        self.processing = true;
        let mut outcome = self.step(event);
        if outcome.is_ok() {
            if let Err(error) = self.drain_pending() {
                outcome = Err(error);
            }
        }
        self.processing = false;
        outcome
    }

    /// Trampoline over the pending queue. The queue is discarded if the
    /// machine is no longer running when its turn comes.
    fn drain_pending(&mut self) -> Result<ProcessingResult, ProcessingError> {
        let mut last = ProcessingResult::Processed;
        while let Some(next) = self.pending.pop_front() {
            if !self.is_running() {
                self.pending.clear();
                break;
            }
            last = self.step(next)?;
        }
        Ok(last)
    }

    /// One processing step: dispatch, record, then surface delayed listener
    /// errors. Fatal errors destroy the machine best-effort and propagate.
    fn step(&mut self, event: EventRef) -> Result<ProcessingResult, ProcessingError> {
        match self.dispatch(&event) {
            Ok(result) => {
                self.metadata.processed_events += 1;
                self.record(&event, result);
                self.flush_delayed_errors()?;
                Ok(result)
            }
            Err(error) => {
                if error.is_fatal() {
                    log::error!("'{}' fatal processing error: {error}", self.name());
                    self.do_destroy(true);
                }
                self.discard_delayed_errors();
                Err(error)
            }
        }
    }

    fn dispatch(&mut self, event: &EventRef) -> Result<ProcessingResult, ProcessingError> {
        if event.event.is::<DestroyEvent>() {
            self.do_destroy(true);
            return Ok(ProcessingResult::Processed);
        }
        if event.event.is::<StopEvent>() {
            return if self.is_running() {
                self.do_stop()?;
                Ok(ProcessingResult::Processed)
            } else {
                Ok(ProcessingResult::Ignored)
            };
        }
        if self.config().enable_undo && event.event.is::<UndoEvent>() {
            return self.do_undo(event);
        }
        if self.nodes[ROOT as usize].finished {
            // A finished machine only reacts to lifecycle events.
            return self.ignored(event);
        }

        let matches = self.find_matches(event)?;
        if matches.is_empty() {
            return self.ignored(event);
        }
        for matched in matches {
            // A winner in one parallel region may have exited another
            // winner's source; skip those.
            if !self.nodes[matched.source as usize].active {
                continue;
            }
            self.fire(matched, event)?;
        }
        self.drain_finished_events(event)?;
        Ok(ProcessingResult::Processed)
    }

    fn ignored(&mut self, event: &EventRef) -> Result<ProcessingResult, ProcessingError> {
        log::debug!("'{}' ignored event {:?}", self.name(), event.event);
        if self.config().fail_on_ignored_events {
            Err(ProcessingError::IgnoredEventRejected {
                event: event.event.describe(),
            })
        } else {
            Ok(ProcessingResult::Ignored)
        }
    }

    // ---- matching ----------------------------------------------------------

    /// Find the transitions to fire for an event: bottom-up from every active
    /// leaf, first matching state per branch wins, ancestors shared between
    /// branches are examined once. More than one targetable match at a single
    /// state is an error unless `first_match_wins` relaxes it.
    pub(crate) fn find_matches(
        &mut self,
        event: &EventRef,
    ) -> Result<Vec<TransitionMatch>, ProcessingError> {
        let leaves = self.active_leaf_indices();
        let mut visited = vec![false; self.nodes.len()];
        let mut winners = Vec::new();
        let mut guard_errors: Vec<ListenerError> = Vec::new();

        'leaves: for leaf in leaves {
            let mut cursor = Some(leaf);
            while let Some(index) = cursor {
                if visited[index as usize] {
                    continue 'leaves;
                }
                visited[index as usize] = true;

                let found = self.matches_at(index, event, &mut guard_errors)?;
                if !found.is_empty() {
                    let targetable: Vec<&(usize, ResolvedDirection)> = found
                        .iter()
                        .filter(|(_, direction)| {
                            matches!(direction, ResolvedDirection::Targets(_))
                        })
                        .collect();
                    if targetable.len() > 1 && !self.config().first_match_wins {
                        let node = &self.nodes[index as usize];
                        let names = targetable
                            .iter()
                            .map(|(i, _)| match &node.transitions[*i].name {
                                Some(name) => name.clone(),
                                None => node.transitions[*i].matcher.description().to_owned(),
                            })
                            .collect();
                        self.delayed_errors.extend(guard_errors);
                        return Err(ProcessingError::MultipleTransitionsMatch {
                            state: self.display_name(index),
                            event: event.event.describe(),
                            transitions: names,
                        });
                    }
                    let (transition, direction) = match targetable.first() {
                        Some(entry) => (entry.0, entry.1.clone()),
                        None => found[0].clone(),
                    };
                    winners.push(TransitionMatch {
                        source: index,
                        transition,
                        targets: match direction {
                            ResolvedDirection::Targets(targets) => Some(targets),
                            _ => None,
                        },
                    });
                    continue 'leaves;
                }
                cursor = self.nodes[index as usize].parent;
            }
        }

        self.delayed_errors.extend(guard_errors);
        Ok(winners)
    }

    /// Evaluate every transition declared on one state: matcher, then guard,
    /// then lazily-produced direction, all evaluated only now, at resolution time.
    fn matches_at(
        &self,
        index: u32,
        event: &EventRef,
        guard_errors: &mut Vec<ListenerError>,
    ) -> Result<Vec<(usize, ResolvedDirection)>, ProcessingError> {
        let ctx = self.event_ctx(event);
        let node = &self.nodes[index as usize];
        let mut found = Vec::new();
        for (i, transition) in node.transitions.iter().enumerate() {
            if !transition.matcher.matches(&*event.event) {
                continue;
            }
            let guard_passed = match &transition.guard {
                None => true,
                Some(guard) => match guard(&ctx) {
                    Ok(passed) => passed,
                    Err(error) => {
                        // A failing guard counts as false; the error is
                        // surfaced through the listener exception path.
                        guard_errors.push(error);
                        false
                    }
                },
            };
            if !guard_passed {
                continue;
            }
            let direction = (transition.direction)(&ctx);
            let resolved = self.resolve_direction(direction, &ctx)?;
            if resolved == ResolvedDirection::NoTransition {
                continue;
            }
            found.push((i, resolved));
            if self.config().first_match_wins {
                break;
            }
        }
        Ok(found)
    }

    /// Fire a matched transition: triggered notification, exit/entry along
    /// the resolved path, complete notification, undo bookkeeping.
    pub(crate) fn fire(
        &mut self,
        matched: TransitionMatch,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        let (kind, name, argument_override) = {
            let transition =
                &self.nodes[matched.source as usize].transitions[matched.transition];
            (
                transition.kind,
                transition.name.clone(),
                transition.argument.clone(),
            )
        };
        let effective = match argument_override {
            Some(argument) => EventRef::from_arc(event.event.clone(), Some(argument)),
            None => event.clone(),
        };
        let target_ids: Vec<StateId> = matched
            .targets
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|&target| self.sid(target))
            .collect();
        let info = TransitionInfo {
            source: self.sid(matched.source),
            targets: target_ids,
            kind,
            name,
            event: effective.clone(),
        };
        log::debug!(
            "'{}': {:?} triggers transition from '{}'",
            self.name(),
            effective.event,
            self.display_name(matched.source)
        );

        self.notify(&Notification::TransitionTriggered {
            transition: info.clone(),
        });
        if let Some(targets) = &matched.targets {
            self.execute_transition(matched.source, targets, kind, &effective)?;
        }
        self.notify(&Notification::TransitionComplete { transition: info });
        if self.config().enable_undo && matched.targets.is_some() {
            self.push_undo_entry(effective);
        }
        Ok(())
    }

    // ---- delayed listener errors -------------------------------------------

    /// Hand accumulated listener errors to the installed handler, or return
    /// the first one. Either way the machine stays running.
    fn flush_delayed_errors(&mut self) -> Result<(), ProcessingError> {
        if self.delayed_errors.is_empty() {
            return Ok(());
        }
        let errors = std::mem::take(&mut self.delayed_errors);
        match &mut self.listener_error_handler {
            Some(handler) => {
                for error in &errors {
                    handler(error);
                }
                Ok(())
            }
            None => match errors.into_iter().next() {
                Some(first) => Err(ProcessingError::Listener(first)),
                None => Ok(()),
            },
        }
    }

    fn discard_delayed_errors(&mut self) {
        if self.delayed_errors.is_empty() {
            return;
        }
        let errors = std::mem::take(&mut self.delayed_errors);
        if let Some(handler) = &mut self.listener_error_handler {
            for error in &errors {
                handler(error);
            }
        }
    }

    fn record(&mut self, event: &EventRef, result: ProcessingResult) {
        if let Some(recorder) = &mut self.recorder {
            recorder.record(event, result);
        }
    }
}
