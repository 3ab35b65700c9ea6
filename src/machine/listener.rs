//! Machine listeners and structural notifications.
//!
//! All observation goes through one closed notification type dispatched to
//! registered listeners. Listeners receive a mutable handle to the machine;
//! calling back into `process_event` from inside a callback is the re-entrant
//! path handled by the pending-event queue, not an error in itself.
//!
//! Listener failures are never raised from inside the notification loop: the
//! loop finishes notifying everyone for the current step, and the collected
//! errors are handed to the listener exception handler afterwards.

use std::fmt;
use std::sync::Arc;

use crate::core::event::{Event, EventArgument};
use crate::core::state::StateId;
use crate::core::transition::TransitionKind;
use crate::core::ListenerResult;
use crate::machine::StateMachine;

/// Handle for removing a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Owned (event, argument) pair carried by notifications and records.
#[derive(Clone)]
pub struct EventRef {
    pub event: Arc<dyn Event>,
    pub argument: Option<EventArgument>,
}

impl EventRef {
    pub(crate) fn new<E: Event>(event: E, argument: Option<EventArgument>) -> Self {
        Self {
            event: Arc::new(event),
            argument,
        }
    }

    pub(crate) fn from_arc(event: Arc<dyn Event>, argument: Option<EventArgument>) -> Self {
        Self { event, argument }
    }

    /// Downcast the carried event.
    pub fn event_as<E: Event>(&self) -> Option<&E> {
        self.event.downcast_ref::<E>()
    }
}

impl fmt::Debug for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRef")
            .field("event", &self.event)
            .field("has_argument", &self.argument.is_some())
            .finish()
    }
}

/// Details of a triggered transition, shared by the triggered and complete
/// notifications.
#[derive(Clone, Debug)]
pub struct TransitionInfo {
    pub source: StateId,
    /// Resolved, concrete targets; empty for a stay transition.
    pub targets: Vec<StateId>,
    pub kind: TransitionKind,
    pub name: Option<String>,
    pub event: EventRef,
}

/// Structural notification emitted during event processing.
///
/// Within one processing call notifications fire in a fixed order: transition
/// triggered, exits (innermost first), entries (outermost first), finish
/// notifications (bottom-up), transition complete.
#[derive(Clone, Debug)]
pub enum Notification {
    Started { event: EventRef },
    TransitionTriggered { transition: TransitionInfo },
    TransitionComplete { transition: TransitionInfo },
    StateEntry { state: StateId, event: EventRef },
    StateExit { state: StateId, event: EventRef },
    StateFinished { state: StateId, event: EventRef },
    Stopped,
    Destroyed,
}

/// Observer of a machine's structural notifications.
///
/// Implemented directly, or registered as a closure via
/// [`add_listener_fn`](StateMachine::add_listener_fn).
pub trait MachineListener: Send {
    fn on_notification(
        &mut self,
        machine: &mut StateMachine,
        notification: &Notification,
    ) -> ListenerResult;
}

/// Adapter registered by [`add_listener_fn`](StateMachine::add_listener_fn).
pub(crate) struct FnListener<F>(pub(crate) F);

impl<F> MachineListener for FnListener<F>
where
    F: FnMut(&mut StateMachine, &Notification) -> ListenerResult + Send,
{
    fn on_notification(
        &mut self,
        machine: &mut StateMachine,
        notification: &Notification,
    ) -> ListenerResult {
        (self.0)(machine, notification)
    }
}

pub(crate) struct ListenerEntry {
    pub(crate) id: ListenerId,
    pub(crate) listener: Box<dyn MachineListener>,
}

/// Which hook a state-scoped listener reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StateHook {
    Entry,
    Exit,
    Finished,
}

/// Adapter turning a state-scoped closure into a machine listener.
pub(crate) struct StateHookListener<F> {
    pub(crate) state: StateId,
    pub(crate) hook: StateHook,
    pub(crate) callback: F,
}

impl<F> MachineListener for StateHookListener<F>
where
    F: FnMut(&mut StateMachine, &EventRef) -> ListenerResult + Send,
{
    fn on_notification(
        &mut self,
        machine: &mut StateMachine,
        notification: &Notification,
    ) -> ListenerResult {
        let (state, event) = match notification {
            Notification::StateEntry { state, event } if self.hook == StateHook::Entry => {
                (*state, event)
            }
            Notification::StateExit { state, event } if self.hook == StateHook::Exit => {
                (*state, event)
            }
            Notification::StateFinished { state, event } if self.hook == StateHook::Finished => {
                (*state, event)
            }
            _ => return Ok(()),
        };
        if state == self.state {
            (self.callback)(machine, event)
        } else {
            Ok(())
        }
    }
}
