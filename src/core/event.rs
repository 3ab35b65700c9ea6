//! Events, event arguments, and event matchers.
//!
//! The engine is event-driven: every state change is caused by an [`Event`]
//! handed to the machine. Events are plain Rust types; matching against a
//! transition is an explicit runtime type-check at dispatch, optionally
//! refined by a predicate.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::core::state::StateId;

/// An event processed by a state machine.
///
/// Any `'static` type can act as an event; the only ceremony is the
/// [`as_any`](Event::as_any) accessor used for runtime type dispatch.
///
/// # Example
///
/// ```rust
/// use std::any::Any;
/// use strata::Event;
///
/// #[derive(Debug)]
/// struct SwitchEvent;
///
/// impl Event for SwitchEvent {
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
/// ```
pub trait Event: Any + fmt::Debug + Send + Sync {
    /// View of the event as [`Any`], used by matchers and data extraction.
    fn as_any(&self) -> &dyn Any;
}

impl dyn Event {
    /// Check whether the event's runtime type is `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }

    /// Downcast the event to a concrete type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Short type name for log and error messages.
    pub fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// Extra payload travelling with an event through one processing call.
///
/// Visible to guards, choice functions, direction functions, data-state
/// extraction and listeners.
pub type EventArgument = Arc<dyn Any + Send + Sync>;

/// Borrowed view of the (event, argument) pair, passed to guards, choice
/// functions and direction functions at resolution time.
pub struct EventCtx<'a> {
    pub event: &'a dyn Event,
    pub argument: Option<&'a EventArgument>,
}

impl<'a> EventCtx<'a> {
    /// Downcast the event to a concrete type.
    pub fn event_as<E: Event>(&self) -> Option<&E> {
        self.event.downcast_ref::<E>()
    }

    /// Downcast the argument to a concrete type.
    pub fn argument_as<T: Any>(&self) -> Option<&T> {
        self.argument.and_then(|a| a.as_ref().downcast_ref::<T>())
    }
}

/// Matches an incoming event against a transition.
///
/// Two explicit policies exist: a plain runtime-type match
/// ([`EventMatcher::of`]) and a type match refined by a predicate over the
/// concrete event ([`EventMatcher::matching`]). [`EventMatcher::any`] accepts
/// every event.
pub struct EventMatcher {
    description: &'static str,
    kind: MatcherKind,
}

enum MatcherKind {
    Any,
    OfType(TypeId),
    Predicate {
        type_id: TypeId,
        check: Box<dyn Fn(&dyn Event) -> bool + Send + Sync>,
    },
}

impl EventMatcher {
    /// Accept every event.
    pub fn any() -> Self {
        Self {
            description: "any event",
            kind: MatcherKind::Any,
        }
    }

    /// Accept events whose runtime type is `E`.
    pub fn of<E: Event>() -> Self {
        Self {
            description: std::any::type_name::<E>(),
            kind: MatcherKind::OfType(TypeId::of::<E>()),
        }
    }

    /// Accept events of type `E` for which `check` returns `true`.
    ///
    /// This is the equality-style matcher: the predicate typically compares
    /// event fields against expected values.
    pub fn matching<E, F>(check: F) -> Self
    where
        E: Event,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            description: std::any::type_name::<E>(),
            kind: MatcherKind::Predicate {
                type_id: TypeId::of::<E>(),
                check: Box::new(move |event| event.downcast_ref::<E>().is_some_and(&check)),
            },
        }
    }

    /// Evaluate the matcher against an event.
    pub fn matches(&self, event: &dyn Event) -> bool {
        match &self.kind {
            MatcherKind::Any => true,
            MatcherKind::OfType(id) => event.as_any().type_id() == *id,
            MatcherKind::Predicate { type_id, check } => {
                event.as_any().type_id() == *type_id && check(event)
            }
        }
    }

    /// The matched event type's name, for diagnostics.
    pub fn description(&self) -> &'static str {
        self.description
    }
}

impl fmt::Debug for EventMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventMatcher({})", self.description)
    }
}

/// Synthesized when a machine starts; carries the start argument.
#[derive(Debug)]
pub struct StartEvent;

/// Stops a running machine when processed.
#[derive(Debug)]
pub struct StopEvent;

/// Destroys a machine when processed. Permitted while not running so that a
/// never-started machine can still be torn down.
#[derive(Debug)]
pub struct DestroyEvent;

/// Synthesized internally when a composite state finishes; never recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedEvent {
    /// The state whose completion condition was met.
    pub state: StateId,
}

/// Requests navigation back to the previously active configuration.
/// Only meaningful when undo is enabled in the machine configuration.
#[derive(Debug)]
pub struct UndoEvent;

/// Presented to listeners during an undo navigation, wrapping the event that
/// originally produced the configuration being returned to.
pub struct WrappedEvent {
    pub original: Arc<dyn Event>,
    pub argument: Option<EventArgument>,
}

impl fmt::Debug for WrappedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedEvent")
            .field("original", &self.original)
            .field("has_argument", &self.argument.is_some())
            .finish()
    }
}

/// Synthetic event handed to direction functions by
/// [`preview_direction`](crate::StateMachine::preview_direction). Exporters
/// only; never used for real processing.
#[derive(Debug)]
pub struct ExportPreviewEvent;

impl Event for StartEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for StopEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for DestroyEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for FinishedEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for UndoEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for WrappedEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for ExportPreviewEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping;

    #[derive(Debug, PartialEq)]
    struct Count(u32);

    impl Event for Ping {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Event for Count {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn any_matcher_accepts_everything() {
        let matcher = EventMatcher::any();
        assert!(matcher.matches(&Ping));
        assert!(matcher.matches(&Count(3)));
    }

    #[test]
    fn type_matcher_accepts_only_its_type() {
        let matcher = EventMatcher::of::<Ping>();
        assert!(matcher.matches(&Ping));
        assert!(!matcher.matches(&Count(3)));
    }

    #[test]
    fn predicate_matcher_checks_type_and_value() {
        let matcher = EventMatcher::matching::<Count, _>(|c| c.0 > 10);
        assert!(matcher.matches(&Count(11)));
        assert!(!matcher.matches(&Count(10)));
        assert!(!matcher.matches(&Ping));
    }

    #[test]
    fn event_downcast_roundtrip() {
        let event: &dyn Event = &Count(7);
        assert!(event.is::<Count>());
        assert_eq!(event.downcast_ref::<Count>(), Some(&Count(7)));
        assert!(event.downcast_ref::<Ping>().is_none());
    }

    #[test]
    fn ctx_exposes_event_and_argument() {
        let arg: EventArgument = Arc::new(42_u32);
        let ctx = EventCtx {
            event: &Ping,
            argument: Some(&arg),
        };
        assert!(ctx.event_as::<Ping>().is_some());
        assert_eq!(ctx.argument_as::<u32>(), Some(&42));
        assert!(ctx.argument_as::<String>().is_none());
    }
}
