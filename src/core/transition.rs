//! Transition descriptors and directions.
//!
//! A transition belongs to a source state and matches an event type, with an
//! optional guard. What it does when it fires is decided lazily by its
//! direction function: stay, do nothing, or move to one or more target
//! states. Direction functions run only during event processing, never while
//! the tree is being configured.

use std::fmt;

use crate::core::error::ListenerError;
use crate::core::event::{Event, EventArgument, EventCtx, EventMatcher, FinishedEvent};
use crate::core::state::StateId;

/// Whether a transition between an ancestor and a descendant re-triggers
/// exit and entry of the shared boundary state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransitionKind {
    /// The shared boundary stays active; only the diverging branch below it
    /// exits and re-enters. No observable effect for unrelated states.
    #[default]
    Local,
    /// The shared boundary itself exits and re-enters, even for a
    /// self-transition. Used to "refresh" a state.
    External,
}

/// What a transition decided to do, produced lazily at resolution time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The transition fires but the configuration does not change.
    Stay,
    /// The transition does not fire for this event.
    NoTransition,
    /// Move to the given raw targets (pseudo-states permitted; they are
    /// resolved before execution). The first element is the primary target.
    TargetState { targets: Vec<StateId> },
}

impl Direction {
    /// Single-target direction.
    pub fn target(state: StateId) -> Self {
        Direction::TargetState {
            targets: vec![state],
        }
    }

    /// Multi-target direction for parallel fan-out.
    pub fn parallel(targets: Vec<StateId>) -> Self {
        Direction::TargetState { targets }
    }

    /// The primary (first) target, if any.
    pub fn primary(&self) -> Option<StateId> {
        match self {
            Direction::TargetState { targets } => targets.first().copied(),
            _ => None,
        }
    }
}

/// Guard predicate over the (event, argument) pair.
///
/// A guard failure is not fatal: the guard counts as `false` and the error is
/// delayed into the listener exception path.
pub type GuardFn = Box<dyn Fn(&EventCtx) -> Result<bool, ListenerError> + Send + Sync>;

/// Produces the direction of a transition at resolution time.
pub type DirectionFn = Box<dyn Fn(&EventCtx) -> Direction + Send + Sync>;

/// A transition declared on a source state, consumed by
/// [`add_transition`](crate::StateMachine::add_transition).
///
/// # Example
///
/// ```rust
/// use std::any::Any;
/// use strata::{Event, State, StateMachine, Transition};
///
/// #[derive(Debug)]
/// struct Switch;
/// impl Event for Switch {
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
///
/// let mut machine = StateMachine::new("toggle");
/// let root = machine.root();
/// let on = machine.add_state(root, State::named("on")).unwrap();
/// let off = machine.add_state(root, State::named("off")).unwrap();
/// machine.set_initial_state(root, off).unwrap();
/// machine.add_transition(off, Transition::to::<Switch>(on)).unwrap();
/// machine
///     .add_transition(on, Transition::to::<Switch>(off).named("turn off"))
///     .unwrap();
/// ```
pub struct Transition {
    pub(crate) name: Option<String>,
    pub(crate) matcher: EventMatcher,
    pub(crate) kind: TransitionKind,
    pub(crate) guard: Option<GuardFn>,
    pub(crate) direction: DirectionFn,
    pub(crate) argument: Option<EventArgument>,
    /// Targets known at declaration time; empty for conditional transitions.
    /// Used for early validation and for the visitor/export boundary.
    pub(crate) declared_targets: Vec<StateId>,
}

impl Transition {
    fn with_direction(matcher: EventMatcher, direction: DirectionFn) -> Self {
        Self {
            name: None,
            matcher,
            kind: TransitionKind::default(),
            guard: None,
            direction,
            argument: None,
            declared_targets: Vec::new(),
        }
    }

    /// Transition to `target` on events of type `E`.
    pub fn to<E: Event>(target: StateId) -> Self {
        let mut transition = Self::with_direction(
            EventMatcher::of::<E>(),
            Box::new(move |_| Direction::target(target)),
        );
        transition.declared_targets = vec![target];
        transition
    }

    /// Fire on events of type `E` without changing the configuration.
    pub fn stay<E: Event>() -> Self {
        Self::with_direction(EventMatcher::of::<E>(), Box::new(|_| Direction::Stay))
    }

    /// Match events of type `E` but never fire, leaving the event to be
    /// claimed further up the active chain. Use [`Transition::stay`] on a
    /// descendant to shadow an ancestor's transition outright.
    pub fn none<E: Event>() -> Self {
        Self::with_direction(
            EventMatcher::of::<E>(),
            Box::new(|_| Direction::NoTransition),
        )
    }

    /// Decide the direction at processing time from the (event, argument)
    /// pair.
    pub fn conditional<E, F>(decide: F) -> Self
    where
        E: Event,
        F: Fn(&EventCtx) -> Direction + Send + Sync + 'static,
    {
        Self::with_direction(EventMatcher::of::<E>(), Box::new(decide))
    }

    /// Transition into several parallel regions at once. The targets must
    /// resolve to at least two distinct states under a common parallel
    /// ancestor.
    pub fn to_parallel<E: Event>(targets: Vec<StateId>) -> Self {
        let declared = targets.clone();
        let mut transition = Self::with_direction(
            EventMatcher::of::<E>(),
            Box::new(move |_| Direction::parallel(targets.clone())),
        );
        transition.declared_targets = declared;
        transition
    }

    /// Transition to `target` when `source` reports finished.
    pub fn on_finished(source: StateId, target: StateId) -> Self {
        let mut transition = Self::with_direction(
            EventMatcher::matching::<FinishedEvent, _>(move |event| event.state == source),
            Box::new(move |_| Direction::target(target)),
        );
        transition.declared_targets = vec![target];
        transition
    }

    /// Fully custom matcher and direction function.
    pub fn when<F>(matcher: EventMatcher, decide: F) -> Self
    where
        F: Fn(&EventCtx) -> Direction + Send + Sync + 'static,
    {
        Self::with_direction(matcher, Box::new(decide))
    }

    /// Name the transition. Names must be unique machine-wide.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Guard the transition with a predicate; `false` means no match.
    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&EventCtx) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Box::new(move |ctx| Ok(guard(ctx))));
        self
    }

    /// Guard with a fallible predicate. An `Err` counts as `false` and is
    /// delayed into the listener exception path.
    pub fn with_fallible_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&EventCtx) -> Result<bool, ListenerError> + Send + Sync + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Set the transition kind.
    pub fn with_kind(mut self, kind: TransitionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Shorthand for `with_kind(TransitionKind::External)`.
    pub fn external(self) -> Self {
        self.with_kind(TransitionKind::External)
    }

    /// Attach an argument passed through to entry notifications whenever this
    /// transition fires, overriding the processed event's own argument.
    pub fn with_argument(mut self, argument: EventArgument) -> Self {
        self.argument = Some(argument);
        self
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .field("kind", &self.kind)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// Handle to a transition declared on a state, for the visitor/export
/// boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransitionId {
    pub(crate) state: StateId,
    pub(crate) index: u32,
}

impl TransitionId {
    /// The state the transition is declared on.
    pub fn source(&self) -> StateId {
        self.state
    }
}
