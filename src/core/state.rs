//! State identity and state descriptors.
//!
//! States live in a tree owned by a [`StateMachine`](crate::StateMachine);
//! application code holds [`StateId`] handles into that tree. A handle
//! remembers which machine created it, so using it against another machine
//! (or against a nested machine's internals) is a checkable error instead of
//! silent index aliasing.
//!
//! New states are described with the [`State`] builder and attached with
//! [`add_state`](crate::StateMachine::add_state).

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::event::EventCtx;

/// Identity of one machine instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId(Uuid);

impl MachineId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MachineId({})", &self.0.to_string()[..8])
    }
}

/// Handle to a state inside one machine's tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId {
    pub(crate) machine: MachineId,
    pub(crate) index: u32,
}

impl StateId {
    pub(crate) fn new(machine: MachineId, index: u32) -> Self {
        Self { machine, index }
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateId(#{})", self.index)
    }
}

/// How a composite state treats its children.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildMode {
    /// At most one child is current at a time.
    #[default]
    Exclusive,
    /// All children are concurrently active regions.
    Parallel,
}

/// What a history pseudo-state remembers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    /// The last active direct child of the history's parent.
    Shallow,
    /// The full nested path, down to the last active leaves.
    Deep,
}

/// Resolution function of a choice pseudo-state.
///
/// Returning `None` means the redirection chain bottoms out and the
/// triggering transition resolves to no-transition.
pub type ChoiceFn = Box<dyn Fn(&EventCtx) -> Option<StateId> + Send + Sync>;

/// Payload stored in a data state.
pub type DataValue = Arc<dyn Any + Send + Sync>;

/// Pulls a typed payload out of the (event, argument) pair on entry into a
/// data state.
pub type DataExtractor = Box<dyn Fn(&EventCtx) -> Option<DataValue> + Send + Sync>;

pub(crate) type DataDefault = Box<dyn Fn() -> DataValue + Send + Sync>;

/// Descriptor for a new state, consumed by
/// [`add_state`](crate::StateMachine::add_state).
///
/// # Example
///
/// ```rust
/// use strata::{State, StateMachine};
///
/// let mut machine = StateMachine::new("player");
/// let root = machine.root();
/// let idle = machine.add_state(root, State::named("idle")).unwrap();
/// let busy = machine
///     .add_state(root, State::named("busy").parallel())
///     .unwrap();
/// machine.set_initial_state(root, idle).unwrap();
/// # let _ = busy;
/// ```
pub struct State {
    pub(crate) name: Option<String>,
    pub(crate) mode: ChildMode,
    pub(crate) kind: StateSpec,
}

pub(crate) enum StateSpec {
    Plain,
    Final,
    Choice(ChoiceFn),
    History {
        kind: HistoryKind,
        default: Option<StateId>,
    },
    Data {
        type_id: TypeId,
        type_name: &'static str,
        default: Option<DataDefault>,
        extract: Option<DataExtractor>,
    },
    Machine(Box<crate::machine::StateMachine>),
}

impl State {
    fn with_kind(name: Option<String>, kind: StateSpec) -> Self {
        Self {
            name,
            mode: ChildMode::Exclusive,
            kind,
        }
    }

    /// A plain named state.
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_kind(Some(name.into()), StateSpec::Plain)
    }

    /// A plain state without a name. Anonymous states are legal but invisible
    /// to the structural checksum, so replay compatibility checks cannot tell
    /// two anonymous siblings of the same shape apart.
    pub fn anonymous() -> Self {
        Self::with_kind(None, StateSpec::Plain)
    }

    /// A final state: entering it finishes the parent.
    pub fn final_state(name: impl Into<String>) -> Self {
        Self::with_kind(Some(name.into()), StateSpec::Final)
    }

    /// A choice pseudo-state: transitions targeting it are redirected through
    /// `resolve` at processing time. Never itself active.
    ///
    /// The engine performs no cycle detection on redirect chains; a choice
    /// whose branches can reach itself again will not terminate.
    pub fn choice<F>(name: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(&EventCtx) -> Option<StateId> + Send + Sync + 'static,
    {
        Self::with_kind(Some(name.into()), StateSpec::Choice(Box::new(resolve)))
    }

    /// A history pseudo-state remembering the parent's last active child
    /// (shallow) or nested path (deep).
    pub fn history(name: impl Into<String>, kind: HistoryKind) -> Self {
        Self::with_kind(
            Some(name.into()),
            StateSpec::History {
                kind,
                default: None,
            },
        )
    }

    /// Where an unvisited history resolves to. Must be a sibling of the
    /// history state. Without a default, an unvisited history falls back to
    /// the parent's initial path.
    pub fn with_history_default(mut self, default: StateId) -> Self {
        if let StateSpec::History { default: slot, .. } = &mut self.kind {
            *slot = Some(default);
        }
        self
    }

    /// A data state carrying a payload of type `T`, filled on entry from the
    /// declared extractor, the event argument, or the declared default, in
    /// that order.
    pub fn data<T: Any + Send + Sync>(name: impl Into<String>) -> Self {
        Self::with_kind(
            Some(name.into()),
            StateSpec::Data {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                default: None,
                extract: None,
            },
        )
    }

    /// Default payload used when nothing can be extracted on entry.
    pub fn with_default_data<T>(mut self, value: T) -> Self
    where
        T: Any + Clone + Send + Sync,
    {
        if let StateSpec::Data { default, .. } = &mut self.kind {
            *default = Some(Box::new(move || Arc::new(value.clone()) as DataValue));
        }
        self
    }

    /// Extraction function consulted first when filling the payload on entry.
    pub fn with_extractor<T, F>(mut self, extract: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&EventCtx) -> Option<T> + Send + Sync + 'static,
    {
        if let StateSpec::Data { extract: slot, .. } = &mut self.kind {
            *slot = Some(Box::new(move |ctx| {
                extract(ctx).map(|value| Arc::new(value) as DataValue)
            }));
        }
        self
    }

    /// A nested machine embedded as an opaque atomic state. The inner machine
    /// manages its own transitions and is auto-started on first entry.
    pub fn machine(inner: crate::machine::StateMachine) -> Self {
        Self::with_kind(
            Some(inner.name().to_owned()),
            StateSpec::Machine(Box::new(inner)),
        )
    }

    /// Switch the described state to parallel child mode.
    pub fn parallel(mut self) -> Self {
        self.mode = ChildMode::Parallel;
        self
    }

    /// Set the child mode explicitly.
    pub fn child_mode(mut self, mode: ChildMode) -> Self {
        self.mode = mode;
        self
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            StateSpec::Plain => "plain",
            StateSpec::Final => "final",
            StateSpec::Choice(_) => "choice",
            StateSpec::History { .. } => "history",
            StateSpec::Data { .. } => "data",
            StateSpec::Machine(_) => "machine",
        };
        f.debug_struct("State")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("kind", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_mode_defaults_to_exclusive() {
        assert_eq!(ChildMode::default(), ChildMode::Exclusive);
        let state = State::named("s");
        assert_eq!(state.mode, ChildMode::Exclusive);
    }

    #[test]
    fn parallel_switches_mode() {
        let state = State::named("s").parallel();
        assert_eq!(state.mode, ChildMode::Parallel);
    }

    #[test]
    fn state_ids_from_different_machines_differ() {
        let a = StateId::new(MachineId::new(), 1);
        let b = StateId::new(MachineId::new(), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn child_mode_serializes() {
        let json = serde_json::to_string(&ChildMode::Parallel).unwrap();
        let back: ChildMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChildMode::Parallel);
    }
}
