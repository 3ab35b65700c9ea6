//! The state machine: tree storage, construction API, listeners, and
//! lifecycle bookkeeping.
//!
//! The machine owns every state node in an arena; application code holds
//! [`StateId`] handles. All mutation entry points (`add_state`,
//! `set_initial_state`, `add_transition`) enforce the not-while-running
//! invariant; all runtime mutation of active/finished/current flags happens
//! inside event processing.

mod executor;
mod listener;
mod processing;
mod resolver;
mod undo;

pub use listener::{EventRef, ListenerId, MachineListener, Notification, TransitionInfo};
pub use processing::ProcessingResult;

use std::any::Any;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::error::{ConfigError, ListenerError, ListenerResult};
use crate::core::event::EventCtx;
use crate::core::state::{
    ChildMode, ChoiceFn, DataDefault, DataExtractor, DataValue, HistoryKind, MachineId, State,
    StateId, StateSpec,
};
use crate::core::transition::{Transition, TransitionId, TransitionKind};
use crate::machine::listener::{FnListener, ListenerEntry, StateHook, StateHookListener};
use crate::machine::undo::UndoEntry;
use crate::replay::{EventRecorder, RecorderConfig};

pub(crate) const ROOT: u32 = 0;

/// Lifecycle of a machine instance.
///
/// `NotStarted → Running ⇄ Stopped`, with `Destroyed` reachable from
/// anywhere and terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub enum MachineStatus {
    NotStarted,
    Running,
    Stopped,
    Destroyed,
}

/// Behavioral knobs fixed at machine creation.
#[derive(Debug, Clone, Default)]
pub struct MachineConfig {
    /// When several transitions on the same state match one event, take the
    /// first declared one instead of failing.
    pub first_match_wins: bool,
    /// Track processed configurations and honor [`UndoEvent`](crate::UndoEvent).
    pub enable_undo: bool,
    /// Queue events arriving from inside listener callbacks instead of
    /// rejecting them; the queue drains FIFO once the outer call completes.
    pub queue_pending_events: bool,
    /// Escalate events that match no transition into an error.
    pub fail_on_ignored_events: bool,
    /// Record processed events for later replay.
    pub recording: Option<RecorderConfig>,
}

/// Timestamps and counters tracked by the machine.
#[derive(Clone, Debug, Serialize)]
pub struct MachineMetadata {
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub processed_events: usize,
}

pub(crate) enum NodeKind {
    Plain,
    Final,
    Choice(ChoiceFn),
    History {
        kind: HistoryKind,
        default: Option<u32>,
        stored: Vec<u32>,
    },
    Data {
        type_id: std::any::TypeId,
        type_name: &'static str,
        default: Option<DataDefault>,
        extract: Option<DataExtractor>,
        value: Option<DataValue>,
        last: Option<DataValue>,
    },
    Machine(Box<StateMachine>),
}

impl NodeKind {
    pub(crate) fn is_pseudo(&self) -> bool {
        matches!(self, NodeKind::Choice(_) | NodeKind::History { .. })
    }
}

pub(crate) struct StateNode {
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<u32>,
    pub(crate) children: Vec<u32>,
    pub(crate) child_mode: ChildMode,
    pub(crate) initial: Option<u32>,
    pub(crate) kind: NodeKind,
    pub(crate) transitions: Vec<Transition>,
    pub(crate) active: bool,
    pub(crate) finished: bool,
    pub(crate) current: Option<u32>,
}

impl StateNode {
    fn new(name: Option<String>, mode: ChildMode, kind: NodeKind, parent: Option<u32>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            child_mode: mode,
            initial: None,
            kind,
            transitions: Vec::new(),
            active: false,
            finished: false,
            current: None,
        }
    }
}

/// A hierarchical, event-driven state machine.
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
/// let mut machine = StateMachine::new("lamp");
/// let root = machine.root();
/// let off = machine.add_initial_state(root, State::named("off")).unwrap();
/// let on = machine.add_state(root, State::named("on")).unwrap();
/// machine.add_transition(off, Transition::to::<Switch>(on)).unwrap();
/// machine.add_transition(on, Transition::to::<Switch>(off)).unwrap();
///
/// machine.start().unwrap();
/// machine.process_event(Switch).unwrap();
/// assert!(machine.is_active(on));
/// ```
pub struct StateMachine {
    pub(crate) id: MachineId,
    name: String,
    config: MachineConfig,
    pub(crate) nodes: Vec<StateNode>,
    pub(crate) status: MachineStatus,
    pub(crate) processing: bool,
    pub(crate) muted: bool,
    pub(crate) has_started_once: bool,
    pub(crate) pending: VecDeque<EventRef>,
    pub(crate) finished_queue: VecDeque<u32>,
    pub(crate) delayed_errors: Vec<ListenerError>,
    listeners: Vec<ListenerEntry>,
    removed_listeners: Vec<ListenerId>,
    next_listener_id: u64,
    pub(crate) listener_error_handler: Option<Box<dyn FnMut(&ListenerError) + Send>>,
    pub(crate) recorder: Option<EventRecorder>,
    pub(crate) undo_stack: Vec<UndoEntry>,
    pub(crate) metadata: MachineMetadata,
}

impl StateMachine {
    /// Create a machine with the default configuration. The machine itself is
    /// the root state of the tree.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MachineConfig::default())
    }

    /// Create a machine with an explicit configuration.
    pub fn with_config(name: impl Into<String>, config: MachineConfig) -> Self {
        let name = name.into();
        let recorder = config.recording.clone().map(EventRecorder::new);
        Self {
            id: MachineId::new(),
            name,
            config,
            nodes: vec![StateNode::new(
                None,
                ChildMode::Exclusive,
                NodeKind::Plain,
                None,
            )],
            status: MachineStatus::NotStarted,
            processing: false,
            muted: false,
            has_started_once: false,
            pending: VecDeque::new(),
            finished_queue: VecDeque::new(),
            delayed_errors: Vec::new(),
            listeners: Vec::new(),
            removed_listeners: Vec::new(),
            next_listener_id: 0,
            listener_error_handler: None,
            recorder,
            undo_stack: Vec::new(),
            metadata: MachineMetadata {
                created_at: Utc::now(),
                started_at: None,
                processed_events: 0,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MachineMetadata {
        &self.metadata
    }

    /// The root state, i.e. the machine itself.
    pub fn root(&self) -> StateId {
        StateId::new(self.id, ROOT)
    }

    // ---- tree construction -------------------------------------------------

    /// Attach a new state under `parent`.
    pub fn add_state(&mut self, parent: StateId, state: State) -> Result<StateId, ConfigError> {
        self.check_mutable()?;
        let parent_index = self.resolve_config_id(parent)?;

        match &self.nodes[parent_index as usize].kind {
            NodeKind::Plain | NodeKind::Data { .. } => {}
            NodeKind::Final => {
                return Err(ConfigError::ChildrenNotAllowed {
                    parent: self.display_name(parent_index),
                    reason: "final states are leaves",
                })
            }
            NodeKind::Choice(_) | NodeKind::History { .. } => {
                return Err(ConfigError::ChildrenNotAllowed {
                    parent: self.display_name(parent_index),
                    reason: "pseudo-states are leaves",
                })
            }
            NodeKind::Machine(_) => {
                return Err(ConfigError::ChildrenNotAllowed {
                    parent: self.display_name(parent_index),
                    reason: "nested machines manage their own tree",
                })
            }
        }

        let restricted = matches!(
            state.kind,
            StateSpec::Final | StateSpec::Choice(_) | StateSpec::History { .. }
        );
        if restricted && self.nodes[parent_index as usize].child_mode == ChildMode::Parallel {
            return Err(ConfigError::InvalidUnderParallel {
                child: state.name.clone().unwrap_or_else(|| "<anonymous>".into()),
                parent: self.display_name(parent_index),
            });
        }

        if let Some(name) = &state.name {
            if self.state_by_name(name).is_some() {
                return Err(ConfigError::DuplicateStateName(name.clone()));
            }
        }

        if let StateSpec::History { default: Some(default), .. } = &state.kind {
            if default.machine != self.id
                || self.nodes[default.index as usize].parent != Some(parent_index)
            {
                return Err(ConfigError::InvalidHistoryDefault {
                    state: state.name.clone().unwrap_or_else(|| "<anonymous>".into()),
                });
            }
        }

        let kind = match state.kind {
            StateSpec::Plain => NodeKind::Plain,
            StateSpec::Final => NodeKind::Final,
            StateSpec::Choice(resolve) => NodeKind::Choice(resolve),
            StateSpec::History { kind, default } => NodeKind::History {
                kind,
                default: default.map(|id| id.index),
                stored: Vec::new(),
            },
            StateSpec::Data {
                type_id,
                type_name,
                default,
                extract,
            } => NodeKind::Data {
                type_id,
                type_name,
                default,
                extract,
                value: None,
                last: None,
            },
            StateSpec::Machine(inner) => NodeKind::Machine(inner),
        };

        let index = self.nodes.len() as u32;
        self.nodes.push(StateNode::new(
            state.name,
            state.mode,
            kind,
            Some(parent_index),
        ));
        self.nodes[parent_index as usize].children.push(index);
        Ok(StateId::new(self.id, index))
    }

    /// Attach a new state under `parent` and make it the parent's initial
    /// state in one call.
    pub fn add_initial_state(
        &mut self,
        parent: StateId,
        state: State,
    ) -> Result<StateId, ConfigError> {
        let id = self.add_state(parent, state)?;
        self.set_initial_state(parent, id)?;
        Ok(id)
    }

    /// Designate which child an exclusive composite enters by default.
    pub fn set_initial_state(
        &mut self,
        parent: StateId,
        child: StateId,
    ) -> Result<(), ConfigError> {
        self.check_mutable()?;
        let parent_index = self.resolve_config_id(parent)?;
        let child_index = self.resolve_config_id(child)?;
        if self.nodes[child_index as usize].parent != Some(parent_index) {
            return Err(ConfigError::InitialNotChild {
                parent: self.display_name(parent_index),
            });
        }
        self.nodes[parent_index as usize].initial = Some(child_index);
        Ok(())
    }

    /// Change the child mode of a composite. Usually set through the
    /// [`State`] descriptor; exposed for the root state.
    pub fn set_child_mode(&mut self, state: StateId, mode: ChildMode) -> Result<(), ConfigError> {
        self.check_mutable()?;
        let index = self.resolve_config_id(state)?;
        self.nodes[index as usize].child_mode = mode;
        Ok(())
    }

    /// Declare an outgoing transition on `source`.
    pub fn add_transition(
        &mut self,
        source: StateId,
        transition: Transition,
    ) -> Result<TransitionId, ConfigError> {
        self.check_mutable()?;
        let source_index = self.resolve_config_id(source)?;

        match &self.nodes[source_index as usize].kind {
            NodeKind::Final => {
                return Err(ConfigError::TransitionFromFinal(
                    self.display_name(source_index),
                ))
            }
            NodeKind::Choice(_) | NodeKind::History { .. } => {
                return Err(ConfigError::TransitionFromPseudo(
                    self.display_name(source_index),
                ))
            }
            _ => {}
        }

        if let Some(name) = &transition.name {
            let duplicate = self
                .nodes
                .iter()
                .flat_map(|node| node.transitions.iter())
                .any(|existing| existing.name.as_deref() == Some(name.as_str()));
            if duplicate {
                return Err(ConfigError::DuplicateTransitionName(name.clone()));
            }
        }

        for target in &transition.declared_targets {
            if target.machine != self.id || (target.index as usize) >= self.nodes.len() {
                return Err(ConfigError::ForeignState(format!("{target:?}")));
            }
        }

        let node = &mut self.nodes[source_index as usize];
        let index = node.transitions.len() as u32;
        node.transitions.push(transition);
        Ok(TransitionId {
            state: StateId::new(self.id, source_index),
            index,
        })
    }

    fn check_mutable(&self) -> Result<(), ConfigError> {
        match self.status {
            MachineStatus::NotStarted | MachineStatus::Stopped => Ok(()),
            MachineStatus::Destroyed => Err(ConfigError::Destroyed),
            status => Err(ConfigError::MutationWhileActive { status }),
        }
    }

    /// Structural checks deferred until start: every exclusive composite must
    /// designate an initial child.
    pub(crate) fn validate_structure(&self) -> Result<(), ConfigError> {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.child_mode == ChildMode::Exclusive
                && !node.children.is_empty()
                && node.initial.is_none()
            {
                return Err(ConfigError::MissingInitialState(
                    self.display_name(index as u32),
                ));
            }
        }
        Ok(())
    }

    // ---- queries -----------------------------------------------------------

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == MachineStatus::Running
    }

    pub fn is_destroyed(&self) -> bool {
        self.status == MachineStatus::Destroyed
    }

    /// Whether the machine's own completion condition has been met.
    pub fn is_finished(&self) -> bool {
        self.nodes[ROOT as usize].finished
    }

    pub fn is_active(&self, state: StateId) -> bool {
        self.index_of(state)
            .map(|index| self.nodes[index as usize].active)
            .unwrap_or(false)
    }

    pub fn is_state_finished(&self, state: StateId) -> bool {
        self.index_of(state)
            .map(|index| self.nodes[index as usize].finished)
            .unwrap_or(false)
    }

    /// The current child of an exclusive composite, if any.
    pub fn current_child(&self, state: StateId) -> Option<StateId> {
        let index = self.index_of(state)?;
        self.nodes[index as usize]
            .current
            .map(|child| StateId::new(self.id, child))
    }

    /// All active states in entry (pre-)order, excluding the root.
    pub fn active_states(&self) -> Vec<StateId> {
        let mut out = Vec::new();
        self.collect_active(ROOT, &mut out);
        out.into_iter()
            .filter(|id| id.index != ROOT)
            .collect()
    }

    /// Names of the active states, for assertions and diagnostics.
    pub fn active_state_names(&self) -> Vec<String> {
        self.active_states()
            .into_iter()
            .map(|id| self.display_name(id.index))
            .collect()
    }

    fn collect_active(&self, index: u32, out: &mut Vec<StateId>) {
        let node = &self.nodes[index as usize];
        if !node.active {
            return;
        }
        out.push(StateId::new(self.id, index));
        match node.child_mode {
            ChildMode::Exclusive => {
                if let Some(current) = node.current {
                    self.collect_active(current, out);
                }
            }
            ChildMode::Parallel => {
                for &child in &node.children {
                    self.collect_active(child, out);
                }
            }
        }
    }

    /// Deepest active states, one per active branch.
    pub(crate) fn active_leaf_indices(&self) -> Vec<u32> {
        let mut leaves = Vec::new();
        if self.nodes[ROOT as usize].active {
            self.collect_leaves(ROOT, &mut leaves);
        }
        leaves
    }

    fn collect_leaves(&self, index: u32, leaves: &mut Vec<u32>) {
        let node = &self.nodes[index as usize];
        let mut descended = false;
        match node.child_mode {
            ChildMode::Exclusive => {
                if let Some(current) = node.current {
                    if self.nodes[current as usize].active {
                        descended = true;
                        self.collect_leaves(current, leaves);
                    }
                }
            }
            ChildMode::Parallel => {
                for &child in &node.children {
                    if self.nodes[child as usize].active {
                        descended = true;
                        self.collect_leaves(child, leaves);
                    }
                }
            }
        }
        if !descended {
            leaves.push(index);
        }
    }

    pub fn state_by_name(&self, name: &str) -> Option<StateId> {
        self.nodes
            .iter()
            .position(|node| node.name.as_deref() == Some(name))
            .map(|index| StateId::new(self.id, index as u32))
    }

    pub fn state_name(&self, state: StateId) -> Option<&str> {
        let index = self.index_of(state)?;
        self.nodes[index as usize].name.as_deref()
    }

    pub fn children(&self, state: StateId) -> Vec<StateId> {
        match self.index_of(state) {
            Some(index) => self.nodes[index as usize]
                .children
                .iter()
                .map(|&child| StateId::new(self.id, child))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn parent(&self, state: StateId) -> Option<StateId> {
        let index = self.index_of(state)?;
        self.nodes[index as usize]
            .parent
            .map(|parent| StateId::new(self.id, parent))
    }

    pub fn transitions_of(&self, state: StateId) -> Vec<TransitionId> {
        match self.index_of(state) {
            Some(index) => (0..self.nodes[index as usize].transitions.len())
                .map(|i| TransitionId {
                    state: StateId::new(self.id, index),
                    index: i as u32,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn transition_name(&self, transition: TransitionId) -> Option<&str> {
        self.transition_ref(transition)?.name.as_deref()
    }

    pub fn transition_kind(&self, transition: TransitionId) -> Option<TransitionKind> {
        self.transition_ref(transition).map(|t| t.kind)
    }

    /// Targets known at declaration time; empty for conditional transitions.
    pub fn declared_targets(&self, transition: TransitionId) -> Vec<StateId> {
        self.transition_ref(transition)
            .map(|t| t.declared_targets.clone())
            .unwrap_or_default()
    }

    pub(crate) fn transition_ref(&self, transition: TransitionId) -> Option<&Transition> {
        let index = self.index_of(transition.state)?;
        self.nodes[index as usize]
            .transitions
            .get(transition.index as usize)
    }

    /// Payload of a data state, readable while the state is active.
    pub fn data<T: Any>(&self, state: StateId) -> Option<&T> {
        let index = self.index_of(state)?;
        let node = &self.nodes[index as usize];
        if !node.active {
            return None;
        }
        match &node.kind {
            NodeKind::Data { value, .. } => value.as_ref().and_then(|v| v.downcast_ref::<T>()),
            _ => None,
        }
    }

    /// Last known payload of a data state, readable regardless of activity.
    pub fn last_data<T: Any>(&self, state: StateId) -> Option<&T> {
        let index = self.index_of(state)?;
        match &self.nodes[index as usize].kind {
            NodeKind::Data { value, last, .. } => value
                .as_ref()
                .or(last.as_ref())
                .and_then(|v| v.downcast_ref::<T>()),
            _ => None,
        }
    }

    // ---- listeners ---------------------------------------------------------

    /// Register a listener for all structural notifications.
    pub fn add_listener(&mut self, listener: Box<dyn MachineListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push(ListenerEntry { id, listener });
        id
    }

    /// Register a closure listener.
    pub fn add_listener_fn<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut StateMachine, &Notification) -> ListenerResult + Send + 'static,
    {
        self.add_listener(Box::new(FnListener(listener)))
    }

    /// Remove a listener. Safe to call from inside a notification.
    pub fn remove_listener(&mut self, id: ListenerId) {
        self.removed_listeners.push(id);
        self.listeners.retain(|entry| entry.id != id);
    }

    /// Run `callback` every time `state` is entered.
    pub fn on_entry<F>(&mut self, state: StateId, callback: F) -> ListenerId
    where
        F: FnMut(&mut StateMachine, &EventRef) -> ListenerResult + Send + 'static,
    {
        self.add_listener(Box::new(StateHookListener {
            state,
            hook: StateHook::Entry,
            callback,
        }))
    }

    /// Run `callback` every time `state` is exited.
    pub fn on_exit<F>(&mut self, state: StateId, callback: F) -> ListenerId
    where
        F: FnMut(&mut StateMachine, &EventRef) -> ListenerResult + Send + 'static,
    {
        self.add_listener(Box::new(StateHookListener {
            state,
            hook: StateHook::Exit,
            callback,
        }))
    }

    /// Run `callback` when `state` finishes.
    pub fn on_finished<F>(&mut self, state: StateId, callback: F) -> ListenerId
    where
        F: FnMut(&mut StateMachine, &EventRef) -> ListenerResult + Send + 'static,
    {
        self.add_listener(Box::new(StateHookListener {
            state,
            hook: StateHook::Finished,
            callback,
        }))
    }

    /// Run `callback` every time a transition triggers anywhere in the tree.
    pub fn on_transition<F>(&mut self, mut callback: F) -> ListenerId
    where
        F: FnMut(&mut StateMachine, &TransitionInfo) -> ListenerResult + Send + 'static,
    {
        self.add_listener_fn(move |machine, notification| {
            if let Notification::TransitionTriggered { transition } = notification {
                callback(machine, transition)
            } else {
                Ok(())
            }
        })
    }

    /// Install a handler consuming delayed listener errors. Without one, the
    /// first delayed error is returned from the processing call (the machine
    /// stays running either way).
    pub fn set_listener_error_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&ListenerError) + Send + 'static,
    {
        self.listener_error_handler = Some(Box::new(handler));
    }

    /// Deliver a notification to every listener, collecting failures into the
    /// delayed-error accumulator. Muted during restoration.
    pub(crate) fn notify(&mut self, notification: &Notification) {
        if self.muted {
            return;
        }
        let mut current = std::mem::take(&mut self.listeners);
        for entry in current.iter_mut() {
            if self.removed_listeners.contains(&entry.id) {
                continue;
            }
            if let Err(error) = entry.listener.on_notification(self, notification) {
                self.delayed_errors.push(error);
            }
        }
        // Listeners registered from inside a callback landed in `self.listeners`.
        let added = std::mem::replace(&mut self.listeners, current);
        self.listeners.extend(added);
        let removed = std::mem::take(&mut self.removed_listeners);
        if !removed.is_empty() {
            self.listeners.retain(|entry| !removed.contains(&entry.id));
        }
    }

    pub(crate) fn clear_listeners(&mut self) {
        self.listeners.clear();
        self.removed_listeners.clear();
    }

    // ---- internal helpers --------------------------------------------------

    pub(crate) fn sid(&self, index: u32) -> StateId {
        StateId::new(self.id, index)
    }

    pub(crate) fn index_of(&self, state: StateId) -> Option<u32> {
        (state.machine == self.id && (state.index as usize) < self.nodes.len())
            .then_some(state.index)
    }

    fn resolve_config_id(&self, state: StateId) -> Result<u32, ConfigError> {
        self.index_of(state)
            .ok_or_else(|| ConfigError::ForeignState(format!("{state:?}")))
    }

    pub(crate) fn display_name(&self, index: u32) -> String {
        match &self.nodes[index as usize].name {
            Some(name) => name.clone(),
            None if index == ROOT => self.name.clone(),
            None => format!("<state #{index}>"),
        }
    }

    pub(crate) fn event_ctx<'a>(&self, event: &'a EventRef) -> EventCtx<'a> {
        EventCtx {
            event: &*event.event,
            argument: event.argument.as_ref(),
        }
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("states", &self.nodes.len())
            .finish()
    }
}
