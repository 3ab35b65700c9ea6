//! Strata: a hierarchical state machine (statechart) library.
//!
//! Strata models stateful behavior as a tree of states owned by a
//! [`StateMachine`]: composites are exclusive (one current child) or parallel
//! (all children are concurrent regions), pseudo-states (choice, history)
//! redirect transitions without ever being active themselves, data states
//! carry typed payloads, and finished composites cascade completion upward.
//! Processed events can be recorded and replayed against a structurally
//! equivalent machine to reproduce the same configuration.
//!
//! # Core Concepts
//!
//! - **States**: attached with [`StateMachine::add_state`] from [`State`]
//!   descriptors, addressed by [`StateId`] handles
//! - **Transitions**: declared per source state with [`Transition`]
//!   constructors; directions are produced lazily during processing
//! - **Events**: any type implementing [`Event`], matched by runtime type
//! - **Listeners**: observers of entry/exit/finish/lifecycle notifications
//! - **Replay**: [`recorded_events`](StateMachine::recorded_events) and
//!   [`restore`](StateMachine::restore)
//!
//! # Example
//!
//! ```rust
//! use std::any::Any;
//! use strata::{Event, State, StateMachine, Transition};
//!
//! #[derive(Debug)]
//! struct Switch;
//! impl Event for Switch {
//!     fn as_any(&self) -> &dyn Any {
//!         self
//!     }
//! }
//!
//! let mut machine = StateMachine::new("toggle");
//! let root = machine.root();
//! let off = machine.add_initial_state(root, State::named("off")).unwrap();
//! let on = machine.add_state(root, State::named("on")).unwrap();
//! machine.add_transition(off, Transition::to::<Switch>(on)).unwrap();
//! machine.add_transition(on, Transition::to::<Switch>(off)).unwrap();
//!
//! machine.start().unwrap();
//! machine.process_event(Switch).unwrap();
//! assert_eq!(machine.active_state_names(), vec!["on"]);
//! ```

pub mod core;
pub mod machine;
pub mod replay;
pub mod visitor;

pub use crate::core::{
    ChildMode, ConfigError, DestroyEvent, Direction, Event, EventArgument, EventCtx, EventMatcher,
    ExportPreviewEvent, FinishedEvent, HistoryKind, ListenerError, ListenerResult, MachineId,
    ProcessingError, StartEvent, State, StateId, StopEvent, Transition, TransitionId,
    TransitionKind, UndoEvent, WrappedEvent,
};
pub use crate::machine::{
    EventRef, ListenerId, MachineConfig, MachineListener, MachineMetadata, MachineStatus,
    Notification, ProcessingResult, StateMachine, TransitionInfo,
};
pub use crate::replay::{
    Record, RecordedEvents, RecorderConfig, RecordingSummary, RestorationResult,
    RestorationValidator, RestorationWarning, RestoreError, RestoreOptions,
};
pub use crate::visitor::Visitor;
