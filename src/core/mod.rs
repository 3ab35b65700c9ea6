//! Leaf building blocks of the engine: events and matchers, state identity
//! and descriptors, transitions and directions, and the error taxonomy.

pub mod error;
pub mod event;
pub mod state;
pub mod transition;

pub use error::{ConfigError, ListenerError, ListenerResult, ProcessingError};
pub use event::{
    DestroyEvent, Event, EventArgument, EventCtx, EventMatcher, ExportPreviewEvent, FinishedEvent,
    StartEvent, StopEvent, UndoEvent, WrappedEvent,
};
pub use state::{
    ChildMode, ChoiceFn, DataExtractor, DataValue, HistoryKind, MachineId, State, StateId,
};
pub use transition::{Direction, DirectionFn, GuardFn, Transition, TransitionId, TransitionKind};
