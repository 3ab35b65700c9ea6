//! Read-only tree walk for exporters.
//!
//! Diagram serializers (PlantUML, Mermaid, DOT) live outside this crate and
//! consume the tree through [`Visitor`]. Conditional transitions expose their
//! direction only through [`preview_direction`](StateMachine::preview_direction),
//! which feeds the direction function a synthetic event. Export-only; never
//! part of real processing.

use crate::core::event::{EventCtx, ExportPreviewEvent};
use crate::core::state::StateId;
use crate::core::transition::{Direction, TransitionId};
use crate::machine::StateMachine;

/// Read-only observer of a machine's structure.
pub trait Visitor {
    fn visit_machine(&mut self, _machine: &StateMachine) {}
    fn visit_state(&mut self, _machine: &StateMachine, _state: StateId) {}
    fn visit_transition(&mut self, _machine: &StateMachine, _transition: TransitionId) {}
}

impl StateMachine {
    /// Walk the tree in declaration order: the machine, then each state
    /// pre-order with its transitions. Nested machines are visited as single
    /// opaque states.
    pub fn accept<V: Visitor>(&self, visitor: &mut V) {
        visitor.visit_machine(self);
        for transition in self.transitions_of(self.root()) {
            visitor.visit_transition(self, transition);
        }
        for child in self.children(self.root()) {
            self.accept_state(visitor, child);
        }
    }

    fn accept_state<V: Visitor>(&self, visitor: &mut V, state: StateId) {
        visitor.visit_state(self, state);
        for transition in self.transitions_of(state) {
            visitor.visit_transition(self, transition);
        }
        for child in self.children(state) {
            self.accept_state(visitor, child);
        }
    }

    /// Invoke a transition's direction function with a synthetic
    /// [`ExportPreviewEvent`] to discover where it could lead. Guards are not
    /// consulted and pseudo-states are not resolved; the raw direction is
    /// returned as declared.
    pub fn preview_direction(&self, transition: TransitionId) -> Option<Direction> {
        let transition = self.transition_ref(transition)?;
        let preview = ExportPreviewEvent;
        let ctx = EventCtx {
            event: &preview,
            argument: None,
        };
        Some((transition.direction)(&ctx))
    }

    /// Number of states in this machine's own tree, nested machines counted
    /// as one. Root included.
    pub fn state_count(&self) -> usize {
        self.nodes.len()
    }
}
