//! Direction resolution: pseudo-state redirection and target validation.
//!
//! A transition's raw direction may name pseudo-states (choice, history) or
//! states whose own initial path redirects further. Resolution substitutes
//! those recursively until every target is a concrete state whose entry needs
//! no further redirection, stopping at parallel boundaries (each region
//! resolves its own defaults independently at entry time).
//!
//! Redirect chains carry no cycle detection: a choice whose branches can
//! reach itself again will not terminate. This is a documented limitation,
//! not a supported configuration.

use crate::core::error::ProcessingError;
use crate::core::event::EventCtx;
use crate::core::state::{ChildMode, StateId};
use crate::core::transition::Direction;
use crate::machine::{NodeKind, StateMachine};

/// A direction with every pseudo-state substituted away.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResolvedDirection {
    Stay,
    NoTransition,
    Targets(Vec<u32>),
}

/// Outcome of collapsing one pseudo-state chain.
enum PseudoResolution {
    Single(u32),
    /// A deep history resolves to the remembered leaf set.
    Multi(Vec<u32>),
}

impl StateMachine {
    /// Resolve a raw direction into concrete target states, or
    /// `NoTransition` when a redirection chain bottoms out.
    pub(crate) fn resolve_direction(
        &self,
        raw: Direction,
        ctx: &EventCtx,
    ) -> Result<ResolvedDirection, ProcessingError> {
        let targets = match raw {
            Direction::Stay => return Ok(ResolvedDirection::Stay),
            Direction::NoTransition => return Ok(ResolvedDirection::NoTransition),
            Direction::TargetState { targets } => targets,
        };
        let declared_multi = targets.len() > 1;

        let mut resolved: Vec<u32> = Vec::new();
        for target in targets {
            match self.resolve_target(target, ctx)? {
                None => return Ok(ResolvedDirection::NoTransition),
                Some(states) => {
                    for state in states {
                        if !resolved.contains(&state) {
                            resolved.push(state);
                        }
                    }
                }
            }
        }
        if resolved.is_empty() {
            return Ok(ResolvedDirection::NoTransition);
        }

        // Redundant targets collapse to the deepest state of each branch.
        let deduped: Vec<u32> = resolved
            .iter()
            .copied()
            .filter(|&state| {
                !resolved
                    .iter()
                    .any(|&other| other != state && self.is_ancestor(state, other))
            })
            .collect();

        if declared_multi {
            if deduped.len() < 2 {
                return Err(ProcessingError::TooFewParallelTargets);
            }
            self.check_parallel_ancestor(&deduped)?;
        }
        Ok(ResolvedDirection::Targets(deduped))
    }

    /// Simultaneously targeted states must sit under one common ancestor
    /// with parallel child mode; anything else cannot be "current" at once.
    fn check_parallel_ancestor(&self, targets: &[u32]) -> Result<(), ProcessingError> {
        let mut ancestor = targets[0];
        for &target in &targets[1..] {
            ancestor = self.lca(ancestor, target);
        }
        if self.nodes[ancestor as usize].child_mode != ChildMode::Parallel {
            return Err(ProcessingError::NoCommonParallelAncestor {
                states: targets
                    .iter()
                    .map(|&target| self.display_name(target))
                    .collect(),
            });
        }
        Ok(())
    }

    /// Resolve one raw target: collapse pseudo-state chains, then look ahead
    /// through the initial path for further redirection.
    fn resolve_target(
        &self,
        target: StateId,
        ctx: &EventCtx,
    ) -> Result<Option<Vec<u32>>, ProcessingError> {
        if target.machine != self.id || (target.index as usize) >= self.nodes.len() {
            return Err(ProcessingError::ForeignTarget(format!("{target:?}")));
        }
        match self.resolve_pseudo_chain(target.index, ctx)? {
            None => Ok(None),
            Some(PseudoResolution::Multi(leaves)) => Ok(Some(leaves)),
            Some(PseudoResolution::Single(state)) => {
                match self.initial_lookahead(state, ctx)? {
                    None => Ok(None),
                    Some(state) => Ok(Some(vec![state])),
                }
            }
        }
    }

    /// Used by the executor when a composite's initial child is a
    /// pseudo-state; resolves it against the current event context.
    pub(crate) fn resolve_pseudo_targets(
        &self,
        index: u32,
        ctx: &EventCtx,
    ) -> Result<Option<Vec<u32>>, ProcessingError> {
        match self.resolve_pseudo_chain(index, ctx)? {
            None => Ok(None),
            Some(PseudoResolution::Multi(leaves)) => Ok(Some(leaves)),
            Some(PseudoResolution::Single(state)) => Ok(Some(vec![state])),
        }
    }

    fn resolve_pseudo_chain(
        &self,
        index: u32,
        ctx: &EventCtx,
    ) -> Result<Option<PseudoResolution>, ProcessingError> {
        let mut cursor = index;
        loop {
            match &self.nodes[cursor as usize].kind {
                NodeKind::Choice(resolve) => match resolve(ctx) {
                    None => {
                        log::debug!(
                            "choice '{}' resolved to no state",
                            self.display_name(cursor)
                        );
                        return Ok(None);
                    }
                    Some(next) => {
                        if next.machine != self.id || (next.index as usize) >= self.nodes.len() {
                            return Err(ProcessingError::ForeignTarget(format!("{next:?}")));
                        }
                        cursor = next.index;
                    }
                },
                NodeKind::History {
                    default, stored, ..
                } => {
                    if stored.len() > 1 {
                        return Ok(Some(PseudoResolution::Multi(stored.clone())));
                    }
                    if let Some(&remembered) = stored.first() {
                        cursor = remembered;
                        continue;
                    }
                    match default {
                        Some(default) => cursor = *default,
                        None => {
                            // Unvisited with no default: fall back to the
                            // parent's initial path.
                            let Some(parent) = self.nodes[cursor as usize].parent else {
                                return Ok(None);
                            };
                            match self.nodes[parent as usize].initial {
                                Some(initial) if initial != cursor => cursor = initial,
                                _ => return Ok(None),
                            }
                        }
                    }
                }
                _ => return Ok(Some(PseudoResolution::Single(cursor))),
            }
        }
    }

    /// After substitution, entering the target may immediately redirect again
    /// when its initial path contains a pseudo-state. Applied recursively
    /// until entry is redirection-free or a parallel boundary is hit.
    fn initial_lookahead(&self, index: u32, ctx: &EventCtx) -> Result<Option<u32>, ProcessingError> {
        let mut target = index;
        'retarget: loop {
            let mut cursor = target;
            loop {
                let node = &self.nodes[cursor as usize];
                if node.child_mode == ChildMode::Parallel || node.children.is_empty() {
                    return Ok(Some(target));
                }
                let Some(initial) = node.initial else {
                    return Ok(Some(target));
                };
                if self.nodes[initial as usize].kind.is_pseudo() {
                    match self.resolve_pseudo_chain(initial, ctx)? {
                        None => return Ok(None),
                        Some(PseudoResolution::Single(next)) => {
                            target = next;
                            continue 'retarget;
                        }
                        Some(PseudoResolution::Multi(leaves)) => {
                            // First discovered leaf stands in for the check.
                            match leaves.first() {
                                Some(&first) => {
                                    target = first;
                                    continue 'retarget;
                                }
                                None => return Ok(None),
                            }
                        }
                    }
                }
                cursor = initial;
            }
        }
    }
}
