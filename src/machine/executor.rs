//! Entry/exit execution along resolved transition paths.
//!
//! A transition's effect is computed from the least common ancestor of its
//! source and targets: active states below the boundary exit innermost-first,
//! the target branch enters outermost-first, and entry recurses into initial
//! states (all regions of a parallel composite, the designated initial child
//! of an exclusive one). Enter on an active state and exit on an inactive
//! state are no-ops, which is what makes local self-transitions invisible.

use crate::core::error::ProcessingError;
use crate::core::event::FinishedEvent;
use crate::core::state::{ChildMode, DataValue, HistoryKind};
use crate::core::transition::TransitionKind;
use crate::machine::listener::{EventRef, Notification};
use crate::machine::{NodeKind, StateMachine, ROOT};

/// Branch tree describing which child to take per level when entering one or
/// more targets below a common scope.
pub(crate) struct PathNode {
    pub(crate) state: u32,
    pub(crate) children: Vec<PathNode>,
}

impl PathNode {
    fn new(state: u32) -> Self {
        Self {
            state,
            children: Vec::new(),
        }
    }

    fn insert(&mut self, path: &[u32]) {
        let Some(&head) = path.first() else {
            return;
        };
        let position = match self.children.iter().position(|c| c.state == head) {
            Some(position) => position,
            None => {
                self.children.push(PathNode::new(head));
                self.children.len() - 1
            }
        };
        self.children[position].insert(&path[1..]);
    }
}

impl StateMachine {
    pub(crate) fn is_ancestor(&self, ancestor: u32, descendant: u32) -> bool {
        let mut cursor = descendant;
        loop {
            if cursor == ancestor {
                return true;
            }
            match self.nodes[cursor as usize].parent {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
    }

    /// Deepest common ancestor of two states.
    pub(crate) fn lca(&self, a: u32, b: u32) -> u32 {
        let mut a = a;
        let mut b = b;
        let mut depth_a = self.depth(a);
        let mut depth_b = self.depth(b);
        while depth_a > depth_b {
            if let Some(parent) = self.nodes[a as usize].parent {
                a = parent;
            }
            depth_a -= 1;
        }
        while depth_b > depth_a {
            if let Some(parent) = self.nodes[b as usize].parent {
                b = parent;
            }
            depth_b -= 1;
        }
        loop {
            if a == b {
                return a;
            }
            match (
                self.nodes[a as usize].parent,
                self.nodes[b as usize].parent,
            ) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                _ => return ROOT,
            }
        }
    }

    fn depth(&self, index: u32) -> u32 {
        let mut depth = 0;
        let mut cursor = index;
        while let Some(parent) = self.nodes[cursor as usize].parent {
            depth += 1;
            cursor = parent;
        }
        depth
    }

    /// Chain from `ancestor` (exclusive) down to `descendant` (inclusive).
    pub(crate) fn path_between(&self, ancestor: u32, descendant: u32) -> Vec<u32> {
        let mut path = Vec::new();
        let mut cursor = descendant;
        while cursor != ancestor {
            path.push(cursor);
            match self.nodes[cursor as usize].parent {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Run the exit/enter sequence for a triggered transition whose targets
    /// are already resolved to concrete states.
    pub(crate) fn execute_transition(
        &mut self,
        source: u32,
        targets: &[u32],
        kind: TransitionKind,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        let scope = targets.iter().fold(source, |acc, &t| self.lca(acc, t));
        let target_is_scope = targets.len() == 1 && targets[0] == scope;

        if target_is_scope {
            match kind {
                TransitionKind::Local if scope == source => {
                    // Self-transition with local semantics: no exit, no entry.
                }
                TransitionKind::Local => {
                    // Target is an ancestor of the source: collapse its
                    // subtree and re-enter the initial path.
                    self.exit_active_children(scope, event)?;
                    self.enter_initial(scope, event)?;
                }
                TransitionKind::External => {
                    self.exit_active_children(scope, event)?;
                    if scope != ROOT {
                        self.exit_single(scope, event)?;
                        self.enter_single(scope, event)?;
                    }
                    self.enter_initial(scope, event)?;
                }
            }
            return Ok(());
        }

        if kind == TransitionKind::External && scope == source && scope != ROOT {
            // Drill-down with external semantics: the source boundary itself
            // exits and re-enters before descending to the target.
            self.exit_active_children(scope, event)?;
            self.exit_single(scope, event)?;
            self.enter_single(scope, event)?;
        }

        let tree = self.build_path_tree(scope, targets)?;
        self.descend(scope, &tree, event)
    }

    /// Build and validate the branch tree from `scope` to every target.
    pub(crate) fn build_path_tree(
        &self,
        scope: u32,
        targets: &[u32],
    ) -> Result<PathNode, ProcessingError> {
        let mut tree = PathNode::new(scope);
        for &target in targets {
            if target == scope {
                continue;
            }
            tree.insert(&self.path_between(scope, target));
        }
        self.order_and_validate(&mut tree)?;
        Ok(tree)
    }

    fn order_and_validate(&self, tree: &mut PathNode) -> Result<(), ProcessingError> {
        let node = &self.nodes[tree.state as usize];
        tree.children.sort_by_key(|branch| {
            node.children
                .iter()
                .position(|&child| child == branch.state)
                .unwrap_or(usize::MAX)
        });
        if node.child_mode == ChildMode::Exclusive && tree.children.len() > 1 {
            return Err(ProcessingError::AmbiguousEntryBranch {
                state: self.display_name(tree.state),
                first: self.display_name(tree.children[0].state),
                second: self.display_name(tree.children[1].state),
            });
        }
        for branch in &mut tree.children {
            self.order_and_validate(branch)?;
        }
        Ok(())
    }

    /// Walk the branch tree through the currently active configuration,
    /// exiting only where the path diverges from it.
    fn descend(
        &mut self,
        index: u32,
        tree: &PathNode,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        match self.nodes[index as usize].child_mode {
            ChildMode::Exclusive => {
                let Some(branch) = tree.children.first() else {
                    return self.enter_initial(index, event);
                };
                let next = branch.state;
                let on_path = self.nodes[index as usize].current == Some(next)
                    && self.nodes[next as usize].active;
                if on_path {
                    if branch.children.is_empty() {
                        // Target already active: collapse below it and take
                        // its initial path again.
                        self.exit_active_children(next, event)?;
                        self.enter_initial(next, event)
                    } else {
                        self.descend(next, branch, event)
                    }
                } else {
                    self.exit_active_children(index, event)?;
                    self.enter_single(next, event)?;
                    self.enter_tree_children(next, branch, event)
                }
            }
            ChildMode::Parallel => {
                // Regions without a branch keep their current configuration.
                let children = self.nodes[index as usize].children.clone();
                for child in children {
                    let branch = tree.children.iter().find(|b| b.state == child);
                    let Some(branch) = branch else { continue };
                    if self.nodes[child as usize].active {
                        self.descend(child, branch, event)?;
                    } else {
                        self.enter_single(child, event)?;
                        self.enter_tree_children(child, branch, event)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Enter the subtree below an already-entered `index`, following the
    /// branch tree where it specifies a child and initial paths elsewhere.
    fn enter_tree_children(
        &mut self,
        index: u32,
        tree: &PathNode,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        if tree.children.is_empty() {
            return self.enter_initial(index, event);
        }
        match self.nodes[index as usize].child_mode {
            ChildMode::Exclusive => {
                if let Some(branch) = tree.children.first() {
                    self.enter_single(branch.state, event)?;
                    self.enter_tree_children(branch.state, branch, event)?;
                }
                Ok(())
            }
            ChildMode::Parallel => {
                let children = self.nodes[index as usize].children.clone();
                for child in children {
                    match tree.children.iter().find(|b| b.state == child) {
                        Some(branch) => {
                            self.enter_single(child, event)?;
                            self.enter_tree_children(child, branch, event)?;
                        }
                        None => {
                            self.enter_single(child, event)?;
                            self.enter_initial(child, event)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Recursively enter the default configuration below an active state.
    pub(crate) fn enter_initial(
        &mut self,
        index: u32,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        match self.nodes[index as usize].child_mode {
            ChildMode::Exclusive => {
                if self.nodes[index as usize].children.is_empty() {
                    return Ok(());
                }
                let Some(initial) = self.nodes[index as usize].initial else {
                    // Validated at start; nothing to enter otherwise.
                    return Ok(());
                };
                if self.nodes[initial as usize].kind.is_pseudo() {
                    let resolved = {
                        let ctx = self.event_ctx(event);
                        self.resolve_pseudo_targets(initial, &ctx)?
                    };
                    let Some(resolved) = resolved else {
                        return Err(ProcessingError::UnresolvedInitial {
                            state: self.display_name(index),
                            event: event.event.describe(),
                        });
                    };
                    let tree = self.build_path_tree(index, &resolved)?;
                    self.enter_tree_children(index, &tree, event)
                } else {
                    self.enter_single(initial, event)?;
                    self.enter_initial(initial, event)
                }
            }
            ChildMode::Parallel => {
                let children = self.nodes[index as usize].children.clone();
                for child in children {
                    self.enter_single(child, event)?;
                    self.enter_initial(child, event)?;
                }
                Ok(())
            }
        }
    }

    /// Activate a single state. No-op when already active.
    pub(crate) fn enter_single(
        &mut self,
        index: u32,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        if self.nodes[index as usize].active {
            return Ok(());
        }

        // Fill a data state's payload before it becomes observable.
        let payload = self.extract_data(index, event)?;

        if let Some(parent) = self.nodes[index as usize].parent {
            let parent_node = &mut self.nodes[parent as usize];
            if parent_node.child_mode == ChildMode::Exclusive {
                parent_node.current = Some(index);
                parent_node.finished = false;
            }
        }

        let node = &mut self.nodes[index as usize];
        if let NodeKind::Data { value, .. } = &mut node.kind {
            *value = payload;
        }
        node.active = true;

        if let NodeKind::Machine(inner) = &mut self.nodes[index as usize].kind {
            if !inner.is_running() && !inner.is_destroyed() {
                inner.start()?;
            }
        }

        log::trace!("entering '{}'", self.display_name(index));
        self.notify(&Notification::StateEntry {
            state: self.sid(index),
            event: event.clone(),
        });

        if matches!(self.nodes[index as usize].kind, NodeKind::Final) {
            if let Some(parent) = self.nodes[index as usize].parent {
                self.mark_finished_upward(parent, event);
            }
        }
        Ok(())
    }

    fn extract_data(
        &self,
        index: u32,
        event: &EventRef,
    ) -> Result<Option<DataValue>, ProcessingError> {
        let node = &self.nodes[index as usize];
        let NodeKind::Data {
            type_id,
            type_name,
            default,
            extract,
            ..
        } = &node.kind
        else {
            return Ok(None);
        };

        let ctx = self.event_ctx(event);
        let value = extract
            .as_ref()
            .and_then(|f| f(&ctx))
            .or_else(|| {
                event
                    .argument
                    .clone()
                    .filter(|argument| (**argument).type_id() == *type_id)
            })
            .or_else(|| default.as_ref().map(|f| f()));

        match value {
            Some(value) => Ok(Some(value)),
            None => Err(ProcessingError::DataExtractionFailed {
                state: self.display_name(index),
                type_name: *type_name,
                event: event.event.describe(),
            }),
        }
    }

    /// Mark `index` finished, notify, and bubble through parallel ancestors
    /// whose children are now all finished.
    fn mark_finished_upward(&mut self, index: u32, event: &EventRef) {
        let mut cursor = Some(index);
        while let Some(current) = cursor {
            self.nodes[current as usize].finished = true;
            log::debug!("'{}' finished", self.display_name(current));
            self.notify(&Notification::StateFinished {
                state: self.sid(current),
                event: event.clone(),
            });
            if current != ROOT {
                self.finished_queue.push_back(current);
            }
            cursor = match self.nodes[current as usize].parent {
                Some(parent) => {
                    let parent_node = &self.nodes[parent as usize];
                    let all_finished = parent_node.child_mode == ChildMode::Parallel
                        && !parent_node.children.is_empty()
                        && parent_node
                            .children
                            .iter()
                            .all(|&child| self.nodes[child as usize].finished);
                    (all_finished && !parent_node.finished).then_some(parent)
                }
                None => None,
            };
        }
    }

    /// Exit every active child subtree of `index`, innermost first.
    pub(crate) fn exit_active_children(
        &mut self,
        index: u32,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        let children = self.nodes[index as usize].children.clone();
        for child in children {
            if self.nodes[child as usize].active {
                self.exit_subtree(child, event)?;
            }
        }
        Ok(())
    }

    /// Exit a subtree depth-first, recording history on the way out.
    pub(crate) fn exit_subtree(
        &mut self,
        index: u32,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        if !self.nodes[index as usize].active {
            return Ok(());
        }
        self.record_history(index);
        self.exit_active_children(index, event)?;
        self.exit_single(index, event)
    }

    /// Store the exiting child into any history siblings, before its subtree
    /// is torn down.
    fn record_history(&mut self, index: u32) {
        let Some(parent) = self.nodes[index as usize].parent else {
            return;
        };
        let histories: Vec<u32> = self.nodes[parent as usize]
            .children
            .iter()
            .copied()
            .filter(|&child| {
                matches!(self.nodes[child as usize].kind, NodeKind::History { .. })
            })
            .collect();
        if histories.is_empty() {
            return;
        }
        let mut leaves = Vec::new();
        self.collect_leaves(index, &mut leaves);
        for history in histories {
            if let NodeKind::History { kind, stored, .. } =
                &mut self.nodes[history as usize].kind
            {
                *stored = match kind {
                    HistoryKind::Shallow => vec![index],
                    HistoryKind::Deep => leaves.clone(),
                };
            }
        }
    }

    /// Deactivate a single state. No-op when already inactive.
    pub(crate) fn exit_single(
        &mut self,
        index: u32,
        event: &EventRef,
    ) -> Result<(), ProcessingError> {
        if !self.nodes[index as usize].active {
            return Ok(());
        }

        if let NodeKind::Machine(inner) = &mut self.nodes[index as usize].kind {
            if inner.is_running() {
                inner.do_stop()?;
            }
        }

        let node = &mut self.nodes[index as usize];
        node.active = false;
        node.finished = false;
        node.current = None;
        if let NodeKind::Data { value, last, .. } = &mut node.kind {
            if let Some(value) = value.take() {
                *last = Some(value);
            }
        }
        // The parent's completion no longer holds once a child leaves.
        if let Some(parent) = self.nodes[index as usize].parent {
            self.nodes[parent as usize].finished = false;
        }

        log::trace!("exiting '{}'", self.display_name(index));
        self.notify(&Notification::StateExit {
            state: self.sid(index),
            event: event.clone(),
        });
        Ok(())
    }

    /// Dispatch queued finished-events through ordinary matching until the
    /// cascade settles. Internal events are never recorded.
    pub(crate) fn drain_finished_events(&mut self, _cause: &EventRef) -> Result<(), ProcessingError> {
        while let Some(index) = self.finished_queue.pop_front() {
            if !self.is_running() {
                self.finished_queue.clear();
                break;
            }
            let event = EventRef::new(
                FinishedEvent {
                    state: self.sid(index),
                },
                None,
            );
            log::trace!("dispatching finished-event for '{}'", self.display_name(index));
            let matches = self.find_matches(&event)?;
            for matched in matches {
                if !self.nodes[matched.source as usize].active {
                    continue;
                }
                self.fire(matched, &event)?;
            }
        }
        Ok(())
    }
}
