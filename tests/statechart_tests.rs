//! Integration tests for transition resolution and state-tree execution.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use strata::{
    ChildMode, Direction, Event, HistoryKind, ListenerError, MachineConfig, Notification,
    ProcessingError, ProcessingResult, State, StateId, StateMachine, Transition, TransitionKind,
    UndoEvent, WrappedEvent,
};

#[derive(Debug)]
struct Switch;
impl Event for Switch {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Go;
impl Event for Go {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Finish;
impl Event for Finish {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Pick(u32);
impl Event for Pick {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Trace = Arc<Mutex<Vec<String>>>;

/// Record entry/exit/finish/transition notifications as readable labels.
fn trace_notifications(machine: &mut StateMachine) -> Trace {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let sink = trace.clone();
    machine.add_listener_fn(move |machine, notification| {
        let name = |state: &StateId| {
            machine
                .state_name(*state)
                .unwrap_or("<anonymous>")
                .to_owned()
        };
        let label = match notification {
            Notification::Started { .. } => "started".to_owned(),
            Notification::TransitionTriggered { transition } => {
                format!("triggered:{:?}", transition.event.event)
            }
            Notification::TransitionComplete { .. } => "complete".to_owned(),
            Notification::StateEntry { state, .. } => format!("entry:{}", name(state)),
            Notification::StateExit { state, .. } => format!("exit:{}", name(state)),
            Notification::StateFinished { state, .. } => format!("finished:{}", name(state)),
            Notification::Stopped => "stopped".to_owned(),
            Notification::Destroyed => "destroyed".to_owned(),
        };
        sink.lock().unwrap().push(label);
        Ok(())
    });
    trace
}

fn drain(trace: &Trace) -> Vec<String> {
    std::mem::take(&mut *trace.lock().unwrap())
}

#[test]
fn flat_switch_processes_in_documented_order() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let state1 = machine.add_initial_state(root, State::named("state1")).unwrap();
    let state2 = machine.add_state(root, State::named("state2")).unwrap();
    machine
        .add_transition(state1, Transition::to::<Switch>(state2))
        .unwrap();

    machine.start().unwrap();
    let trace = trace_notifications(&mut machine);

    let result = machine.process_event(Switch).unwrap();
    assert_eq!(result, ProcessingResult::Processed);
    assert_eq!(machine.active_state_names(), vec!["state2"]);
    assert_eq!(
        drain(&trace),
        vec![
            "triggered:Switch".to_owned(),
            "exit:state1".to_owned(),
            "entry:state2".to_owned(),
            "complete".to_owned(),
        ]
    );
}

#[test]
fn nested_toggle_never_exits_the_parent() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let state1 = machine.add_initial_state(root, State::named("state1")).unwrap();
    let state11 = machine.add_initial_state(state1, State::named("state11")).unwrap();
    let state12 = machine.add_state(state1, State::named("state12")).unwrap();
    machine
        .add_transition(state11, Transition::to::<Switch>(state12))
        .unwrap();
    machine
        .add_transition(state12, Transition::to::<Switch>(state11))
        .unwrap();

    machine.start().unwrap();
    let trace = trace_notifications(&mut machine);

    machine.process_event(Switch).unwrap();
    machine.process_event(Switch).unwrap();

    assert_eq!(machine.active_state_names(), vec!["state1", "state11"]);
    let events = drain(&trace);
    let exits: Vec<&String> = events.iter().filter(|e| e.starts_with("exit:")).collect();
    let entries: Vec<&String> = events.iter().filter(|e| e.starts_with("entry:")).collect();
    assert_eq!(exits, vec!["exit:state11", "exit:state12"]);
    assert_eq!(entries, vec!["entry:state12", "entry:state11"]);
    assert!(!events.contains(&"exit:state1".to_owned()));
}

#[test]
fn parallel_fanout_enters_regions_in_order() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let start = machine.add_initial_state(root, State::named("start")).unwrap();
    let p = machine.add_state(root, State::named("p").parallel()).unwrap();
    let region_x = machine.add_state(p, State::named("regionX")).unwrap();
    let region_y = machine.add_state(p, State::named("regionY")).unwrap();
    let leaf_a = machine.add_initial_state(region_x, State::named("leafA")).unwrap();
    let leaf_b = machine.add_state(region_y, State::named("leafB")).unwrap();
    let other_b = machine.add_initial_state(region_y, State::named("otherB")).unwrap();
    let _ = other_b;
    machine
        .add_transition(start, Transition::to_parallel::<Go>(vec![leaf_a, leaf_b]))
        .unwrap();

    machine.start().unwrap();
    let trace = trace_notifications(&mut machine);

    machine.process_event(Go).unwrap();
    assert_eq!(
        machine.active_state_names(),
        vec!["p", "regionX", "leafA", "regionY", "leafB"]
    );
    let events = drain(&trace);
    let entries: Vec<&String> = events.iter().filter(|e| e.starts_with("entry:")).collect();
    assert_eq!(
        entries,
        vec![
            "entry:p",
            "entry:regionX",
            "entry:leafA",
            "entry:regionY",
            "entry:leafB",
        ]
    );
}

#[test]
fn parallel_targets_without_parallel_ancestor_fail() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let start = machine.add_initial_state(root, State::named("start")).unwrap();
    let a = machine.add_state(root, State::named("a")).unwrap();
    let a1 = machine.add_initial_state(a, State::named("a1")).unwrap();
    let b = machine.add_state(root, State::named("b")).unwrap();
    let b1 = machine.add_initial_state(b, State::named("b1")).unwrap();
    machine
        .add_transition(start, Transition::to_parallel::<Go>(vec![a1, b1]))
        .unwrap();

    machine.start().unwrap();
    let error = machine.process_event(Go).unwrap_err();
    match error {
        ProcessingError::NoCommonParallelAncestor { states } => {
            assert_eq!(states, vec!["a1".to_owned(), "b1".to_owned()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Resolution errors are fatal to the machine instance.
    assert!(machine.is_destroyed());
}

#[test]
fn local_self_transition_is_invisible() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let s = machine.add_initial_state(root, State::named("s")).unwrap();
    let inner = machine.add_initial_state(s, State::named("inner")).unwrap();
    let _ = inner;
    machine.add_transition(s, Transition::to::<Switch>(s)).unwrap();

    machine.start().unwrap();
    let trace = trace_notifications(&mut machine);

    let result = machine.process_event(Switch).unwrap();
    assert_eq!(result, ProcessingResult::Processed);
    assert_eq!(
        drain(&trace),
        vec!["triggered:Switch".to_owned(), "complete".to_owned()]
    );
    assert_eq!(machine.active_state_names(), vec!["s", "inner"]);
}

#[test]
fn external_self_transition_refreshes_the_state() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let s = machine.add_initial_state(root, State::named("s")).unwrap();
    let other = machine.add_state(root, State::named("other")).unwrap();
    let _ = other;
    machine
        .add_transition(s, Transition::to::<Switch>(s).external())
        .unwrap();

    machine.start().unwrap();
    let trace = trace_notifications(&mut machine);

    machine.process_event(Switch).unwrap();
    assert_eq!(
        drain(&trace),
        vec![
            "triggered:Switch".to_owned(),
            "exit:s".to_owned(),
            "entry:s".to_owned(),
            "complete".to_owned(),
        ]
    );
}

#[test]
fn finish_propagates_bottom_up_through_parallel_regions() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let p = machine.add_initial_state(root, State::named("p").parallel()).unwrap();
    let region1 = machine.add_state(p, State::named("region1")).unwrap();
    let region2 = machine.add_state(p, State::named("region2")).unwrap();
    let work1 = machine.add_initial_state(region1, State::named("work1")).unwrap();
    let done1 = machine.add_state(region1, State::final_state("done1")).unwrap();
    let work2 = machine.add_initial_state(region2, State::named("work2")).unwrap();
    let done2 = machine.add_state(region2, State::final_state("done2")).unwrap();
    machine
        .add_transition(work1, Transition::to::<Switch>(done1))
        .unwrap();
    machine
        .add_transition(work2, Transition::to::<Finish>(done2))
        .unwrap();

    machine.start().unwrap();
    let trace = trace_notifications(&mut machine);

    machine.process_event(Switch).unwrap();
    assert!(machine.is_state_finished(region1));
    assert!(!machine.is_state_finished(p));

    machine.process_event(Finish).unwrap();
    assert!(machine.is_state_finished(region2));
    assert!(machine.is_state_finished(p));

    let events = drain(&trace);
    let finishes: Vec<&String> = events.iter().filter(|e| e.starts_with("finished:")).collect();
    assert_eq!(
        finishes,
        vec!["finished:region1", "finished:region2", "finished:p"]
    );
}

#[test]
fn finished_event_triggers_declared_transition() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let working = machine.add_initial_state(root, State::named("working")).unwrap();
    let step = machine.add_initial_state(working, State::named("step")).unwrap();
    let done = machine.add_state(working, State::final_state("done")).unwrap();
    let after = machine.add_state(root, State::named("after")).unwrap();
    machine.add_transition(step, Transition::to::<Switch>(done)).unwrap();
    machine
        .add_transition(working, Transition::on_finished(working, after))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    // The internal finished-event fires before the processing call returns.
    assert_eq!(machine.active_state_names(), vec!["after"]);
}

#[test]
fn multiple_matches_throw_unless_relaxed() {
    let build = |first_match_wins: bool| {
        let mut machine = StateMachine::with_config(
            "m",
            MachineConfig {
                first_match_wins,
                ..MachineConfig::default()
            },
        );
        let root = machine.root();
        let s = machine.add_initial_state(root, State::named("s")).unwrap();
        let a = machine.add_state(root, State::named("a")).unwrap();
        let b = machine.add_state(root, State::named("b")).unwrap();
        machine
            .add_transition(s, Transition::to::<Switch>(a).named("first"))
            .unwrap();
        machine
            .add_transition(s, Transition::to::<Switch>(b).named("second"))
            .unwrap();
        machine.start().unwrap();
        machine
    };

    let mut strict = build(false);
    let error = strict.process_event(Switch).unwrap_err();
    match error {
        ProcessingError::MultipleTransitionsMatch { state, transitions, .. } => {
            assert_eq!(state, "s");
            assert_eq!(transitions, vec!["first".to_owned(), "second".to_owned()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let mut relaxed = build(true);
    relaxed.process_event(Switch).unwrap();
    assert_eq!(relaxed.active_state_names(), vec!["a"]);
}

#[test]
fn descendant_transition_shadows_ancestor() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let outer = machine.add_initial_state(root, State::named("outer")).unwrap();
    let inner = machine.add_initial_state(outer, State::named("inner")).unwrap();
    let from_outer = machine.add_state(root, State::named("fromOuter")).unwrap();
    let from_inner = machine.add_state(root, State::named("fromInner")).unwrap();
    machine
        .add_transition(outer, Transition::to::<Switch>(from_outer))
        .unwrap();
    machine
        .add_transition(inner, Transition::to::<Switch>(from_inner))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    assert_eq!(machine.active_state_names(), vec!["fromInner"]);
}

#[test]
fn failed_guard_falls_through_to_the_ancestor() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let outer = machine.add_initial_state(root, State::named("outer")).unwrap();
    let inner = machine.add_initial_state(outer, State::named("inner")).unwrap();
    let blocked = machine.add_state(root, State::named("blocked")).unwrap();
    let fallback = machine.add_state(root, State::named("fallback")).unwrap();
    machine
        .add_transition(inner, Transition::to::<Switch>(blocked).with_guard(|_| false))
        .unwrap();
    machine
        .add_transition(outer, Transition::to::<Switch>(fallback))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    assert_eq!(machine.active_state_names(), vec!["fallback"]);
}

#[test]
fn choice_pseudo_state_redirects_by_event_payload() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let start = machine.add_initial_state(root, State::named("start")).unwrap();
    let low = machine.add_state(root, State::named("low")).unwrap();
    let high = machine.add_state(root, State::named("high")).unwrap();
    let choice = machine
        .add_state(
            root,
            State::choice("decide", move |ctx| {
                ctx.event_as::<Pick>()
                    .map(|pick| if pick.0 > 10 { high } else { low })
            }),
        )
        .unwrap();
    machine
        .add_transition(start, Transition::to::<Pick>(choice))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Pick(3)).unwrap();
    assert_eq!(machine.active_state_names(), vec!["low"]);
    // The choice state itself is never active.
    assert!(!machine.is_active(choice));
}

#[test]
fn choice_resolving_to_none_means_no_transition() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let start = machine.add_initial_state(root, State::named("start")).unwrap();
    let choice = machine
        .add_state(root, State::choice("dead-end", |_| None))
        .unwrap();
    machine
        .add_transition(start, Transition::to::<Switch>(choice))
        .unwrap();

    machine.start().unwrap();
    let result = machine.process_event(Switch).unwrap();
    assert_eq!(result, ProcessingResult::Ignored);
    assert_eq!(machine.active_state_names(), vec!["start"]);
}

#[test]
fn shallow_history_remembers_the_last_direct_child() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let player = machine.add_initial_state(root, State::named("player")).unwrap();
    let stopped = machine.add_initial_state(player, State::named("stopped")).unwrap();
    let playing = machine.add_state(player, State::named("playing")).unwrap();
    let paused = machine.add_state(root, State::named("pausedOutside")).unwrap();
    let history = machine
        .add_state(player, State::history("recent", HistoryKind::Shallow))
        .unwrap();
    machine
        .add_transition(stopped, Transition::to::<Go>(playing))
        .unwrap();
    machine
        .add_transition(player, Transition::to::<Switch>(paused))
        .unwrap();
    machine
        .add_transition(paused, Transition::to::<Switch>(history))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Go).unwrap();
    assert_eq!(machine.active_state_names(), vec!["player", "playing"]);

    machine.process_event(Switch).unwrap();
    assert_eq!(machine.active_state_names(), vec!["pausedOutside"]);

    // Coming back through history lands on the remembered child.
    machine.process_event(Switch).unwrap();
    assert_eq!(machine.active_state_names(), vec!["player", "playing"]);
}

#[test]
fn deep_history_restores_the_nested_path() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let outer = machine.add_initial_state(root, State::named("outer")).unwrap();
    let mid = machine.add_initial_state(outer, State::named("mid")).unwrap();
    let shallow_leaf = machine.add_initial_state(mid, State::named("first")).unwrap();
    let deep_leaf = machine.add_state(mid, State::named("second")).unwrap();
    let away = machine.add_state(root, State::named("away")).unwrap();
    let history = machine
        .add_state(outer, State::history("deep", HistoryKind::Deep))
        .unwrap();
    machine
        .add_transition(shallow_leaf, Transition::to::<Go>(deep_leaf))
        .unwrap();
    machine
        .add_transition(outer, Transition::to::<Switch>(away))
        .unwrap();
    machine
        .add_transition(away, Transition::to::<Switch>(history))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Go).unwrap();
    machine.process_event(Switch).unwrap();
    assert_eq!(machine.active_state_names(), vec!["away"]);

    machine.process_event(Switch).unwrap();
    assert_eq!(
        machine.active_state_names(),
        vec!["outer", "mid", "second"]
    );
}

#[test]
fn unvisited_history_falls_back_to_the_default() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let home = machine.add_initial_state(root, State::named("home")).unwrap();
    let section = machine.add_state(root, State::named("section")).unwrap();
    let first = machine.add_initial_state(section, State::named("first")).unwrap();
    let second = machine.add_state(section, State::named("second")).unwrap();
    let _ = first;
    let history = machine
        .add_state(
            section,
            State::history("recent", HistoryKind::Shallow).with_history_default(second),
        )
        .unwrap();
    machine
        .add_transition(home, Transition::to::<Switch>(history))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    assert_eq!(machine.active_state_names(), vec!["section", "second"]);
}

#[test]
fn transition_to_ancestor_collapses_and_reenters_initial() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let outer = machine.add_initial_state(root, State::named("outer")).unwrap();
    let first = machine.add_initial_state(outer, State::named("first")).unwrap();
    let second = machine.add_state(outer, State::named("second")).unwrap();
    machine.add_transition(first, Transition::to::<Go>(second)).unwrap();
    machine
        .add_transition(second, Transition::to::<Switch>(outer))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Go).unwrap();
    let trace = trace_notifications(&mut machine);
    machine.process_event(Switch).unwrap();

    // Local kind: the ancestor itself stays active, its subtree re-enters
    // the initial path.
    assert_eq!(machine.active_state_names(), vec!["outer", "first"]);
    let events = drain(&trace);
    assert!(!events.contains(&"exit:outer".to_owned()));
    assert!(events.contains(&"exit:second".to_owned()));
    assert!(events.contains(&"entry:first".to_owned()));
}

#[test]
fn external_transition_to_ancestor_reenters_the_boundary() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let outer = machine.add_initial_state(root, State::named("outer")).unwrap();
    let first = machine.add_initial_state(outer, State::named("first")).unwrap();
    let second = machine.add_state(outer, State::named("second")).unwrap();
    machine.add_transition(first, Transition::to::<Go>(second)).unwrap();
    machine
        .add_transition(second, Transition::to::<Switch>(outer).external())
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Go).unwrap();
    let trace = trace_notifications(&mut machine);
    machine.process_event(Switch).unwrap();

    assert_eq!(machine.active_state_names(), vec!["outer", "first"]);
    let events = drain(&trace);
    assert!(events.contains(&"exit:outer".to_owned()));
    assert!(events.contains(&"entry:outer".to_owned()));
}

#[test]
fn stay_transition_fires_without_changing_state() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let s = machine.add_initial_state(root, State::named("s")).unwrap();
    machine.add_transition(s, Transition::stay::<Switch>()).unwrap();

    machine.start().unwrap();
    let trace = trace_notifications(&mut machine);
    let result = machine.process_event(Switch).unwrap();
    assert_eq!(result, ProcessingResult::Processed);
    assert_eq!(
        drain(&trace),
        vec!["triggered:Switch".to_owned(), "complete".to_owned()]
    );
}

#[test]
fn none_transition_does_not_consume_the_event() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let outer = machine.add_initial_state(root, State::named("outer")).unwrap();
    let inner = machine.add_initial_state(outer, State::named("inner")).unwrap();
    let away = machine.add_state(root, State::named("away")).unwrap();
    machine.add_transition(outer, Transition::to::<Switch>(away)).unwrap();
    machine.add_transition(inner, Transition::none::<Switch>()).unwrap();

    machine.start().unwrap();
    // A no-transition direction means "no match at this state", so the
    // bottom-up search keeps walking and the ancestor still fires. A `stay`
    // transition is the way to swallow an event on a descendant.
    machine.process_event(Switch).unwrap();
    assert_eq!(machine.active_state_names(), vec!["away"]);
}

#[test]
fn stay_transition_shadows_an_ancestor() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let outer = machine.add_initial_state(root, State::named("outer")).unwrap();
    let inner = machine.add_initial_state(outer, State::named("inner")).unwrap();
    let away = machine.add_state(root, State::named("away")).unwrap();
    machine.add_transition(outer, Transition::to::<Switch>(away)).unwrap();
    machine.add_transition(inner, Transition::stay::<Switch>()).unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    assert_eq!(machine.active_state_names(), vec!["outer", "inner"]);
}

#[test]
fn pending_events_are_rejected_by_default() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let a = machine.add_initial_state(root, State::named("a")).unwrap();
    let b = machine.add_state(root, State::named("b")).unwrap();
    machine.add_transition(a, Transition::to::<Switch>(b)).unwrap();

    let failed = Arc::new(AtomicBool::new(false));
    let observed = failed.clone();
    machine.on_entry(b, move |machine, _| {
        if machine.process_event(Go).is_err() {
            observed.store(true, Ordering::SeqCst);
        }
        Ok(())
    });

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    assert!(failed.load(Ordering::SeqCst));
}

#[test]
fn queued_pending_events_drain_in_fifo_order() {
    let mut machine = StateMachine::with_config(
        "m",
        MachineConfig {
            queue_pending_events: true,
            ..MachineConfig::default()
        },
    );
    let root = machine.root();
    let a = machine.add_initial_state(root, State::named("a")).unwrap();
    let b = machine.add_state(root, State::named("b")).unwrap();
    let c = machine.add_state(root, State::named("c")).unwrap();
    let d = machine.add_state(root, State::named("d")).unwrap();
    machine.add_transition(a, Transition::to::<Switch>(b)).unwrap();
    machine.add_transition(b, Transition::to::<Go>(c)).unwrap();
    machine.add_transition(c, Transition::to::<Finish>(d)).unwrap();

    machine.on_entry(b, |machine, _| {
        assert!(matches!(
            machine.process_event(Go),
            Ok(ProcessingResult::Pending)
        ));
        assert!(matches!(
            machine.process_event(Finish),
            Ok(ProcessingResult::Pending)
        ));
        Ok(())
    });

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    // Both queued events drained, in submission order, after the outer call.
    assert_eq!(machine.active_state_names(), vec!["d"]);
}

#[test]
fn ignored_events_are_silent_by_default_and_can_fail() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    machine.add_initial_state(root, State::named("a")).unwrap();
    machine.start().unwrap();
    assert_eq!(
        machine.process_event(Switch).unwrap(),
        ProcessingResult::Ignored
    );

    let mut failing = StateMachine::with_config(
        "m2",
        MachineConfig {
            fail_on_ignored_events: true,
            ..MachineConfig::default()
        },
    );
    let root = failing.root();
    failing.add_initial_state(root, State::named("a")).unwrap();
    failing.start().unwrap();
    let error = failing.process_event(Switch).unwrap_err();
    assert!(matches!(error, ProcessingError::IgnoredEventRejected { .. }));
    // Escalated ignored events do not corrupt the machine.
    assert!(!failing.is_destroyed());
    assert!(failing.is_running());
}

#[test]
fn listener_errors_are_delayed_and_recoverable() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let a = machine.add_initial_state(root, State::named("a")).unwrap();
    let b = machine.add_state(root, State::named("b")).unwrap();
    machine.add_transition(a, Transition::to::<Switch>(b)).unwrap();
    machine.on_entry(b, |_, _| Err(ListenerError::new("entry hook failed")));

    machine.start().unwrap();
    let error = machine.process_event(Switch).unwrap_err();
    assert!(matches!(error, ProcessingError::Listener(_)));
    // The step completed despite the failing listener.
    assert_eq!(machine.active_state_names(), vec!["b"]);
    assert!(!machine.is_destroyed());
    assert!(machine.is_running());
}

#[test]
fn listener_error_handler_swallows_failures() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let a = machine.add_initial_state(root, State::named("a")).unwrap();
    let b = machine.add_state(root, State::named("b")).unwrap();
    machine.add_transition(a, Transition::to::<Switch>(b)).unwrap();
    machine.on_entry(b, |_, _| Err(ListenerError::new("boom")));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    machine.set_listener_error_handler(move |error| {
        sink.lock().unwrap().push(error.message.clone());
    });

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["boom".to_owned()]);
}

#[test]
fn lifecycle_stop_restart_and_destroy() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let a = machine.add_initial_state(root, State::named("a")).unwrap();
    let b = machine.add_state(root, State::named("b")).unwrap();
    machine.add_transition(a, Transition::to::<Switch>(b)).unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    machine.stop().unwrap();
    assert!(!machine.is_running());
    assert!(machine.active_states().is_empty());
    assert!(matches!(
        machine.process_event(Switch).unwrap_err(),
        ProcessingError::NotRunning
    ));

    // Restart begins from the initial configuration again.
    machine.start().unwrap();
    assert_eq!(machine.active_state_names(), vec!["a"]);

    machine.destroy().unwrap();
    assert!(machine.is_destroyed());
    assert!(matches!(
        machine.process_event(Switch).unwrap_err(),
        ProcessingError::MachineDestroyed
    ));
    assert!(matches!(
        machine.start().unwrap_err(),
        ProcessingError::MachineDestroyed
    ));
}

#[test]
fn stop_exits_the_tree_with_exit_hooks() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let outer = machine.add_initial_state(root, State::named("outer")).unwrap();
    machine.add_initial_state(outer, State::named("inner")).unwrap();

    machine.start().unwrap();
    let trace = trace_notifications(&mut machine);
    machine.stop().unwrap();
    assert_eq!(
        drain(&trace),
        vec!["exit:inner".to_owned(), "exit:outer".to_owned(), "stopped".to_owned()]
    );
}

#[test]
fn undo_returns_to_the_previous_configuration() {
    let mut machine = StateMachine::with_config(
        "m",
        MachineConfig {
            enable_undo: true,
            ..MachineConfig::default()
        },
    );
    let root = machine.root();
    let a = machine.add_initial_state(root, State::named("a")).unwrap();
    let b = machine.add_state(root, State::named("b")).unwrap();
    let c = machine.add_state(root, State::named("c")).unwrap();
    machine.add_transition(a, Transition::to::<Switch>(b)).unwrap();
    machine.add_transition(b, Transition::to::<Go>(c)).unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    machine.process_event(Go).unwrap();
    assert_eq!(machine.active_state_names(), vec!["c"]);

    let wrapped_seen = Arc::new(AtomicBool::new(false));
    let observed = wrapped_seen.clone();
    machine.on_entry(b, move |_, event| {
        if event.event_as::<WrappedEvent>().is_some() {
            observed.store(true, Ordering::SeqCst);
        }
        Ok(())
    });

    assert_eq!(
        machine.process_event(UndoEvent).unwrap(),
        ProcessingResult::Processed
    );
    assert_eq!(machine.active_state_names(), vec!["b"]);
    assert!(wrapped_seen.load(Ordering::SeqCst));

    machine.process_event(UndoEvent).unwrap();
    assert_eq!(machine.active_state_names(), vec!["a"]);

    // Nothing further to undo.
    assert_eq!(
        machine.process_event(UndoEvent).unwrap(),
        ProcessingResult::Ignored
    );
}

#[test]
fn data_state_fills_from_argument_and_keeps_last_value() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let idle = machine.add_initial_state(root, State::named("idle")).unwrap();
    let loaded = machine
        .add_state(root, State::data::<u32>("loaded").with_default_data(0_u32))
        .unwrap();
    machine
        .add_transition(idle, Transition::to::<Go>(loaded))
        .unwrap();
    machine
        .add_transition(loaded, Transition::to::<Switch>(idle))
        .unwrap();

    machine.start().unwrap();
    assert_eq!(machine.data::<u32>(loaded), None);

    machine
        .process_event_with(Go, Arc::new(42_u32))
        .unwrap();
    assert_eq!(machine.data::<u32>(loaded), Some(&42));

    machine.process_event(Switch).unwrap();
    // Inactive: the live view disappears, the fallback view stays.
    assert_eq!(machine.data::<u32>(loaded), None);
    assert_eq!(machine.last_data::<u32>(loaded), Some(&42));
}

#[test]
fn data_state_uses_declared_extractor_first() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let idle = machine.add_initial_state(root, State::named("idle")).unwrap();
    let sized = machine
        .add_state(
            root,
            State::data::<u32>("sized").with_extractor(|ctx| ctx.event_as::<Pick>().map(|p| p.0)),
        )
        .unwrap();
    machine.add_transition(idle, Transition::to::<Pick>(sized)).unwrap();

    machine.start().unwrap();
    machine.process_event(Pick(7)).unwrap();
    assert_eq!(machine.data::<u32>(sized), Some(&7));
}

#[test]
fn nested_machine_is_opaque_and_self_managing() {
    let mut inner = StateMachine::new("inner");
    let inner_root = inner.root();
    let inner_a = inner.add_initial_state(inner_root, State::named("innerA")).unwrap();
    let inner_b = inner.add_state(inner_root, State::named("innerB")).unwrap();
    inner
        .add_transition(inner_a, Transition::to::<Go>(inner_b))
        .unwrap();

    let mut machine = StateMachine::new("outer");
    let root = machine.root();
    let start = machine.add_initial_state(root, State::named("start")).unwrap();
    let embedded = machine.add_state(root, State::machine(inner)).unwrap();
    let after = machine.add_state(root, State::named("after")).unwrap();
    machine
        .add_transition(start, Transition::to::<Switch>(embedded))
        .unwrap();
    machine
        .add_transition(embedded, Transition::to::<Finish>(after))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();

    // The inner machine auto-started on entry and runs its own transitions.
    assert!(machine.nested_machine(embedded).unwrap().is_running());
    machine
        .nested_machine_mut(embedded)
        .unwrap()
        .process_event(Go)
        .unwrap();
    assert_eq!(
        machine.nested_machine(embedded).unwrap().active_state_names(),
        vec!["innerB"]
    );
    // The outer machine treats it as one atomic state.
    assert_eq!(machine.active_state_names(), vec!["inner"]);

    // Exiting the node stops the inner machine.
    machine.process_event(Finish).unwrap();
    assert!(!machine.nested_machine(embedded).unwrap().is_running());
    assert_eq!(machine.active_state_names(), vec!["after"]);
}

#[test]
fn conditional_transition_decides_lazily() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let start = machine.add_initial_state(root, State::named("start")).unwrap();
    let low = machine.add_state(root, State::named("low")).unwrap();
    let high = machine.add_state(root, State::named("high")).unwrap();
    machine
        .add_transition(
            start,
            Transition::conditional::<Pick, _>(move |ctx| match ctx.event_as::<Pick>() {
                Some(pick) if pick.0 > 10 => Direction::target(high),
                Some(_) => Direction::target(low),
                None => Direction::NoTransition,
            }),
        )
        .unwrap();

    machine.start().unwrap();
    machine.process_event(Pick(11)).unwrap();
    assert_eq!(machine.active_state_names(), vec!["high"]);
}

#[test]
fn transition_argument_overrides_the_event_argument() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let a = machine.add_initial_state(root, State::named("a")).unwrap();
    let b = machine.add_state(root, State::named("b")).unwrap();
    machine
        .add_transition(
            a,
            Transition::to::<Switch>(b).with_argument(Arc::new("attached".to_owned())),
        )
        .unwrap();

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    machine.on_entry(b, move |_, event| {
        *sink.lock().unwrap() = event
            .argument
            .as_ref()
            .and_then(|argument| argument.downcast_ref::<String>().cloned());
        Ok(())
    });

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    assert_eq!(*seen.lock().unwrap(), Some("attached".to_owned()));
}

#[test]
fn root_child_mode_can_be_parallel() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    machine.set_child_mode(root, ChildMode::Parallel).unwrap();
    let r1 = machine.add_state(root, State::named("r1")).unwrap();
    let r2 = machine.add_state(root, State::named("r2")).unwrap();
    machine.add_initial_state(r1, State::named("r1a")).unwrap();
    machine.add_initial_state(r2, State::named("r2a")).unwrap();

    machine.start().unwrap();
    assert_eq!(
        machine.active_state_names(),
        vec!["r1", "r1a", "r2", "r2a"]
    );
}

#[test]
fn mutation_is_rejected_while_running() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    machine.add_initial_state(root, State::named("a")).unwrap();
    machine.start().unwrap();
    let error = machine.add_state(root, State::named("late")).unwrap_err();
    assert!(matches!(
        error,
        strata::ConfigError::MutationWhileActive { .. }
    ));
}

#[test]
fn finished_machine_ignores_ordinary_events() {
    let mut machine = StateMachine::new("m");
    let root = machine.root();
    let a = machine.add_initial_state(root, State::named("a")).unwrap();
    let done = machine.add_state(root, State::final_state("done")).unwrap();
    machine.add_transition(a, Transition::to::<Switch>(done)).unwrap();

    machine.start().unwrap();
    machine.process_event(Switch).unwrap();
    assert!(machine.is_finished());
    assert_eq!(
        machine.process_event(Go).unwrap(),
        ProcessingResult::Ignored
    );
    // Lifecycle still works.
    machine.stop().unwrap();
    assert!(!machine.is_running());
}

#[test]
fn transition_kinds_default_sensibly() {
    assert_eq!(TransitionKind::default(), TransitionKind::Local);
}
