//! A media player with nested states and history: switching to the menu and
//! back resumes whatever playback sub-state was active before.
//!
//! Run with: `cargo run --example media_player`

use std::any::Any;

use strata::{Event, HistoryKind, State, StateMachine, Transition};

#[derive(Debug)]
struct PlayPause;

#[derive(Debug)]
struct OpenMenu;

#[derive(Debug)]
struct CloseMenu;

impl Event for PlayPause {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for OpenMenu {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for CloseMenu {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn main() {
    let mut machine = StateMachine::new("media-player");
    let root = machine.root();

    let playback = machine
        .add_initial_state(root, State::named("playback"))
        .unwrap();
    let paused = machine
        .add_initial_state(playback, State::named("paused"))
        .unwrap();
    let playing = machine.add_state(playback, State::named("playing")).unwrap();
    let resume = machine
        .add_state(playback, State::history("resume", HistoryKind::Shallow))
        .unwrap();
    let menu = machine.add_state(root, State::named("menu")).unwrap();

    machine
        .add_transition(paused, Transition::to::<PlayPause>(playing))
        .unwrap();
    machine
        .add_transition(playing, Transition::to::<PlayPause>(paused))
        .unwrap();
    machine
        .add_transition(playback, Transition::to::<OpenMenu>(menu))
        .unwrap();
    machine
        .add_transition(menu, Transition::to::<CloseMenu>(resume))
        .unwrap();

    machine.start().unwrap();
    machine.process_event(PlayPause).unwrap();
    println!("before menu: {:?}", machine.active_state_names());

    machine.process_event(OpenMenu).unwrap();
    println!("in menu:     {:?}", machine.active_state_names());

    machine.process_event(CloseMenu).unwrap();
    println!("after menu:  {:?}", machine.active_state_names());
}
