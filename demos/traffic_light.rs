//! A flat traffic light cycling through its phases.
//!
//! Run with: `cargo run --example traffic_light`

use std::any::Any;

use strata::{Event, Notification, State, StateMachine, Transition};

#[derive(Debug)]
struct TimerElapsed;

impl Event for TimerElapsed {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn main() {
    let mut machine = StateMachine::new("traffic-light");
    let root = machine.root();
    let red = machine.add_initial_state(root, State::named("red")).unwrap();
    let green = machine.add_state(root, State::named("green")).unwrap();
    let yellow = machine.add_state(root, State::named("yellow")).unwrap();

    machine
        .add_transition(red, Transition::to::<TimerElapsed>(green))
        .unwrap();
    machine
        .add_transition(green, Transition::to::<TimerElapsed>(yellow))
        .unwrap();
    machine
        .add_transition(yellow, Transition::to::<TimerElapsed>(red))
        .unwrap();

    machine.add_listener_fn(|machine, notification| {
        if let Notification::StateEntry { state, .. } = notification {
            println!("light is now {}", machine.state_name(*state).unwrap_or("?"));
        }
        Ok(())
    });

    machine.start().unwrap();
    for _ in 0..6 {
        machine.process_event(TimerElapsed).unwrap();
    }
}
