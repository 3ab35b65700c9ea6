//! A checkout flow with parallel verification regions and event replay: the
//! payment and address checks run concurrently, the order completes when both
//! regions finish, and the processed events are recorded and replayed onto a
//! fresh machine.
//!
//! Run with: `cargo run --example checkout_flow`

use std::any::Any;

use strata::{
    Event, MachineConfig, RecorderConfig, State, StateMachine, Transition,
};

#[derive(Debug)]
struct Submit;

#[derive(Debug)]
struct PaymentOk;

#[derive(Debug)]
struct AddressOk;

impl Event for Submit {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for PaymentOk {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Event for AddressOk {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn build() -> StateMachine {
    let mut machine = StateMachine::with_config(
        "checkout",
        MachineConfig {
            recording: Some(RecorderConfig::default()),
            ..MachineConfig::default()
        },
    );
    let root = machine.root();

    let cart = machine.add_initial_state(root, State::named("cart")).unwrap();
    let verifying = machine
        .add_state(root, State::named("verifying").parallel())
        .unwrap();
    let payment = machine.add_state(verifying, State::named("payment")).unwrap();
    let address = machine.add_state(verifying, State::named("address")).unwrap();
    let paying = machine
        .add_initial_state(payment, State::named("paying"))
        .unwrap();
    let paid = machine
        .add_state(payment, State::final_state("paid"))
        .unwrap();
    let checking = machine
        .add_initial_state(address, State::named("checking"))
        .unwrap();
    let confirmed = machine
        .add_state(address, State::final_state("confirmed"))
        .unwrap();
    let complete = machine.add_state(root, State::named("complete")).unwrap();

    machine
        .add_transition(cart, Transition::to::<Submit>(verifying))
        .unwrap();
    machine
        .add_transition(paying, Transition::to::<PaymentOk>(paid))
        .unwrap();
    machine
        .add_transition(checking, Transition::to::<AddressOk>(confirmed))
        .unwrap();
    machine
        .add_transition(verifying, Transition::on_finished(verifying, complete))
        .unwrap();
    machine
}

fn main() {
    let mut machine = build();
    machine.start().unwrap();

    machine.process_event(Submit).unwrap();
    println!("verifying: {:?}", machine.active_state_names());

    machine.process_event(PaymentOk).unwrap();
    machine.process_event(AddressOk).unwrap();
    // Both regions finished; the finished-event moved the order to complete.
    println!("done:      {:?}", machine.active_state_names());

    let recorded = machine.recorded_events().unwrap();
    let mut replayed = build();
    replayed.restore(&recorded).unwrap();
    println!("replayed:  {:?}", replayed.active_state_names());
    assert_eq!(
        replayed.active_state_names(),
        machine.active_state_names()
    );
}
