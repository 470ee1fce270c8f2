//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use std::collections::VecDeque;

use state_explorer as se;
use state_explorer::{
    explorer::{Config, Emulator, Explorer, SliceExit, SliceReport},
    oracle::DynOracle,
    scheduler::Scheduler,
    state::{ExecutionState, StateId},
    watchdog::LazyWatchdog,
};

/// One scripted run slice: the report the emulator hands back, optionally
/// pinned to the state expected to be bound when the slice runs.
pub struct Step {
    expect: Option<StateId>,
    report: SliceReport,
}

/// Constructs a scripted slice with no expectation on which state runs it.
#[allow(unused)] // It is actually
pub fn step(report: SliceReport) -> Step {
    let expect = None;
    Step { expect, report }
}

/// Constructs a scripted slice that asserts the state with the raw
/// identifier `id` is the one bound when the slice runs.
#[allow(unused)] // It is actually
pub fn step_for(id: u64, report: SliceReport) -> Step {
    let expect = Some(StateId::new(id));
    Step { expect, report }
}

/// Constructs a report for a slice that ended with `exit` after covering
/// previously unseen code at `locations`.
#[allow(unused)] // It is actually
pub fn covering(exit: SliceExit, locations: &[u64]) -> SliceReport {
    let mut report = SliceReport::exit(exit);
    report.new_locations = locations.to_vec();
    report
}

/// An emulator that replays a script of slice reports and records which
/// state ran each slice.
///
/// Once the script is drained, every state handed to it exits, which winds
/// the exploration down deterministically.
#[derive(Default)]
pub struct ScriptedEmulator {
    script: VecDeque<Step>,

    /// The identifier of the state that ran each slice, in order.
    pub log: Vec<StateId>,
}

impl ScriptedEmulator {
    /// Constructs an emulator replaying `script` in order.
    pub fn new(script: impl IntoIterator<Item = Step>) -> Self {
        let script = script.into_iter().collect();
        let log = Vec::new();
        Self { script, log }
    }
}

impl Emulator for ScriptedEmulator {
    fn run_slice(&mut self, state: &mut ExecutionState, _budget: Option<u64>) -> SliceReport {
        self.log.push(state.id());

        let Some(next) = self.script.pop_front() else {
            return SliceReport::exit(SliceExit::Exited);
        };
        if let Some(expected) = next.expect {
            assert_eq!(
                expected,
                state.id(),
                "the scripted slice expected state {expected} but state {} ran",
                state.id()
            );
        }
        next.report
    }
}

/// Constructs an explorer over `scheduler` and `oracle` with the provided
/// `config`, using a watchdog that never fires.
#[allow(unused)] // It is actually
pub fn new_explorer(
    config: Config,
    oracle: DynOracle,
    scheduler: impl Scheduler + 'static,
) -> Explorer {
    se::new(config, oracle, Box::new(scheduler), LazyWatchdog.in_rc())
}
