//! This module provides integration tests for state lifecycle transitions
//! across a whole exploration: success, suspension, pruning, and the
//! coverage-stall timeout.
#![cfg(test)]

use std::{cell::RefCell, rc::Rc};

use state_explorer::{
    events::{TerminationEvent, TerminationReason},
    explorer::{Config, SliceExit, SliceReport},
    fork::DivergencePoint,
    oracle::PermissiveOracle,
    scheduler::RoundRobinScheduler,
    state::{constraints::SymbolicCondition, StateId},
};

mod common;

fn diverge(location: u64) -> SliceReport {
    SliceReport::exit(SliceExit::Diverged(DivergencePoint {
        location,
        condition: SymbolicCondition::new(location),
        concrete_hint: true,
    }))
}

#[test]
fn succeeded_states_survive_the_exploration() -> anyhow::Result<()> {
    let mut explorer = common::new_explorer(
        Config::new(),
        PermissiveOracle.in_rc(),
        RoundRobinScheduler::new(),
    );

    let mut emulator = common::ScriptedEmulator::new([
        common::step_for(0, diverge(0x10)),
        common::step_for(1, SliceReport::exit(SliceExit::Succeeded)),
    ]);
    explorer.run(&mut emulator)?;

    // State 1 is suspended with its snapshot and constraints intact; state 2
    // ran to exit and was retired along with the fork parent.
    let summary = explorer.consume();
    let surviving_ids: Vec<_> = summary.surviving.iter().map(|state| state.id()).collect();
    let retired_ids: Vec<_> = summary.retired.iter().map(|state| state.id()).collect();
    assert_eq!(surviving_ids, vec![StateId::new(1)]);
    assert_eq!(retired_ids, vec![StateId::new(0), StateId::new(2)]);
    assert_eq!(summary.surviving[0].constraints().len(), 1);

    Ok(())
}

#[test]
fn the_coverage_timeout_prunes_to_one_successful_state() -> anyhow::Result<()> {
    let mut explorer = common::new_explorer(
        Config::new().with_coverage_timeout_ticks(1),
        PermissiveOracle.in_rc(),
        RoundRobinScheduler::new(),
    );

    let events: Rc<RefCell<Vec<TerminationEvent>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    let _token = explorer.on_termination(move |event| sink.borrow_mut().push(*event));

    let mut emulator = common::ScriptedEmulator::new([
        common::step_for(0, diverge(0x10)),
        common::step_for(1, SliceReport::exit(SliceExit::Succeeded)),
    ]);
    explorer.run(&mut emulator)?;

    // Once state 1 succeeded and the stall clock ran out, state 2 lost the
    // pruning pass; state 1 was resumed to finish the exploration.
    assert_eq!(emulator.log, vec![StateId::new(0), StateId::new(1), StateId::new(1)]);

    let summary = explorer.consume();
    assert!(summary.surviving.is_empty());
    let retired_ids: Vec<_> = summary.retired.iter().map(|state| state.id()).collect();
    assert_eq!(
        retired_ids,
        vec![StateId::new(0), StateId::new(2), StateId::new(1)]
    );

    assert_eq!(
        *events.borrow(),
        vec![
            TerminationEvent {
                state: StateId::new(2),
                reason: TerminationReason::Pruned
            },
            TerminationEvent {
                state: StateId::new(1),
                reason: TerminationReason::GuestExit
            },
        ]
    );

    Ok(())
}

#[test]
fn fresh_coverage_holds_the_pruning_pass_off() -> anyhow::Result<()> {
    let mut explorer = common::new_explorer(
        Config::new().with_coverage_timeout_ticks(2),
        PermissiveOracle.in_rc(),
        RoundRobinScheduler::new(),
    );

    let pruned = Rc::new(RefCell::new(0_usize));
    let counter = pruned.clone();
    let _token = explorer.on_termination(move |event| {
        if event.reason == TerminationReason::Pruned {
            *counter.borrow_mut() += 1;
        }
    });

    // Every slice covers new code, so the stall clock never reaches the
    // timeout even though state 1 has already succeeded.
    let mut emulator = common::ScriptedEmulator::new([
        common::step_for(
            0,
            common::covering(
                SliceExit::Diverged(DivergencePoint {
                    location: 0x10,
                    condition: SymbolicCondition::new(0x10),
                    concrete_hint: true,
                }),
                &[0x10],
            ),
        ),
        common::step_for(1, common::covering(SliceExit::Succeeded, &[0x14])),
        common::step_for(2, common::covering(SliceExit::Yield, &[0x20])),
        common::step_for(2, common::covering(SliceExit::Yield, &[0x24])),
        common::step_for(2, common::covering(SliceExit::Exited, &[0x28])),
    ]);
    explorer.run(&mut emulator)?;

    assert_eq!(*pruned.borrow(), 0);
    let summary = explorer.consume();
    let surviving_ids: Vec<_> = summary.surviving.iter().map(|state| state.id()).collect();
    assert_eq!(surviving_ids, vec![StateId::new(1)]);

    Ok(())
}
