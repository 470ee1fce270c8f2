//! This module provides integration tests for the scheduling strategies as
//! driven by a whole exploration.
#![cfg(test)]

use std::rc::Rc;

use state_explorer::{
    explorer::{Config, SliceExit, SliceReport},
    fork::DivergencePoint,
    oracle::PermissiveOracle,
    scheduler::{
        CooperativeScheduler,
        PriorityClassScheduler,
        RoundRobinScheduler,
        ScheduleCommand,
    },
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

fn ids(raw: &[u64]) -> Vec<StateId> {
    raw.iter().copied().map(StateId::new).collect()
}

#[test]
fn round_robin_interleaves_fork_children() -> anyhow::Result<()> {
    let mut explorer = common::new_explorer(
        Config::new(),
        PermissiveOracle.in_rc(),
        RoundRobinScheduler::new(),
    );

    // The root forks into states 1 and 2, which then alternate strictly
    // until each exits.
    let mut emulator = common::ScriptedEmulator::new([
        common::step_for(0, diverge(0x10)),
        common::step_for(1, SliceReport::exit(SliceExit::Yield)),
        common::step_for(2, SliceReport::exit(SliceExit::Yield)),
    ]);
    explorer.run(&mut emulator)?;

    assert_eq!(emulator.log, ids(&[0, 1, 2, 1, 2]));
    assert!(explorer.consume().surviving.is_empty());

    Ok(())
}

#[test]
fn round_robin_ignores_guest_scheduling_commands() -> anyhow::Result<()> {
    let mut explorer = common::new_explorer(
        Config::new(),
        PermissiveOracle.in_rc(),
        RoundRobinScheduler::new(),
    );

    let mut emulator = common::ScriptedEmulator::new([common::step_for(
        0,
        SliceReport::exit(SliceExit::Command(ScheduleCommand::Yield)),
    )]);

    // An unsupported command is dropped without becoming an error.
    explorer.run(&mut emulator)?;
    assert_eq!(emulator.log, ids(&[0, 0]));

    Ok(())
}

#[test]
fn the_cooperative_scheduler_obeys_guest_commands() -> anyhow::Result<()> {
    let mut explorer = common::new_explorer(
        Config::new(),
        PermissiveOracle.in_rc(),
        CooperativeScheduler::new(),
    );

    let mut emulator = common::ScriptedEmulator::new([
        common::step_for(0, diverge(0x10)),
        // A yield from the lowest live identifier wraps to the highest.
        common::step_for(1, SliceReport::exit(SliceExit::Command(ScheduleCommand::Yield))),
        common::step_for(
            2,
            SliceReport::exit(SliceExit::Command(ScheduleCommand::ScheduleNext(
                StateId::new(1),
            ))),
        ),
    ]);
    explorer.run(&mut emulator)?;

    // After state 1 exits, the scheduler falls back to the lowest survivor.
    assert_eq!(emulator.log, ids(&[0, 1, 2, 1, 2]));

    Ok(())
}

#[test]
fn identically_seeded_priority_explorations_are_reproducible() -> anyhow::Result<()> {
    let classifier: Rc<dyn Fn(&state_explorer::state::ExecutionState) -> u64> =
        Rc::new(|state| state.constraints().len() as u64);

    let run_once = |seed: u64| -> anyhow::Result<Vec<StateId>> {
        let mut explorer = common::new_explorer(
            Config::new(),
            PermissiveOracle.in_rc(),
            PriorityClassScheduler::new(classifier.clone(), seed),
        );
        let mut emulator = common::ScriptedEmulator::new([
            common::step(diverge(0x10)),
            common::step(SliceReport::exit(SliceExit::Yield)),
            common::step(SliceReport::exit(SliceExit::Yield)),
            common::step(SliceReport::exit(SliceExit::Yield)),
            common::step(SliceReport::exit(SliceExit::Yield)),
        ]);
        explorer.run(&mut emulator)?;
        Ok(emulator.log)
    };

    assert_eq!(run_once(0xfeed)?, run_once(0xfeed)?);

    Ok(())
}
