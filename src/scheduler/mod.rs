//! This module contains the scheduling interface and the built-in
//! scheduling strategies.
//!
//! A scheduler ranks the schedulable states and picks the one the driver
//! should bind to the emulator next. It never owns states; it tracks
//! identifiers and is kept in sync with the pool through [`PoolUpdate`]
//! notifications. Strategies are pluggable behind the [`Scheduler`] trait
//! and the engine ships three: strict rotation, sticky cooperative, and
//! seeded priority-class selection.

pub mod cooperative;
pub mod priority;
pub mod round_robin;

pub use cooperative::CooperativeScheduler;
pub use priority::PriorityClassScheduler;
pub use round_robin::RoundRobinScheduler;

use std::fmt::Debug;

use crate::{
    error::scheduling::{Error, Result},
    state::{ExecutionState, StateId},
};

/// The interface to an object that decides which execution state runs next.
pub trait Scheduler
where
    Self: Debug,
{
    /// Picks the state the driver should bind to the emulator next.
    ///
    /// Selection does not consume the pick: the same state remains
    /// schedulable and may be picked again on the next call, depending on
    /// the strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoStatesAvailable`] if no schedulable states remain.
    fn select_state(&mut self) -> Result<StateId>;

    /// Brings the scheduler's view in sync with the pool after states were
    /// added or removed.
    ///
    /// Identifiers in `removed` that the scheduler never tracked are
    /// ignored; removal is idempotent.
    fn update(&mut self, update: &PoolUpdate);

    /// Checks whether the scheduler tracks no schedulable states.
    fn empty(&self) -> bool;

    /// Applies a strategy-specific scheduling `command` issued by the
    /// running guest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandNotSupported`] unless the strategy opts in.
    fn command(&mut self, command: &ScheduleCommand) -> Result<()> {
        let _ = command;
        Err(Error::CommandNotSupported)
    }
}

/// A batch of pool changes handed to [`Scheduler::update`].
#[derive(Debug)]
pub struct PoolUpdate<'a> {
    /// The state currently bound to the emulator, if any.
    pub current: Option<StateId>,

    /// The states that entered the pool.
    pub added: &'a [&'a ExecutionState],

    /// The identifiers of the states that left the pool or became
    /// unschedulable.
    pub removed: &'a [StateId],
}

impl<'a> PoolUpdate<'a> {
    /// Constructs an update carrying only additions.
    #[must_use]
    pub fn additions(current: Option<StateId>, added: &'a [&'a ExecutionState]) -> Self {
        let removed = &[];
        Self {
            current,
            added,
            removed,
        }
    }

    /// Constructs an update carrying only removals.
    #[must_use]
    pub fn removals(current: Option<StateId>, removed: &'a [StateId]) -> Self {
        let added = &[];
        Self {
            current,
            added,
            removed,
        }
    }
}

/// A scheduling request issued by the running guest through the cooperative
/// command channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleCommand {
    /// Run the named state next.
    ScheduleNext(StateId),

    /// Hand the processor to another state chosen by the strategy.
    Yield,
}

/// The engine's phase with respect to state execution.
///
/// The engine is never concurrent: transitions between phases happen only at
/// run-slice boundaries on the single driving thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// No state has been bound to the emulator yet.
    Idle,

    /// A state is bound and will run on the next drive.
    Ready,

    /// The emulator is advancing the bound state through a run slice.
    Running,
}
