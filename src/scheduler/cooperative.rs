//! A sticky scheduling strategy driven by guest commands.

use std::collections::BTreeSet;

use log::debug;

use crate::{
    error::scheduling::{Error, Result},
    scheduler::{PoolUpdate, ScheduleCommand, Scheduler},
    state::StateId,
};

/// A scheduler that keeps running the same state until the guest asks for a
/// switch.
///
/// This hands scheduling control to the program under analysis: the bound
/// state runs slice after slice until it issues a [`ScheduleCommand`], at
/// which point the requested transfer happens at the next slice boundary.
/// It exists for guests that implement their own thread or process model and
/// need exploration to respect it.
#[derive(Debug, Default)]
pub struct CooperativeScheduler {
    /// The tracked states in ascending identifier order.
    states: BTreeSet<StateId>,

    /// The state the scheduler is stuck to.
    current: Option<StateId>,
}

impl CooperativeScheduler {
    /// Constructs a scheduler tracking no states.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks the state a yield transfers to: the tracked state with the
    /// greatest identifier strictly below `from`, wrapping to the greatest
    /// overall.
    fn yield_target(&self, from: StateId) -> Option<StateId> {
        self.states
            .range(..from)
            .next_back()
            .or_else(|| self.states.iter().next_back())
            .copied()
    }
}

impl Scheduler for CooperativeScheduler {
    fn select_state(&mut self) -> Result<StateId> {
        if let Some(current) = self.current {
            return Ok(current);
        }
        let first = self
            .states
            .iter()
            .next()
            .copied()
            .ok_or(Error::NoStatesAvailable)?;
        self.current = Some(first);

        Ok(first)
    }

    fn update(&mut self, update: &PoolUpdate) {
        for removed in update.removed {
            self.states.remove(removed);
            if self.current == Some(*removed) {
                // The stuck-to state died, so stick to the lowest survivor.
                self.current = self.states.iter().next().copied();
            }
        }
        for added in update.added {
            self.states.insert(added.id());
        }
    }

    fn empty(&self) -> bool {
        self.states.is_empty()
    }

    fn command(&mut self, command: &ScheduleCommand) -> Result<()> {
        match command {
            ScheduleCommand::ScheduleNext(id) => {
                if !self.states.contains(id) {
                    return Err(Error::NoSuchState { id: *id });
                }
                debug!("guest requested state {id} to run next");
                self.current = Some(*id);
            }
            ScheduleCommand::Yield => {
                if self.states.len() <= 1 {
                    return Ok(());
                }
                let from = match self.current {
                    Some(current) => current,
                    None => return Ok(()),
                };
                if let Some(target) = self.yield_target(from) {
                    debug!("guest yielded from state {from} to state {target}");
                    self.current = Some(target);
                }
            }
        }

        Ok(())
    }
}
