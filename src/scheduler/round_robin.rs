//! A strict-rotation scheduling strategy.

use crate::{
    error::scheduling::{Error, Result},
    scheduler::{PoolUpdate, Scheduler},
    state::StateId,
};

/// A scheduler that cycles through the schedulable states in insertion
/// order.
///
/// Each selection advances the rotation by one, so every tracked state runs
/// exactly once per full cycle. Removals take effect immediately: a removed
/// state is never selected again, even if it was next in the rotation.
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    /// The tracked states in rotation order.
    order: Vec<StateId>,

    /// The index of the next state to select.
    cursor: usize,
}

impl RoundRobinScheduler {
    /// Constructs a scheduler tracking no states.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobinScheduler {
    fn select_state(&mut self) -> Result<StateId> {
        if self.order.is_empty() {
            return Err(Error::NoStatesAvailable);
        }
        if self.cursor >= self.order.len() {
            self.cursor = 0;
        }
        let selected = self.order[self.cursor];
        self.cursor += 1;

        Ok(selected)
    }

    fn update(&mut self, update: &PoolUpdate) {
        for removed in update.removed {
            if let Some(position) = self.order.iter().position(|id| id == removed) {
                self.order.remove(position);
                // Keep the rotation pointing at the same upcoming state.
                if position < self.cursor {
                    self.cursor -= 1;
                }
            }
        }
        for added in update.added {
            let id = added.id();
            if !self.order.contains(&id) {
                self.order.push(id);
            }
        }
    }

    fn empty(&self) -> bool {
        self.order.is_empty()
    }
}
