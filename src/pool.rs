//! This module contains the [`StatePool`], the single owner of every live
//! execution state.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::{
    error::execution::{Error, Result},
    state::{ExecutionState, StateId},
};

/// The pool of live execution states.
///
/// All live states are owned here; the fork coordinator is the sole writer
/// of new states and the lifecycle manager is the sole remover. The pool
/// additionally tracks which state is bound to the physical emulator, and
/// refuses to remove that state until a replacement has been bound: the
/// bound state's snapshot is live in the emulator's register file, so
/// destroying it would destroy the machine out from under the running
/// program.
#[derive(Debug, Default)]
pub struct StatePool {
    /// The live states, keyed by identifier.
    states: BTreeMap<StateId, ExecutionState>,

    /// The state currently bound to the physical emulator, if any.
    current: Option<StateId>,
}

impl StatePool {
    /// Constructs an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `state` into the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a state with the same identifier is already
    /// pooled; identifiers are never reused, so this is a programmer bug in
    /// the caller.
    pub fn insert(&mut self, state: ExecutionState) -> Result<()> {
        let id = state.id();
        if self.states.contains_key(&id) {
            return Err(Error::DuplicateState { id });
        }
        self.states.insert(id, state);

        Ok(())
    }

    /// Replaces the pooled state carrying the same identifier as `state`.
    ///
    /// This is how a single-feasible-branch fork lands: the successor keeps
    /// the parent's identifier and takes over its pool slot.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no state with that identifier is pooled.
    pub fn replace(&mut self, state: ExecutionState) -> Result<()> {
        let id = state.id();
        if !self.states.contains_key(&id) {
            return Err(Error::NoSuchState { id });
        }
        self.states.insert(id, state);

        Ok(())
    }

    /// Removes the state with the provided `id` from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state is pooled, or if the state is
    /// currently bound to the emulator.
    pub fn remove(&mut self, id: StateId) -> Result<ExecutionState> {
        if self.current == Some(id) {
            return Err(Error::RemoveCurrentState { id });
        }
        self.states.remove(&id).ok_or(Error::NoSuchState { id })
    }

    /// Binds the state with the provided `id` to the physical emulator.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state is pooled.
    pub fn bind(&mut self, id: StateId) -> Result<()> {
        if !self.states.contains_key(&id) {
            return Err(Error::NoSuchState { id });
        }
        self.current = Some(id);

        Ok(())
    }

    /// Unbinds whichever state is bound to the physical emulator.
    pub fn unbind(&mut self) {
        self.current = None;
    }

    /// Atomically retires the bound state in favour of `replacement`,
    /// removing and returning the old bound state.
    ///
    /// This is the fork path: the parent can only leave the pool once one of
    /// its children has been bound in its place.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no state is bound or if `replacement` is not
    /// pooled.
    pub fn swap_current(&mut self, replacement: StateId) -> Result<ExecutionState> {
        if !self.states.contains_key(&replacement) {
            return Err(Error::NoSuchState { id: replacement });
        }
        let retiring = self.current.ok_or(Error::NoSuchState { id: replacement })?;
        self.current = Some(replacement);

        self.states
            .remove(&retiring)
            .ok_or(Error::NoSuchState { id: retiring })
    }

    /// Gets the identifier of the state bound to the physical emulator, if
    /// any.
    #[must_use]
    pub fn current(&self) -> Option<StateId> {
        self.current
    }

    /// Gets the state with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state is pooled.
    pub fn get(&self, id: StateId) -> Result<&ExecutionState> {
        self.states.get(&id).ok_or(Error::NoSuchState { id })
    }

    /// Gets the state with the provided `id` for modification.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state is pooled.
    pub fn get_mut(&mut self, id: StateId) -> Result<&mut ExecutionState> {
        self.states.get_mut(&id).ok_or(Error::NoSuchState { id })
    }

    /// Checks whether a state with the provided `id` is pooled.
    #[must_use]
    pub fn contains(&self, id: StateId) -> bool {
        self.states.contains_key(&id)
    }

    /// Gets the number of live states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Checks whether the pool holds no states.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Gets the identifiers of all pooled states in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<StateId> {
        self.states.keys().copied().collect_vec()
    }

    /// Gets the identifiers of the normal partition: states that are
    /// neither speculative nor marked as zombies, and hence eligible for
    /// scheduling.
    #[must_use]
    pub fn normal_ids(&self) -> Vec<StateId> {
        self.states
            .values()
            .filter(|state| !state.is_speculative() && !state.is_zombie())
            .map(ExecutionState::id)
            .collect_vec()
    }

    /// Gets the identifiers of the speculative partition.
    #[must_use]
    pub fn speculative_ids(&self) -> Vec<StateId> {
        self.states
            .values()
            .filter(|state| state.is_speculative())
            .map(ExecutionState::id)
            .collect_vec()
    }

    /// Promotes the speculative state with the provided `id` into the
    /// normal partition, making it eligible for scheduling.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such state is pooled or if it is not
    /// speculative.
    pub fn promote(&mut self, id: StateId) -> Result<()> {
        let state = self.states.get_mut(&id).ok_or(Error::NoSuchState { id })?;
        if !state.is_speculative() {
            return Err(Error::NotSpeculative { id });
        }
        state.set_speculative(false);

        Ok(())
    }

    /// Iterates over the pooled states in ascending identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionState> {
        self.states.values()
    }

    /// Empties the pool, unbinding the emulator and returning the states in
    /// ascending identifier order.
    ///
    /// This ends an exploration: the surviving states pass to the caller for
    /// inspection.
    pub fn drain(&mut self) -> Vec<ExecutionState> {
        self.current = None;
        let states = std::mem::take(&mut self.states);
        states.into_values().collect_vec()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::execution::Error,
        pool::StatePool,
        state::{ExecutionState, StateId, StateIdAllocator},
    };

    fn state(ids: &mut StateIdAllocator) -> ExecutionState {
        ExecutionState::new_root(ids.allocate(), true)
    }

    #[test]
    fn rejects_duplicate_identifiers() -> anyhow::Result<()> {
        let mut ids = StateIdAllocator::new();
        let mut pool = StatePool::new();
        let first = state(&mut ids);
        let duplicate = first.duplicate(first.id());

        pool.insert(first)?;
        let error = pool
            .insert(duplicate)
            .expect_err("two states with one identifier were pooled");
        assert_eq!(
            error,
            Error::DuplicateState {
                id: StateId::new(0)
            }
        );

        Ok(())
    }

    #[test]
    fn refuses_to_remove_the_bound_state() -> anyhow::Result<()> {
        let mut ids = StateIdAllocator::new();
        let mut pool = StatePool::new();
        let bound = state(&mut ids);
        let id = bound.id();

        pool.insert(bound)?;
        pool.bind(id)?;

        let error = pool
            .remove(id)
            .expect_err("the bound state was removed from the pool");
        assert_eq!(error, Error::RemoveCurrentState { id });

        pool.unbind();
        assert!(pool.remove(id).is_ok());

        Ok(())
    }

    #[test]
    fn swapping_retires_the_parent_only_after_binding_the_child() -> anyhow::Result<()> {
        let mut ids = StateIdAllocator::new();
        let mut pool = StatePool::new();
        let parent = state(&mut ids);
        let child = state(&mut ids);
        let (parent_id, child_id) = (parent.id(), child.id());

        pool.insert(parent)?;
        pool.insert(child)?;
        pool.bind(parent_id)?;

        let retired = pool.swap_current(child_id)?;
        assert_eq!(retired.id(), parent_id);
        assert_eq!(pool.current(), Some(child_id));
        assert!(!pool.contains(parent_id));

        Ok(())
    }

    #[test]
    fn partitions_split_on_the_speculative_flag() -> anyhow::Result<()> {
        let mut ids = StateIdAllocator::new();
        let mut pool = StatePool::new();
        let normal = state(&mut ids);
        let mut speculative = state(&mut ids);
        speculative.set_speculative(true);
        let speculative_id = speculative.id();

        pool.insert(normal)?;
        pool.insert(speculative)?;

        assert_eq!(pool.normal_ids(), vec![StateId::new(0)]);
        assert_eq!(pool.speculative_ids(), vec![speculative_id]);

        pool.promote(speculative_id)?;
        assert_eq!(pool.normal_ids().len(), 2);
        assert!(pool.speculative_ids().is_empty());

        Ok(())
    }
}
