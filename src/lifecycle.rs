//! This module contains the [`LifecycleManager`], the component through
//! which states succeed, suspend, resume, and die.
//!
//! The manager is the sole remover of states from the pool. It tracks a
//! status per live state, keeps the suspended-successful set, and implements
//! the coverage-stall pruning that keeps long explorations from wandering:
//! when no new guest code has been covered for a configured number of driver
//! ticks and at least one state has succeeded, everything except one
//! successful representative is pruned.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::{
    error::lifecycle::{Error, Result},
    events::{Listeners, Subscription, TerminationEvent, TerminationReason},
    pool::StatePool,
    scheduler::{PoolUpdate, Scheduler},
    state::{ExecutionState, StateId},
};

/// The lifecycle status of a tracked state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateStatus {
    /// The state is live and schedulable.
    Active,

    /// The state reported success and is suspended pending the end of the
    /// exploration or an explicit resume.
    Succeeded,

    /// The state was condemned while bound to the emulator and awaits
    /// reaping at the next slice boundary.
    Zombie,

    /// The state has been removed from the pool for good.
    Terminated,
}

/// The component that applies lifecycle transitions to execution states.
#[derive(Debug)]
pub struct LifecycleManager {
    /// The status of every state ever registered.
    statuses: BTreeMap<StateId, StateStatus>,

    /// The suspended-successful states, in ascending identifier order.
    succeeded: BTreeSet<StateId>,

    /// The condemned-while-bound states awaiting reaping.
    pending: Vec<(StateId, TerminationReason)>,

    /// The number of driver ticks since new coverage was last observed.
    coverage_ticks: u64,

    /// The number of coverage-free ticks after which pruning fires, with
    /// zero disabling the timeout.
    timeout_ticks: u64,

    /// The subscribers notified of each termination.
    termination_events: Listeners<TerminationEvent>,
}

impl LifecycleManager {
    /// Constructs a manager whose coverage-stall pruning fires after
    /// `timeout_ticks` coverage-free driver ticks; zero disables the
    /// timeout.
    #[must_use]
    pub fn new(timeout_ticks: u64) -> Self {
        let statuses = BTreeMap::new();
        let succeeded = BTreeSet::new();
        let pending = Vec::new();
        let coverage_ticks = 0;
        let termination_events = Listeners::new();

        Self {
            statuses,
            succeeded,
            pending,
            coverage_ticks,
            timeout_ticks,
            termination_events,
        }
    }

    /// Registers `callback` to observe every termination, returning the
    /// subscription token.
    pub fn on_termination(&self, callback: impl FnMut(&TerminationEvent) + 'static) -> Subscription {
        self.termination_events.subscribe(callback)
    }

    /// Starts tracking the freshly pooled state with the provided `id`.
    pub fn register(&mut self, id: StateId) {
        self.statuses.insert(id, StateStatus::Active);
    }

    /// Stops tracking a state that was retired by a fork.
    ///
    /// A retired fork parent lives on through its children, so this is not a
    /// termination and no event is published.
    pub fn retire_forked(&mut self, id: StateId) {
        self.statuses.remove(&id);
        self.succeeded.remove(&id);
    }

    /// Gets the status of the state with the provided `id`, if it was ever
    /// registered.
    #[must_use]
    pub fn status(&self, id: StateId) -> Option<StateStatus> {
        self.statuses.get(&id).copied()
    }

    /// Gets the number of suspended-successful states.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    /// Marks the state with the provided `id` as successful, suspending it
    /// from scheduling.
    ///
    /// The state stays in the pool with its snapshot and constraints intact;
    /// it survives the exploration unless pruning claims it first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySucceeded`] if the state already succeeded
    /// and [`Error::AlreadyTerminated`] if it has died. Both are non-fatal
    /// idempotency violations.
    pub fn succeed_state(&mut self, scheduler: &mut dyn Scheduler, id: StateId) -> Result<()> {
        match self.statuses.get(&id) {
            None => return Err(Error::UnknownState { id }),
            Some(StateStatus::Succeeded) => return Err(Error::AlreadySucceeded { id }),
            Some(StateStatus::Zombie | StateStatus::Terminated) => {
                return Err(Error::AlreadyTerminated { id });
            }
            Some(StateStatus::Active) => (),
        }

        info!("state {id} succeeded; suspending it");
        self.statuses.insert(id, StateStatus::Succeeded);
        self.succeeded.insert(id);
        scheduler.update(&PoolUpdate::removals(None, &[id]));

        Ok(())
    }

    /// Returns the suspended-successful state with the provided `id` to the
    /// schedulable set.
    ///
    /// Returns whether the state was resumed; a state that never succeeded
    /// is left untouched.
    pub fn resume_state(
        &mut self,
        pool: &StatePool,
        scheduler: &mut dyn Scheduler,
        id: StateId,
    ) -> bool {
        if !self.succeeded.remove(&id) {
            return false;
        }
        self.statuses.insert(id, StateStatus::Active);
        if let Ok(state) = pool.get(id) {
            debug!("resuming succeeded state {id}");
            scheduler.update(&PoolUpdate::additions(pool.current(), &[state]));
        }

        true
    }

    /// Terminates the state with the provided `id` for `reason`.
    ///
    /// A state that is bound to the emulator cannot leave the pool
    /// immediately; it is condemned as a zombie and reaped by
    /// [`Self::reap_deferred`] at the next slice boundary, in which case
    /// [`None`] is returned. Otherwise the removed state is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyTerminated`] if the state is already dead or
    /// condemned.
    pub fn terminate_state(
        &mut self,
        pool: &mut StatePool,
        scheduler: &mut dyn Scheduler,
        id: StateId,
        reason: TerminationReason,
    ) -> Result<Option<ExecutionState>> {
        match self.statuses.get(&id) {
            None => return Err(Error::UnknownState { id }),
            Some(StateStatus::Zombie | StateStatus::Terminated) => {
                return Err(Error::AlreadyTerminated { id });
            }
            Some(StateStatus::Active | StateStatus::Succeeded) => (),
        }

        self.succeeded.remove(&id);
        scheduler.update(&PoolUpdate::removals(pool.current(), &[id]));

        if pool.current() == Some(id) {
            debug!("state {id} condemned while bound ({reason}); deferring removal");
            self.statuses.insert(id, StateStatus::Zombie);
            if let Ok(state) = pool.get_mut(id) {
                state.set_zombie(true);
            }
            self.pending.push((id, reason));
            return Ok(None);
        }

        info!("terminating state {id}: {reason}");
        let state = pool
            .remove(id)
            .expect("a tracked non-zombie state is pooled and unbound");
        self.statuses.insert(id, StateStatus::Terminated);
        self.termination_events
            .emit(&TerminationEvent { state: id, reason });

        Ok(Some(state))
    }

    /// Reaps the condemned states that are no longer bound to the emulator,
    /// returning them.
    ///
    /// The driver calls this at every slice boundary after unbinding.
    pub fn reap_deferred(&mut self, pool: &mut StatePool) -> Vec<ExecutionState> {
        let mut reaped = Vec::new();
        let mut remaining = Vec::new();

        for (id, reason) in self.pending.drain(..) {
            if pool.current() == Some(id) {
                remaining.push((id, reason));
                continue;
            }
            info!("reaping condemned state {id}: {reason}");
            let state = pool
                .remove(id)
                .expect("a condemned state stays pooled until reaped");
            self.statuses.insert(id, StateStatus::Terminated);
            self.termination_events
                .emit(&TerminationEvent { state: id, reason });
            reaped.push(state);
        }
        self.pending = remaining;

        reaped
    }

    /// Prunes every state except one successful representative.
    ///
    /// The survivor is the suspended-successful state with the lowest
    /// identifier, which is resumed so the exploration can finish through
    /// it. With `keep_current` set, the state bound to the emulator is
    /// spared as well. Returns the pruned states, or [`None`] without
    /// touching anything unless at least one state has succeeded. States
    /// condemned while bound are absent from the return value and surface
    /// later through [`Self::reap_deferred`].
    pub fn kill_all_but_one_successful(
        &mut self,
        pool: &mut StatePool,
        scheduler: &mut dyn Scheduler,
        keep_current: bool,
    ) -> Option<Vec<ExecutionState>> {
        let survivor = self.succeeded.iter().next().copied()?;

        info!(
            "pruning all states but successful state {survivor} ({} live)",
            pool.len()
        );

        let mut pruned = Vec::new();
        for id in pool.ids() {
            if id == survivor {
                continue;
            }
            if keep_current && pool.current() == Some(id) {
                continue;
            }
            if matches!(
                self.statuses.get(&id),
                Some(StateStatus::Zombie | StateStatus::Terminated)
            ) {
                continue;
            }
            if let Ok(Some(removed)) =
                self.terminate_state(pool, scheduler, id, TerminationReason::Pruned)
            {
                pruned.push(removed);
            }
        }

        let resumed = self.resume_state(pool, scheduler, survivor);
        debug_assert!(resumed, "the pruning survivor is always resumable");

        Some(pruned)
    }

    /// Notes that the guest covered previously unseen code at `location`,
    /// resetting the coverage-stall clock.
    pub fn on_new_coverage(&mut self, location: u64) {
        debug!("new code covered at {location:#x}");
        self.coverage_ticks = 0;
    }

    /// Advances the coverage-stall clock by one driver tick, pruning to one
    /// successful state if the configured timeout elapsed.
    ///
    /// Returns the pruned states, or [`None`] if pruning did not run.
    pub fn on_timer(
        &mut self,
        pool: &mut StatePool,
        scheduler: &mut dyn Scheduler,
    ) -> Option<Vec<ExecutionState>> {
        if self.timeout_ticks == 0 {
            return None;
        }
        self.coverage_ticks += 1;
        if self.coverage_ticks < self.timeout_ticks {
            return None;
        }
        self.coverage_ticks = 0;

        info!(
            "no new coverage for {} ticks; pruning to one successful state",
            self.timeout_ticks
        );
        self.kill_all_but_one_successful(pool, scheduler, true)
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use crate::{
        error::lifecycle::Error,
        events::{TerminationEvent, TerminationReason},
        lifecycle::{LifecycleManager, StateStatus},
        pool::StatePool,
        scheduler::{PoolUpdate, RoundRobinScheduler, Scheduler},
        state::{ExecutionState, StateId, StateIdAllocator},
    };

    struct Fixture {
        lifecycle: LifecycleManager,
        pool: StatePool,
        scheduler: RoundRobinScheduler,
        ids: Vec<StateId>,
    }

    fn fixture(count: usize, timeout_ticks: u64) -> Fixture {
        let mut lifecycle = LifecycleManager::new(timeout_ticks);
        let mut pool = StatePool::new();
        let mut scheduler = RoundRobinScheduler::new();
        let mut allocator = StateIdAllocator::new();
        let mut ids = Vec::new();

        for _ in 0..count {
            let state = ExecutionState::new_root(allocator.allocate(), true);
            let id = state.id();
            pool.insert(state).unwrap();
            lifecycle.register(id);
            ids.push(id);
        }
        let pool_ref = &pool;
        let added: Vec<_> = ids.iter().map(|id| pool_ref.get(*id).unwrap()).collect();
        scheduler.update(&PoolUpdate::additions(None, &added));

        Fixture {
            lifecycle,
            pool,
            scheduler,
            ids,
        }
    }

    #[test]
    fn succeeding_twice_is_reported_but_harmless() -> anyhow::Result<()> {
        let mut fx = fixture(2, 0);
        let id = fx.ids[0];

        fx.lifecycle.succeed_state(&mut fx.scheduler, id)?;
        assert_eq!(fx.lifecycle.status(id), Some(StateStatus::Succeeded));
        assert_eq!(fx.lifecycle.succeeded_count(), 1);

        let error = fx
            .lifecycle
            .succeed_state(&mut fx.scheduler, id)
            .expect_err("a succeeded state succeeded again");
        assert_eq!(error, Error::AlreadySucceeded { id });
        assert_eq!(fx.lifecycle.succeeded_count(), 1);

        // The state is suspended, not dead: it stays pooled and off the
        // scheduler.
        assert!(fx.pool.contains(id));
        assert_eq!(fx.scheduler.select_state()?, fx.ids[1]);
        assert_eq!(fx.scheduler.select_state()?, fx.ids[1]);

        Ok(())
    }

    #[test]
    fn resuming_restores_schedulability() -> anyhow::Result<()> {
        let mut fx = fixture(1, 0);
        let id = fx.ids[0];

        fx.lifecycle.succeed_state(&mut fx.scheduler, id)?;
        assert!(fx.scheduler.empty());

        assert!(fx.lifecycle.resume_state(&fx.pool, &mut fx.scheduler, id));
        assert_eq!(fx.lifecycle.status(id), Some(StateStatus::Active));
        assert_eq!(fx.scheduler.select_state()?, id);

        // Resuming an active state is a no-op.
        assert!(!fx.lifecycle.resume_state(&fx.pool, &mut fx.scheduler, id));

        Ok(())
    }

    #[test]
    fn terminating_an_unbound_state_removes_it_at_once() -> anyhow::Result<()> {
        let mut fx = fixture(2, 0);
        let id = fx.ids[1];

        let seen: Rc<RefCell<Vec<TerminationEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _token = fx.lifecycle.on_termination(move |event| sink.borrow_mut().push(*event));

        let removed = fx.lifecycle.terminate_state(
            &mut fx.pool,
            &mut fx.scheduler,
            id,
            TerminationReason::Killed,
        )?;

        assert_eq!(removed.map(|state| state.id()), Some(id));
        assert!(!fx.pool.contains(id));
        assert_eq!(fx.lifecycle.status(id), Some(StateStatus::Terminated));
        assert_eq!(
            *seen.borrow(),
            vec![TerminationEvent {
                state: id,
                reason: TerminationReason::Killed
            }]
        );

        let error = fx
            .lifecycle
            .terminate_state(&mut fx.pool, &mut fx.scheduler, id, TerminationReason::Killed)
            .expect_err("a dead state was terminated again");
        assert_eq!(error, Error::AlreadyTerminated { id });

        Ok(())
    }

    #[test]
    fn terminating_the_bound_state_defers_to_the_slice_boundary() -> anyhow::Result<()> {
        let mut fx = fixture(2, 0);
        let id = fx.ids[0];
        fx.pool.bind(id)?;

        let removed = fx.lifecycle.terminate_state(
            &mut fx.pool,
            &mut fx.scheduler,
            id,
            TerminationReason::GuestExit,
        )?;

        // The condemned state stays pooled while bound and is off the
        // scheduler.
        assert!(removed.is_none());
        assert!(fx.pool.contains(id));
        assert_eq!(fx.lifecycle.status(id), Some(StateStatus::Zombie));
        assert_eq!(fx.scheduler.select_state()?, fx.ids[1]);

        fx.pool.unbind();
        let reaped = fx.lifecycle.reap_deferred(&mut fx.pool);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id(), id);
        assert!(!fx.pool.contains(id));
        assert_eq!(fx.lifecycle.status(id), Some(StateStatus::Terminated));

        Ok(())
    }

    #[test]
    fn pruning_keeps_the_lowest_successful_state() -> anyhow::Result<()> {
        let mut fx = fixture(4, 0);

        fx.lifecycle.succeed_state(&mut fx.scheduler, fx.ids[2])?;
        fx.lifecycle.succeed_state(&mut fx.scheduler, fx.ids[1])?;

        let pruned = fx
            .lifecycle
            .kill_all_but_one_successful(&mut fx.pool, &mut fx.scheduler, false)
            .expect("pruning with a successful state is never a no-op");
        let pruned_ids: Vec<_> = pruned.iter().map(|state| state.id()).collect();

        assert_eq!(pruned_ids, vec![fx.ids[0], fx.ids[2], fx.ids[3]]);
        assert_eq!(fx.pool.ids(), vec![fx.ids[1]]);
        assert_eq!(fx.lifecycle.status(fx.ids[1]), Some(StateStatus::Active));
        assert_eq!(fx.lifecycle.succeeded_count(), 0);
        assert_eq!(fx.scheduler.select_state()?, fx.ids[1]);

        Ok(())
    }

    #[test]
    fn pruning_without_a_successful_state_is_a_no_op() {
        let mut fx = fixture(3, 0);

        assert!(fx
            .lifecycle
            .kill_all_but_one_successful(&mut fx.pool, &mut fx.scheduler, false)
            .is_none());
        assert_eq!(fx.pool.len(), 3);
    }

    #[test]
    fn the_coverage_timeout_fires_after_stalled_ticks() -> anyhow::Result<()> {
        let mut fx = fixture(3, 2);
        fx.lifecycle.succeed_state(&mut fx.scheduler, fx.ids[0])?;

        assert!(fx.lifecycle.on_timer(&mut fx.pool, &mut fx.scheduler).is_none());

        // Fresh coverage resets the clock.
        fx.lifecycle.on_new_coverage(0x1000);
        assert!(fx.lifecycle.on_timer(&mut fx.pool, &mut fx.scheduler).is_none());

        let pruned = fx
            .lifecycle
            .on_timer(&mut fx.pool, &mut fx.scheduler)
            .expect("the stalled clock did not fire");
        assert_eq!(pruned.len(), 2);
        assert_eq!(fx.pool.ids(), vec![fx.ids[0]]);

        Ok(())
    }

    #[test]
    fn a_stalled_clock_with_no_successes_changes_nothing() {
        let mut fx = fixture(3, 1);

        assert!(fx.lifecycle.on_timer(&mut fx.pool, &mut fx.scheduler).is_none());
        assert_eq!(fx.pool.len(), 3);
    }

    #[test]
    fn a_disabled_timeout_never_fires() -> anyhow::Result<()> {
        let mut fx = fixture(2, 0);
        fx.lifecycle.succeed_state(&mut fx.scheduler, fx.ids[0])?;

        for _ in 0..100 {
            assert!(fx.lifecycle.on_timer(&mut fx.pool, &mut fx.scheduler).is_none());
        }
        assert_eq!(fx.pool.len(), 2);

        Ok(())
    }
}
