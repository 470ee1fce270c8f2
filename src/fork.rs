//! This module contains the [`ForkCoordinator`], the sole writer of new
//! execution states into the pool.
//!
//! The translation layer calls into the coordinator whenever translated code
//! reaches a point whose outcome depends on a symbolic value. The
//! coordinator consults the oracle, materializes the feasible successors,
//! registers them with the pool, designates the continuation the emulator
//! should carry on with, and publishes the fork to subscribers, all before
//! returning control. With respect to the parent state a fork is a replace,
//! never an append: once a divergence point has been resolved, the parent's
//! identifier is no longer schedulable.

use log::debug;

use crate::{
    error::{container::Locatable, fork::{Error, Result}},
    events::{ForkEvent, Listeners, Subscription},
    oracle::DynOracle,
    pool::StatePool,
    state::{
        constraints::{Constraint, SymbolicCondition},
        ExecutionState,
        ForkOutcome,
        StateId,
        StateIdAllocator,
    },
};

/// A point in guest execution whose outcome depends on a symbolic value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DivergencePoint {
    /// The guest program counter of the branch.
    pub location: u64,

    /// The symbolic condition the branch outcome depends on.
    pub condition: SymbolicCondition,

    /// The branch the concrete register contents would take: `true` for the
    /// branch on which the condition holds.
    pub concrete_hint: bool,
}

/// The policy for designating which child of a two-way fork continues as the
/// main line on the emulator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContinuationPolicy {
    /// Continue with the branch the concrete register contents would take.
    ///
    /// This keeps the physical emulator on the path the machine would have
    /// executed natively, which is the cheapest continuation as no snapshot
    /// swap is needed.
    ConcreteHint,

    /// Always continue with the branch on which the condition holds.
    AlwaysTrue,

    /// Always continue with the branch on which the condition does not
    /// hold.
    AlwaysFalse,
}

impl ContinuationPolicy {
    /// Decides whether the continuation is the true branch, given the
    /// concrete `hint` from the divergence point.
    #[must_use]
    pub fn follow_true_branch(&self, hint: bool) -> bool {
        match self {
            Self::ConcreteHint => hint,
            Self::AlwaysTrue => true,
            Self::AlwaysFalse => false,
        }
    }
}

/// How a divergence point was resolved by the coordinator.
#[derive(Debug)]
pub enum ForkResolution {
    /// Both branches were feasible: the parent was retired and replaced by
    /// two children.
    Forked {
        /// The retired parent state, returned to the driver for its
        /// exploration record.
        retired: ExecutionState,

        /// The child designated to continue on the emulator.
        continue_with: StateId,

        /// Both children, in true-branch-first order.
        children: Vec<StateId>,
    },

    /// Only one branch was feasible: the state narrowed in place, keeping
    /// its identifier and gaining one constraint.
    Narrowed {
        /// The identifier of the narrowed state.
        state: StateId,
    },

    /// The fork was refused by resource policy; the branch must be resolved
    /// concretely by the caller.
    Suppressed,
}

/// The component that intercepts divergence points and turns them into
/// forks.
#[derive(Debug)]
pub struct ForkCoordinator {
    /// The oracle consulted for branch feasibility.
    oracle: DynOracle,

    /// The allocator for successor-state identifiers.
    ids: StateIdAllocator,

    /// The policy designating the continuation child.
    policy: ContinuationPolicy,

    /// The maximum number of live states before forks are suppressed.
    max_live_states: usize,

    /// The subscribers notified of each fork.
    fork_events: Listeners<ForkEvent>,
}

impl ForkCoordinator {
    /// Constructs a coordinator that consults `oracle` and designates
    /// continuations per `policy`, suppressing forks once the pool holds
    /// `max_live_states` states.
    #[must_use]
    pub fn new(oracle: DynOracle, policy: ContinuationPolicy, max_live_states: usize) -> Self {
        let ids = StateIdAllocator::new();
        let fork_events = Listeners::new();

        Self {
            oracle,
            ids,
            policy,
            max_live_states,
            fork_events,
        }
    }

    /// Allocates a fresh state identifier.
    ///
    /// The coordinator owns the allocator so that identifiers of forked
    /// children and of externally checkpointed states come from one
    /// monotonic sequence.
    pub fn allocate_id(&mut self) -> StateId {
        self.ids.allocate()
    }

    /// Registers `callback` to observe every fork, returning the
    /// subscription token.
    pub fn on_fork(&self, callback: impl FnMut(&ForkEvent) + 'static) -> Subscription {
        self.fork_events.subscribe(callback)
    }

    /// Resolves the divergence `point` reached by the state currently bound
    /// in `pool`.
    ///
    /// On a two-way fork the children are pooled, the continuation child is
    /// bound in the parent's place, the parent is retired out of the pool,
    /// and the fork event is published, all before this returns. The caller
    /// must subsequently retire the parent's identifier from the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForkingDisabled`] if the state has forking disabled;
    /// the caller resolves the branch concretely. Returns
    /// [`Error::InfeasiblePath`] if neither branch is feasible, which is
    /// fatal to the state.
    ///
    /// # Panics
    ///
    /// Panics if no state is bound to the emulator; divergence points can
    /// only be reached by a running state, so this is a programmer bug in
    /// the driver.
    pub fn on_divergence_point(
        &mut self,
        pool: &mut StatePool,
        point: &DivergencePoint,
    ) -> Result<ForkResolution> {
        let origin = pool
            .current()
            .expect("a state is bound to the emulator while handling a divergence");
        let state = pool
            .get(origin)
            .expect("the bound state is present in the pool");

        if !state.forking_enabled() {
            return Err(Error::ForkingDisabled { id: origin }.locate(point.location));
        }

        if pool.len() >= self.max_live_states {
            debug!(
                "suppressing fork of state {origin} at {:#x}: {} states are live",
                point.location,
                pool.len()
            );
            return Ok(ForkResolution::Suppressed);
        }

        let outcome = state.fork(point.location, &point.condition, self.oracle.as_ref(), &mut self.ids)?;

        match outcome {
            ForkOutcome::Both {
                mut true_state,
                mut false_state,
            } => {
                let continue_true = self.policy.follow_true_branch(point.concrete_hint);
                true_state.set_carry_on(continue_true);
                false_state.set_carry_on(!continue_true);

                let children = vec![true_state.id(), false_state.id()];
                let continue_with = if continue_true {
                    true_state.id()
                } else {
                    false_state.id()
                };

                pool.insert(true_state)
                    .expect("freshly allocated identifiers are unique");
                pool.insert(false_state)
                    .expect("freshly allocated identifiers are unique");
                let retired = pool
                    .swap_current(continue_with)
                    .expect("the continuation child was just pooled");

                debug!(
                    "state {origin} forked at {:#x} into {} and {}, continuing with {continue_with}",
                    point.location, children[0], children[1]
                );

                self.fork_events.emit(&ForkEvent {
                    origin,
                    location: point.location,
                    children: children.clone(),
                    conditions: vec![
                        Constraint::truth(point.condition),
                        Constraint::negation(point.condition),
                    ],
                });

                Ok(ForkResolution::Forked {
                    retired,
                    continue_with,
                    children,
                })
            }
            ForkOutcome::Single(successor) => {
                let asserted = *successor
                    .constraints()
                    .clauses()
                    .last()
                    .expect("a narrowed successor carries at least one clause");
                pool.replace(successor)
                    .expect("the narrowed successor keeps the parent's identifier");

                debug!(
                    "state {origin} narrowed at {:#x}: only one branch is feasible",
                    point.location
                );

                self.fork_events.emit(&ForkEvent {
                    origin,
                    location: point.location,
                    children: vec![origin],
                    conditions: vec![asserted],
                });

                Ok(ForkResolution::Narrowed { state: origin })
            }
        }
    }
}
