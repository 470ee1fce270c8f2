//! This module contains the exploration driver, the single-threaded loop
//! that binds states to the emulator, advances them in run slices, and
//! reacts to the way each slice ended.
//!
//! # The Cooperative Concurrency Model
//!
//! Exploration is concurrent but never parallel. Exactly one state executes
//! at any instant, and every transfer of control happens at a run-slice
//! boundary on the one driving thread. Forking, scheduling, lifecycle
//! transitions, and event delivery all run synchronously inside the loop
//! below, so no component of the engine needs interior locking and
//! subscribers observe occurrences in the causal order they happened.

use log::{debug, info, warn};

use crate::{
    constant::{
        DEFAULT_COVERAGE_TIMEOUT_TICKS,
        DEFAULT_FORKING_ENABLED,
        DEFAULT_MAX_LIVE_STATES,
    },
    error::{self, container::Locatable, execution, fork, scheduling},
    events::{ForkEvent, Listeners, Subscription, SwitchEvent, TerminationEvent, TerminationReason},
    fork::{ContinuationPolicy, DivergencePoint, ForkCoordinator, ForkResolution},
    lifecycle::LifecycleManager,
    oracle::DynOracle,
    pool::StatePool,
    scheduler::{Phase, PoolUpdate, ScheduleCommand, Scheduler},
    state::{ExecutionState, StateId},
    watchdog::DynWatchdog,
};

/// The configuration for an exploration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum number of guest instructions per run slice, with [`None`]
    /// leaving slice length to the emulator.
    pub slice_instruction_budget: Option<u64>,

    /// The number of driver ticks with no new code coverage before the pool
    /// is pruned to one successful state, with zero disabling the timeout.
    pub coverage_timeout_ticks: u64,

    /// The maximum number of live states before forks are suppressed.
    pub max_live_states: usize,

    /// Whether the root state forks at divergence points.
    pub forking_enabled: bool,

    /// The policy designating which fork child continues on the emulator.
    pub continuation_policy: ContinuationPolicy,
}

impl Config {
    /// Constructs the default exploration configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of guest instructions per run slice.
    #[must_use]
    pub fn with_slice_instruction_budget(mut self, budget: u64) -> Self {
        self.slice_instruction_budget = Some(budget);
        self
    }

    /// Sets the number of coverage-free driver ticks before pruning.
    #[must_use]
    pub fn with_coverage_timeout_ticks(mut self, ticks: u64) -> Self {
        self.coverage_timeout_ticks = ticks;
        self
    }

    /// Sets the maximum number of live states before forks are suppressed.
    #[must_use]
    pub fn with_max_live_states(mut self, maximum: usize) -> Self {
        self.max_live_states = maximum;
        self
    }

    /// Sets whether the root state forks at divergence points.
    #[must_use]
    pub fn with_forking_enabled(mut self, enabled: bool) -> Self {
        self.forking_enabled = enabled;
        self
    }

    /// Sets the policy designating which fork child continues on the
    /// emulator.
    #[must_use]
    pub fn with_continuation_policy(mut self, policy: ContinuationPolicy) -> Self {
        self.continuation_policy = policy;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        let slice_instruction_budget = None;
        let coverage_timeout_ticks = DEFAULT_COVERAGE_TIMEOUT_TICKS;
        let max_live_states = DEFAULT_MAX_LIVE_STATES;
        let forking_enabled = DEFAULT_FORKING_ENABLED;
        let continuation_policy = ContinuationPolicy::ConcreteHint;

        Self {
            slice_instruction_budget,
            coverage_timeout_ticks,
            max_live_states,
            forking_enabled,
            continuation_policy,
        }
    }
}

/// The interface to the emulator that physically advances execution states.
///
/// The engine owns scheduling and lifecycle; the emulator owns instruction
/// semantics. A call to [`Self::run_slice`] advances the bound state until
/// the slice ends for one of the reasons in [`SliceExit`], mutating the
/// state's snapshot in place.
pub trait Emulator {
    /// Advances `state` by one run slice of at most `budget` guest
    /// instructions, reporting how the slice ended.
    fn run_slice(&mut self, state: &mut ExecutionState, budget: Option<u64>) -> SliceReport;
}

/// The reason a run slice ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SliceExit {
    /// The guest voluntarily gave up the rest of its slice.
    Yield,

    /// The instruction budget for the slice was exhausted.
    BudgetExhausted,

    /// The guest issued a scheduling command through the cooperative
    /// channel.
    Command(ScheduleCommand),

    /// The guest reached a branch whose outcome depends on a symbolic
    /// value.
    Diverged(DivergencePoint),

    /// The guest reported that this path reached its goal.
    Succeeded,

    /// The guest exited or reached a terminal instruction.
    Exited,
}

/// The emulator's report on one run slice.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SliceReport {
    /// The reason the slice ended.
    pub exit: SliceExit,

    /// The guest locations of previously unseen code covered during the
    /// slice.
    pub new_locations: Vec<u64>,
}

impl SliceReport {
    /// Constructs a report for a slice that covered no new code.
    #[must_use]
    pub fn exit(exit: SliceExit) -> Self {
        let new_locations = Vec::new();
        Self {
            exit,
            new_locations,
        }
    }
}

/// The record of a finished exploration.
#[derive(Debug)]
pub struct ExplorationSummary {
    /// The states that left the pool during the exploration, whether
    /// terminated or retired by forks, in retirement order.
    pub retired: Vec<ExecutionState>,

    /// The states that survived to the end of the exploration, in ascending
    /// identifier order.
    pub surviving: Vec<ExecutionState>,
}

/// Constructs an explorer with a fresh root state, ready to run.
///
/// The root state carries a zeroed machine image, an empty constraint set,
/// and the configured forking flag; it is pooled, registered, and handed to
/// `scheduler` before this returns.
#[must_use]
pub fn new(
    config: Config,
    oracle: DynOracle,
    scheduler: Box<dyn Scheduler>,
    watchdog: DynWatchdog,
) -> Explorer {
    Explorer::new(config, oracle, scheduler, watchdog)
}

/// The exploration driver.
///
/// The explorer owns the pool, the scheduler, the fork coordinator, and the
/// lifecycle manager, and wires them together into the drive loop in
/// [`Self::run`].
#[derive(Debug)]
pub struct Explorer {
    /// The pool of live states.
    pool: StatePool,

    /// The strategy deciding which state runs next.
    scheduler: Box<dyn Scheduler>,

    /// The manager of state lifecycle transitions.
    lifecycle: LifecycleManager,

    /// The coordinator resolving divergence points into forks.
    coordinator: ForkCoordinator,

    /// The watchdog that can stop the exploration externally.
    watchdog: DynWatchdog,

    /// The configuration for this exploration.
    config: Config,

    /// The subscribers notified when the emulator switches states.
    switch_events: Listeners<SwitchEvent>,

    /// The non-fatal errors buffered during the exploration.
    errors: error::Errors,

    /// The states that have left the pool, in retirement order.
    retired: Vec<ExecutionState>,

    /// The engine's phase with respect to state execution.
    phase: Phase,

    /// The state most recently bound to the emulator.
    last_bound: Option<StateId>,

    /// The most recent guest location reported by the emulator, used to
    /// locate errors that arise between slices.
    last_location: u64,
}

impl Explorer {
    /// Constructs an explorer with a fresh root state, ready to run.
    #[must_use]
    pub fn new(
        config: Config,
        oracle: DynOracle,
        mut scheduler: Box<dyn Scheduler>,
        watchdog: DynWatchdog,
    ) -> Self {
        let mut coordinator =
            ForkCoordinator::new(oracle, config.continuation_policy, config.max_live_states);
        let mut pool = StatePool::new();
        let mut lifecycle = LifecycleManager::new(config.coverage_timeout_ticks);

        let root = ExecutionState::new_root(coordinator.allocate_id(), config.forking_enabled);
        let root_id = root.id();
        pool.insert(root)
            .expect("the first identifier cannot collide in an empty pool");
        lifecycle.register(root_id);
        let root_ref = pool
            .get(root_id)
            .expect("the root state was just pooled");
        scheduler.update(&PoolUpdate::additions(None, &[root_ref]));

        let switch_events = Listeners::new();
        let errors = error::Errors::new();
        let retired = Vec::new();
        let phase = Phase::Idle;
        let last_bound = None;
        let last_location = 0;

        Self {
            pool,
            scheduler,
            lifecycle,
            coordinator,
            watchdog,
            config,
            switch_events,
            errors,
            retired,
            phase,
            last_bound,
            last_location,
        }
    }

    /// Registers `callback` to observe every fork, returning the
    /// subscription token.
    pub fn on_fork(&self, callback: impl FnMut(&ForkEvent) + 'static) -> Subscription {
        self.coordinator.on_fork(callback)
    }

    /// Registers `callback` to observe every state switch, returning the
    /// subscription token.
    pub fn on_switch(&self, callback: impl FnMut(&SwitchEvent) + 'static) -> Subscription {
        self.switch_events.subscribe(callback)
    }

    /// Registers `callback` to observe every termination, returning the
    /// subscription token.
    pub fn on_termination(
        &self,
        callback: impl FnMut(&TerminationEvent) + 'static,
    ) -> Subscription {
        self.lifecycle.on_termination(callback)
    }

    /// Gets the pool of live states.
    #[must_use]
    pub fn pool(&self) -> &StatePool {
        &self.pool
    }

    /// Gets the pool of live states for modification.
    ///
    /// This exists for collaborators that seed the initial machine image
    /// before running; mutating pooled states mid-run invalidates the
    /// emulator's view.
    #[must_use]
    pub fn pool_mut(&mut self) -> &mut StatePool {
        &mut self.pool
    }

    /// Gets the engine's phase with respect to state execution.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drives the exploration to completion on `emulator`.
    ///
    /// The loop runs until no schedulable states remain: slice by slice, it
    /// selects a state, binds it to the emulator, advances it, and applies
    /// whatever its exit demands. Errors that are fatal only to one path
    /// (an infeasible divergence, a duplicated lifecycle transition) are
    /// buffered and reported together at the end; errors that invalidate
    /// the exploration as a whole end it immediately.
    ///
    /// # Errors
    ///
    /// Returns the buffered per-path errors if any arose, and
    /// [`execution::Error::StoppedByWatchdog`] if the watchdog fired.
    pub fn run(&mut self, emulator: &mut dyn Emulator) -> error::Result<()> {
        let poll_every = self.watchdog.poll_every();
        let mut iterations: usize = 0;

        while !self.scheduler.empty() {
            iterations += 1;
            if iterations % poll_every == 0 && self.watchdog.should_stop() {
                warn!("exploration stopped by watchdog after {iterations} slices");
                return Err(execution::Error::StoppedByWatchdog
                    .locate(self.last_location)
                    .into());
            }

            let next = match self.scheduler.select_state() {
                Ok(next) => next,
                Err(error) => {
                    // A non-empty scheduler refusing to select is a strategy
                    // bug; the exploration cannot make progress.
                    debug_assert!(false, "a non-empty scheduler selected no state: {error}");
                    return Err(error::Error::from(error)
                        .locate(self.last_location)
                        .into());
                }
            };
            self.bind(next)?;

            self.phase = Phase::Running;
            let state = self
                .pool
                .get_mut(next)
                .expect("the selected state was just bound");
            let report = emulator.run_slice(state, self.config.slice_instruction_budget);
            state.note_slice();
            self.phase = Phase::Ready;

            for location in &report.new_locations {
                self.last_location = *location;
                self.lifecycle.on_new_coverage(*location);
            }

            match report.exit {
                SliceExit::Yield | SliceExit::BudgetExhausted => (),
                SliceExit::Command(command) => self.handle_command(next, &command),
                SliceExit::Diverged(point) => self.handle_divergence(&point),
                SliceExit::Succeeded => self.handle_success(next),
                SliceExit::Exited => self.handle_exit(next),
            }

            self.pool.unbind();
            let reaped = self.lifecycle.reap_deferred(&mut self.pool);
            self.retired.extend(reaped);
            if let Some(pruned) = self
                .lifecycle
                .on_timer(&mut self.pool, self.scheduler.as_mut())
            {
                self.retired.extend(pruned);
            }
        }

        self.phase = Phase::Idle;
        info!(
            "exploration complete: {} states survive, {} retired",
            self.pool.len(),
            self.retired.len()
        );

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    /// Ends the exploration, yielding the retired and surviving states.
    #[must_use]
    pub fn consume(mut self) -> ExplorationSummary {
        let retired = self.retired;
        let surviving = self.pool.drain();

        ExplorationSummary { retired, surviving }
    }

    /// Binds the state with identifier `next` to the emulator, publishing
    /// the switch if the emulator was running a different state before.
    fn bind(&mut self, next: StateId) -> error::Result<()> {
        if self.last_bound != Some(next) {
            debug!("switching the emulator to state {next}");
            self.switch_events.emit(&SwitchEvent {
                previous: self.last_bound,
                next,
            });
        }
        self.pool
            .bind(next)
            .map_err(|error| error::Errors::from(error.locate(self.last_location)))?;
        self.last_bound = Some(next);

        Ok(())
    }

    /// Applies a guest scheduling `command` issued by state `from`.
    fn handle_command(&mut self, from: StateId, command: &ScheduleCommand) {
        match self.scheduler.command(command) {
            Ok(()) => (),
            Err(scheduling::Error::CommandNotSupported) => {
                debug!("state {from} issued {command:?} but the strategy ignores commands");
            }
            Err(error) => {
                warn!("state {from} issued a bad scheduling command: {error}");
                self.errors
                    .add_located(self.last_location, error.into());
            }
        }
    }

    /// Resolves the divergence `point` reached by the bound state.
    fn handle_divergence(&mut self, point: &DivergencePoint) {
        self.last_location = point.location;

        match self
            .coordinator
            .on_divergence_point(&mut self.pool, point)
        {
            Ok(ForkResolution::Forked {
                retired,
                continue_with: _,
                children,
            }) => {
                let parent = retired.id();
                self.lifecycle.retire_forked(parent);
                for child in &children {
                    self.lifecycle.register(*child);
                }

                let added: Vec<&ExecutionState> = children
                    .iter()
                    .map(|child| {
                        self.pool
                            .get(*child)
                            .expect("fork children are pooled before the resolution returns")
                    })
                    .collect();
                self.scheduler.update(&PoolUpdate {
                    current: self.pool.current(),
                    added: &added,
                    removed: &[parent],
                });
                self.retired.push(retired);
            }
            Ok(ForkResolution::Narrowed { .. } | ForkResolution::Suppressed) => {
                // Neither changes the set of schedulable identifiers.
            }
            Err(located) => match located.payload {
                fork::Error::ForkingDisabled { id } => {
                    // Recoverable: the emulator resolves the branch
                    // concretely on its next slice.
                    debug!(
                        "state {id} hit a divergence at {:#x} with forking disabled",
                        located.location
                    );
                }
                fork::Error::InfeasiblePath => {
                    let condemned = self
                        .pool
                        .current()
                        .expect("a state is bound while resolving its divergence");
                    warn!(
                        "state {condemned} has no feasible branch at {:#x}; terminating it",
                        located.location
                    );
                    self.errors.add(located.into());
                    self.terminate(condemned, TerminationReason::InfeasiblePath);
                }
            },
        }
    }

    /// Suspends state `id` as successful.
    fn handle_success(&mut self, id: StateId) {
        if let Err(error) = self
            .lifecycle
            .succeed_state(self.scheduler.as_mut(), id)
        {
            warn!("state {id} reported success redundantly: {error}");
            self.errors.add_located(self.last_location, error.into());
        }
    }

    /// Terminates state `id` after a guest exit.
    fn handle_exit(&mut self, id: StateId) {
        self.terminate(id, TerminationReason::GuestExit);
    }

    /// Terminates state `id` for `reason`, buffering the error if the
    /// transition was redundant.
    fn terminate(&mut self, id: StateId, reason: TerminationReason) {
        match self.lifecycle.terminate_state(
            &mut self.pool,
            self.scheduler.as_mut(),
            id,
            reason,
        ) {
            Ok(Some(state)) => self.retired.push(state),
            Ok(None) => (),
            Err(error) => {
                warn!("state {id} was terminated redundantly: {error}");
                self.errors.add_located(self.last_location, error.into());
            }
        }
    }
}
