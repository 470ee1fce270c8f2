//! This library implements the state-management core of a selective
//! symbolic-execution engine: the machinery that forks execution states at
//! symbolic branches, schedules which state runs on the emulator next, and
//! manages each state's lifecycle from creation to termination. It is the
//! engine around the emulator, not the emulator itself.
//!
//! # How it Works
//!
//! From a very high level, an exploration proceeds as follows:
//!
//! 1. The [`explorer::Explorer`] is constructed with a root
//!    [`state::ExecutionState`], a scheduling strategy, and a feasibility
//!    oracle, then driven against an implementation of
//!    [`explorer::Emulator`].
//! 2. The drive loop repeatedly selects a state through the
//!    [`scheduler::Scheduler`], binds it to the emulator, and advances it by
//!    one run slice.
//! 3. When a slice ends at a branch that depends on a symbolic value, the
//!    [`fork::ForkCoordinator`] consults the [`oracle::FeasibilityOracle`]
//!    and replaces the state with one successor per feasible branch, each
//!    extending the parent's [`state::constraints::PathConstraints`] by the
//!    respective branch constraint.
//! 4. States that report success are suspended by the
//!    [`lifecycle::LifecycleManager`]; states that exit or lose a pruning
//!    pass are terminated and retired.
//! 5. When no schedulable states remain, the exploration ends and the
//!    retired and surviving states are available as an
//!    [`explorer::ExplorationSummary`].
//!
//! Exploration is concurrent but never parallel: exactly one state executes
//! at any instant, and all transfers of control happen at run-slice
//! boundaries on the single driving thread.
//!
//! # Basic Usage
//!
//! For the most basic usage of the library, it is sufficient to construct an
//! `Explorer` and call the `.run` method, passing your emulator.
//!
//! ```
//! use state_explorer as se;
//! use state_explorer::{
//!     explorer::{Config, Emulator, SliceExit, SliceReport},
//!     oracle::PermissiveOracle,
//!     scheduler::RoundRobinScheduler,
//!     state::ExecutionState,
//!     watchdog::LazyWatchdog,
//! };
//!
//! /// An emulator whose every state runs to completion in one slice.
//! #[derive(Debug)]
//! struct OneShot;
//!
//! impl Emulator for OneShot {
//!     fn run_slice(&mut self, _state: &mut ExecutionState, _budget: Option<u64>) -> SliceReport {
//!         SliceReport::exit(SliceExit::Exited)
//!     }
//! }
//!
//! let mut explorer = se::new(
//!     Config::new(),
//!     PermissiveOracle.in_rc(),
//!     Box::new(RoundRobinScheduler::new()),
//!     LazyWatchdog.in_rc(),
//! );
//!
//! explorer.run(&mut OneShot).unwrap();
//!
//! let summary = explorer.consume();
//! assert_eq!(summary.retired.len(), 1);
//! assert!(summary.surviving.is_empty());
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod constant;
pub mod error;
pub mod events;
pub mod explorer;
pub mod fork;
pub mod lifecycle;
pub mod oracle;
pub mod pool;
pub mod scheduler;
pub mod state;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use explorer::{new, ExplorationSummary, Explorer};
