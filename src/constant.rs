//! This module contains constants that are needed throughout the codebase.

/// The number of general-purpose registers in a machine snapshot.
///
/// The engine models the guest register file generically; the translation
/// layer maps physical registers onto these slots however it sees fit.
pub const GUEST_REGISTER_COUNT: u8 = 32;

/// The default for whether a newly created execution state will fork at
/// divergence points.
///
/// The flag is explicit on every state so that exploration can be scoped to
/// regions of interest; this constant only seeds the root state and is
/// configurable via [`crate::explorer::Config`].
pub const DEFAULT_FORKING_ENABLED: bool = true;

/// The default maximum number of live execution states the engine will hold
/// at once.
///
/// Divergence points reached beyond this bound are resolved concretely
/// rather than forked, preventing exponential blowup of the state pool.
pub const DEFAULT_MAX_LIVE_STATES: usize = 512;

/// The default number of driver ticks with no new code coverage before the
/// lifecycle manager prunes the state pool.
///
/// A value of zero disables the coverage timeout entirely.
pub const DEFAULT_COVERAGE_TIMEOUT_TICKS: u64 = 0;

/// The default number of drive-loop iterations the explorer will wait before
/// polling the watchdog.
pub const DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS: usize = 100;
