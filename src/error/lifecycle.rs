//! This module contains errors pertaining to the lifecycle transitions of
//! execution states.

use thiserror::Error;

use crate::state::StateId;

/// Errors that occur when applying lifecycle transitions to states.
///
/// The idempotency violations here are non-fatal by design: callers report
/// them and carry on.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("State {id} has already succeeded")]
    AlreadySucceeded { id: StateId },

    #[error("State {id} has already been terminated")]
    AlreadyTerminated { id: StateId },

    #[error("State {id} is not known to the lifecycle manager")]
    UnknownState { id: StateId },
}

/// The result type for methods that may have lifecycle errors.
///
/// Lifecycle transitions happen between run slices where no guest location
/// is meaningful, so these errors carry no location.
pub type Result<T> = std::result::Result<T, Error>;
