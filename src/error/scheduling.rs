//! This module contains errors pertaining to state selection by the
//! scheduler.

use thiserror::Error;

use crate::state::StateId;

/// Errors that occur when a scheduler is asked to select or command states.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// The scheduler was queried while tracking no states.
    ///
    /// This is a programming-contract violation rather than a recoverable
    /// condition; callers must check `empty()` before selecting.
    #[error("A state was requested from the scheduler but none are available")]
    NoStatesAvailable,

    /// A scheduling command referenced a state the scheduler does not track.
    #[error("The scheduler does not track a state with identifier {id}")]
    NoSuchState { id: StateId },

    /// A scheduling command was sent to a strategy that does not interpret
    /// commands.
    #[error("The scheduling strategy does not support guest commands")]
    CommandNotSupported,
}

/// The result type for methods that may have scheduling errors.
pub type Result<T> = std::result::Result<T, Error>;
