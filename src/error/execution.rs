//! This module contains errors pertaining to the drive loop and the pool of
//! live execution states.

use thiserror::Error;

use crate::{error::container, state::StateId};

/// Errors that occur while driving execution states through the emulator or
/// while mutating the state pool.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("A state with identifier {id} already exists in the pool")]
    DuplicateState { id: StateId },

    #[error("No state with identifier {id} exists in the pool")]
    NoSuchState { id: StateId },

    #[error("The state {id} is bound to the emulator and cannot be removed until a replacement is selected")]
    RemoveCurrentState { id: StateId },

    #[error("The state {id} is not speculative and cannot be promoted")]
    NotSpeculative { id: StateId },

    #[error("Exploration was stopped by the watchdog")]
    StoppedByWatchdog,
}

/// An execution error with an associated guest program-counter location.
pub type LocatedError = container::Located<Error>;

/// The result type for methods that may have execution errors.
///
/// These errors arise at points where no guest location is meaningful (pool
/// mutations happen between run slices), so they are plain here; the driver
/// attaches its last known location when buffering one for reporting.
pub type Result<T> = std::result::Result<T, Error>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, location: u64) -> Self::Located {
        container::Located {
            location,
            payload: self,
        }
    }
}
