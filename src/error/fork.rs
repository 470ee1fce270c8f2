//! This module contains errors pertaining to forking execution states at
//! divergence points.

use thiserror::Error;

use crate::{error::container, state::StateId};

/// Errors that occur when the fork coordinator resolves a divergence point.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// Both branches of the divergence condition were judged infeasible by
    /// the oracle.
    ///
    /// This is fatal to the originating state, which must be terminated by
    /// the lifecycle manager rather than silently dropped.
    #[error("Both branches of the divergence condition are infeasible")]
    InfeasiblePath,

    /// A fork was attempted on a state that has forking disabled.
    ///
    /// This is recoverable; the caller resolves the branch concretely using
    /// whatever default-branch policy it carries.
    #[error("State {id} reached a divergence point while forking is disabled")]
    ForkingDisabled { id: StateId },
}

/// A fork error with the guest program counter of the divergence point.
pub type LocatedError = container::Located<Error>;

/// The result type for methods that may have fork errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

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
