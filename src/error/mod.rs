//! This module contains the primary error type for the engine's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.

pub mod container;
pub mod execution;
pub mod fork;
pub mod lifecycle;
pub mod scheduling;

use thiserror::Error;

/// The interface result type for the library.
///
/// # Usage
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems should return the more-specific
/// child error types as appropriate.
pub type Result<T> = std::result::Result<T, Errors>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by
/// the clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors from the drive loop and the state pool.
    #[error(transparent)]
    Execution(#[from] execution::Error),

    /// Errors from the fork coordinator.
    #[error(transparent)]
    Fork(#[from] fork::Error),

    /// Errors from the lifecycle manager.
    #[error(transparent)]
    Lifecycle(#[from] lifecycle::Error),

    /// Errors from the scheduler.
    #[error(transparent)]
    Scheduling(#[from] scheduling::Error),

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

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

/// A library error with an associated guest program-counter location.
pub type LocatedError = container::Located<Error>;

/// A container of errors that may occur during exploration.
pub type Errors = container::Errors<LocatedError>;

/// Allow simple conversions from located fork errors by re-wrapping the
/// located error around the more general payload.
impl From<fork::LocatedError> for LocatedError {
    fn from(value: fork::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located fork errors by re-wrapping the
/// located error around the more general payload in the Errors container.
impl From<fork::LocatedError> for Errors {
    fn from(value: fork::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload.
impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload in the Errors container.
impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}
