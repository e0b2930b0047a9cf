// Library error types

use thiserror::Error;

use crate::manager::ManagerState;

/// Errors surfaced by lifecycle and configuration operations.
///
/// Hot-path producer calls never return these; record-level failure is
/// reported through the `bool` return of `Logger::log` and the dropped
/// counter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A lifecycle call found the manager in the wrong state
    #[error("log manager is {actual}, expected {expected}")]
    InvalidState {
        expected: ManagerState,
        actual: ManagerState,
    },

    /// Initialization ran before and failed; the original cause is preserved
    #[error("log manager initialization failed: {0}")]
    InitializationFailed(String),

    /// Logger names key the registry and cannot be empty
    #[error("logger name cannot be empty")]
    EmptyLoggerName,

    /// The manager has been shut down and no longer serves loggers
    #[error("log manager is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, Error>;
