//! Error types for the connection manager and transport boundary.

use std::time::Duration;

use thiserror::Error;

/// Faults surfaced by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport i/o failure: {0}")]
    Io(String),
}

/// Errors surfaced by the connection manager.
///
/// Only connect-budget exhaustion and caller misuse ever reach the caller;
/// faults on the passive notification path are logged and swallowed.
#[derive(Debug, Error)]
pub enum CubeError {
    /// All connect attempts failed.
    #[error("failed to connect after {attempts} attempts: {last_error}")]
    ConnectFailed { attempts: u32, last_error: String },

    /// The device does not expose the expected notify/write characteristics.
    #[error("required characteristics not found")]
    CharacteristicsMissing,

    /// The caller used a command name that is not in the command table.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
