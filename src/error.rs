// ABOUTME: Error type shared by the command builder, process runner and muxer
//
// Every variant is cheap to clone so a failed master construction can be handed
// to all callers that were waiting on it.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while building, running or multiplexing ssh commands
#[derive(Error, Debug, Clone)]
pub enum SshError {
    /// The subprocess could not be started (binary missing, permissions, ...)
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        /// Program that was being started
        program: String,
        /// Underlying spawn error
        #[source]
        source: Arc<io::Error>,
    },

    /// The master exited before it reported an interactive session
    #[error("Master connection to {host} exited before becoming ready:\n{diagnostics}")]
    HandshakeFailed {
        /// Host the master was connecting to
        host: String,
        /// Everything the master wrote to stderr before exiting
        diagnostics: String,
    },

    /// The master did not report an interactive session in time
    #[error("Master connection to {host} not ready after {timeout:?}")]
    HandshakeTimedOut {
        /// Host the master was connecting to
        host: String,
        /// Configured handshake limit
        timeout: Duration,
    },

    /// An outcome inspection found an unexpected exit code or output
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Host name was empty
    #[error("Invalid host: {0:?}")]
    InvalidHost(String),

    /// Argument vector could not be run
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Background master construction panicked or was cancelled
    #[error("Master construction task failed: {0}")]
    TaskFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl SshError {
    pub(crate) fn spawn_failed(program: impl Into<String>, source: io::Error) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            source: Arc::new(source),
        }
    }
}

impl From<io::Error> for SshError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Result type for ssh operations
pub type Result<T> = std::result::Result<T, SshError>;
