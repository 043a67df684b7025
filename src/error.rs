//! Scenario errors
//!
//! TigerStyle: Explicit variants, storage failures wrapped unchanged.

use store_core::storage::StorageError;
use thiserror::Error;

/// Why a scenario run failed.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The environment cannot run the scenario
    #[error("precondition failed: {message}")]
    Precondition {
        /// What is missing
        message: String,
    },

    /// Creating or removing a scratch path failed
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A storage lifecycle operation failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The run was interrupted while waiting for the restarted storage
    #[error("interrupted while waiting for the storage to restart")]
    Interrupted,

    /// The restarted storage did not accept `start` in time
    #[error("storage did not restart within {deadline_ms}ms: {last_error}")]
    RestartDeadline {
        /// Deadline that elapsed
        deadline_ms: u64,
        /// Last transient error seen while probing
        last_error: String,
    },
}

impl ScenarioError {
    /// Create a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Create an I/O error with context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for scenario operations.
pub type ScenarioResult<T> = Result<T, ScenarioError>;
