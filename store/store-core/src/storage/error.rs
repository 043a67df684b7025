//! Storage Errors
//!
//! TigerStyle: Explicit error types with context.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from storage configuration, lifecycle and entity operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity or argument failed validation
    #[error("validation error: {message}")]
    Validation {
        /// Validation error message
        message: String,
    },

    /// Storage configuration is unusable
    #[error("invalid storage configuration: {message}")]
    ConfValidation {
        /// What is wrong with the configuration
        message: String,
    },

    /// Database cluster or database could not be provisioned
    #[error("storage creation failed: {message}")]
    Creation {
        /// Creation error message
        message: String,
    },

    /// Connection error
    #[error("connection error: {message}")]
    Connection {
        /// Connection error message
        message: String,
    },

    /// Server accepted the connection attempt but is not ready yet
    #[error("database not ready: {message}")]
    StartingUp {
        /// Server message
        message: String,
    },

    /// Query error
    #[error("query error: {message}")]
    Query {
        /// Query error message
        message: String,
    },

    /// A PostgreSQL helper binary exited unsuccessfully
    #[error("{binary} failed ({status}): {stderr}")]
    Process {
        /// Binary that was run
        binary: String,
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Filesystem error
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Scheme checksum file does not match the managed entities
    #[error("scheme changed: checksum file has {expected:08x}, managed entities produce {actual:08x}")]
    SchemeChanged {
        /// Checksum recorded in the file
        expected: u32,
        /// Checksum of the current schema
        actual: u32,
    },

    /// Operation requires a started storage
    #[error("storage is not started")]
    NotStarted,

    /// Timeout error
    #[error("timeout after {duration_ms}ms")]
    Timeout {
        /// Duration in milliseconds
        duration_ms: u64,
    },

    /// Simulated fault (for DST)
    #[error("simulated fault: {fault_type}")]
    SimulatedFault {
        /// Type of simulated fault
        fault_type: String,
    },

    /// Internal error
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl StorageError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn conf_validation(message: impl Into<String>) -> Self {
        Self::ConfValidation {
            message: message.into(),
        }
    }

    /// Create a creation error.
    #[must_use]
    pub fn creation(message: impl Into<String>) -> Self {
        Self::Creation {
            message: message.into(),
        }
    }

    /// Create a connection error.
    ///
    /// Messages reporting that the server is still starting up are
    /// classified as [`StorageError::StartingUp`].
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("starting up") {
            Self::StartingUp { message }
        } else {
            Self::Connection { message }
        }
    }

    /// Create a query error.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a read error (wraps query error for reads).
    #[must_use]
    pub fn read(message: impl Into<String>) -> Self {
        Self::Query {
            message: format!("read: {}", message.into()),
        }
    }

    /// Create a write error (wraps query error for writes).
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::Query {
            message: format!("write: {}", message.into()),
        }
    }

    /// Create a process error from a finished helper binary.
    #[must_use]
    pub fn process(binary: impl Into<String>, status: impl Into<String>, stderr: &[u8]) -> Self {
        Self::Process {
            binary: binary.into(),
            status: status.into(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// Create an I/O error for a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a simulated fault error.
    #[must_use]
    pub fn simulated_fault(fault_type: impl Into<String>) -> Self {
        Self::SimulatedFault {
            fault_type: fault_type.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a transient error (can be retried).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::StartingUp { .. } | Self::Timeout { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
