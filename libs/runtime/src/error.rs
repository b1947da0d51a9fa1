//! Error taxonomy for the adapter runtime
//!
//! Errors are contained at the smallest scope that can absorb them:
//! configuration errors abort one activation, protocol errors close one
//! connection, per-iteration adapter failures stay inside the worker loop.
//! Only [`RuntimeError::FatalStartup`] may terminate the process.

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Main error type for runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Activation aborted: the parameter set misses mandatory keys
    #[error("Configuration error for adapter {adapter}: missing mandatory parameters {missing:?}")]
    MissingParameters {
        /// Adapter instance name
        adapter: String,
        /// Every mandatory key absent from the parameter set
        missing: Vec<String>,
    },

    /// Invalid parameter value or other configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No factory registered under this adapter type name
    #[error("Unknown adapter type {0:?}")]
    UnknownAdapterType(String),

    /// No configured adapter instance under this name
    #[error("Unknown adapter {0:?}")]
    UnknownAdapter(String),

    /// Lifecycle violation: activation while already active
    #[error("Adapter {0:?} is already active")]
    AlreadyActive(String),

    /// Malformed frame on a connection; the owning connection is closed
    #[error("Protocol error: {0}")]
    Protocol(#[from] rsp_codec::ProtocolError),

    /// Transient network failure, retried with backoff
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error during network operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside one iteration of an adapter's loop
    #[error("Adapter runtime error in {adapter}: {reason}")]
    AdapterRuntime {
        /// Adapter instance name
        adapter: String,
        /// What went wrong in this iteration
        reason: String,
    },

    /// Unrecoverable startup failure; terminates the process
    #[error("Fatal startup error: {0}")]
    FatalStartup(String),
}

impl RuntimeError {
    /// Whether this error may legally terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::FatalStartup(_))
    }
}
