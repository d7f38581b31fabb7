//! Error types for the memory engine.

use mealy_memory_core::TraceParseError;
use thiserror::Error;

/// Result type alias for store commands.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for engine operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors raised by a set-store backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Opening a connection failed.
    #[error("could not connect to {backend} store: {message}")]
    Connect {
        backend: &'static str,
        message: String,
    },

    /// The connection dropped or timed out while running a command.
    #[error("transient store failure on `{command}`: {message}")]
    Transient { command: String, message: String },

    /// A transient failure persisted through every retry.
    #[error("store command `{command}` failed after {attempts} attempts: {message}")]
    Exhausted {
        command: String,
        attempts: u32,
        message: String,
    },

    /// The store answered with an error that retrying cannot fix.
    #[error("store rejected `{command}`: {message}")]
    Rejected { command: String, message: String },

    /// The reply did not have the shape the command promises.
    #[error("unexpected reply to `{command}`: {reply}")]
    UnexpectedReply { command: String, reply: String },
}

impl StoreError {
    /// Whether a reconnect and retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connect { .. } | StoreError::Transient { .. })
    }
}

/// Errors that abort a memory-order computation.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The backing store failed permanently.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The automaton broke its own contract (empty alphabet, successor out of range, ...).
    #[error("automaton contract violation: {message}")]
    ContractViolation { message: String },

    /// A stored member could not be decoded as a trace.
    #[error("malformed trace in store: {0}")]
    MalformedTrace(#[from] TraceParseError),

    /// The store already holds trace sets under this run's key prefix, left by
    /// an earlier run that retained them or could not clean up.
    #[error("store already holds `{key}`; delete it or use another key_prefix")]
    StaleKeys { key: String },

    /// A worker task panicked or was aborted.
    #[error("worker failed: {message}")]
    Worker { message: String },

    /// The run was cancelled after a sibling worker failed.
    #[error("run cancelled after a worker failure")]
    Cancelled,

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error (config files).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MemoryError {
    /// Create a contract violation error.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }
}
