/// Unified error handling for shardctl
///
/// Every fallible operation in the crate returns a `MigrateError`. Variants
/// carry the slot and group ids involved so an operator can diagnose a failed
/// migration from the error text alone.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::backend::resp::RespError;
use crate::config::ConfigError;
use crate::models::{GroupId, SlotId};

/// Main error type for shardctl operations
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Network-related errors talking to a backend node
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Coordination store failures
    #[error("Store error during {operation}: {message}")]
    Store { operation: String, message: String },

    /// The cluster-wide lock is held by someone else
    #[error("Cluster is locked by {holder}")]
    ClusterLocked { holder: String },

    #[error("Group {group} not found")]
    GroupNotFound { group: GroupId },

    #[error("Slot {slot} not found")]
    SlotNotFound { slot: SlotId },

    /// Master resolution timed out for one or both groups
    #[error("Group master not found (from group {from}, to group {to})")]
    GroupMasterNotFound { from: GroupId, to: GroupId },

    #[error("Invalid address: {addr}")]
    InvalidAddr { addr: String },

    /// RESP framing errors on a backend connection
    #[error("Protocol error: {0}")]
    Protocol(#[from] RespError),

    /// The backend answered with an error reply
    #[error("Backend error: {command} - {message}")]
    Backend { command: String, message: String },

    /// The operator stopped the migration; not a failure
    #[error("Migration of slot {slot} stopped by user")]
    StoppedByUser { slot: SlotId },

    /// Cluster metadata violates the single-migrating-slot invariant
    #[error("Inconsistent cluster metadata: {message}")]
    Inconsistent { message: String },

    #[error("Slot {slot} is migrating to group {to}, finish it first")]
    MigrationInProgress { slot: SlotId, to: GroupId },

    #[error("Invalid migration task: {message}")]
    InvalidTask { message: String },

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Context wrapper keeping the underlying error intact
    #[error("{operation}: {source}")]
    Context {
        operation: String,
        #[source]
        source: Box<MigrateError>,
    },
}

/// Result type alias for shardctl operations
pub type MigrateResult<T> = Result<T, MigrateError>;

impl MigrateError {
    pub fn store<O: Into<String>, M: fmt::Display>(operation: O, message: M) -> Self {
        MigrateError::Store {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn backend<C: Into<String>, M: Into<String>>(command: C, message: M) -> Self {
        MigrateError::Backend {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn invalid_addr<S: Into<String>>(addr: S) -> Self {
        MigrateError::InvalidAddr { addr: addr.into() }
    }

    pub fn inconsistent<S: Into<String>>(message: S) -> Self {
        MigrateError::Inconsistent {
            message: message.into(),
        }
    }

    pub fn invalid_task<S: Into<String>>(message: S) -> Self {
        MigrateError::InvalidTask {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        MigrateError::Timeout {
            operation: operation.into(),
        }
    }

    /// Wrap this error with the name of the operation that failed
    pub fn context<S: Into<String>>(self, operation: S) -> Self {
        MigrateError::Context {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through context wrappers
    pub fn root(&self) -> &MigrateError {
        match self {
            MigrateError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is a user-requested stop rather than a failure
    pub fn is_stopped(&self) -> bool {
        matches!(self.root(), MigrateError::StoppedByUser { .. })
    }

    /// Check if this error is recoverable (an outer caller may retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root(),
            MigrateError::Network(_)
                | MigrateError::Timeout { .. }
                | MigrateError::ClusterLocked { .. }
                | MigrateError::GroupMasterNotFound { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self.root() {
            MigrateError::Config(_) => ErrorSeverity::Critical,
            MigrateError::Inconsistent { .. } => ErrorSeverity::Critical,
            MigrateError::StoppedByUser { .. } => ErrorSeverity::Info,
            MigrateError::ClusterLocked { .. } => ErrorSeverity::Warning,
            MigrateError::MigrationInProgress { .. } => ErrorSeverity::Warning,
            MigrateError::Network(_) => ErrorSeverity::Warning,
            MigrateError::Timeout { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Extension for attaching operation context to results
pub trait ResultExt<T> {
    fn context<S: Into<String>>(self, operation: S) -> MigrateResult<T>;

    fn with_context<S: Into<String>, F: FnOnce() -> S>(self, f: F) -> MigrateResult<T>;
}

impl<T> ResultExt<T> for MigrateResult<T> {
    fn context<S: Into<String>>(self, operation: S) -> MigrateResult<T> {
        self.map_err(|e| e.context(operation))
    }

    fn with_context<S: Into<String>, F: FnOnce() -> S>(self, f: F) -> MigrateResult<T> {
        self.map_err(|e| e.context(f()))
    }
}

/// Error severity levels for logging and operator output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that abort the current task
    Error,
    /// Conditions worth retrying later
    Warning,
    /// Informational, e.g. a user-requested stop
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
