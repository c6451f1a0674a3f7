//! Core error types for studygroup-core.
//!
//! Errors are grouped by concern: validation and sequencing errors raised by
//! the session coordinator, record store errors, and configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the tally, the timers and the session state machine.
///
/// Validation variants are rejected before anything is applied. State
/// variants mean an operation was called out of sequence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Timer or poll duration outside the accepted range
    #[error("Invalid duration for {field}: {secs}s (allowed {min}..={max}s)")]
    InvalidDuration {
        field: &'static str,
        secs: u64,
        min: u64,
        max: u64,
    },

    /// A session needs at least one member
    #[error("Cannot start a session without members")]
    EmptyMemberList,

    /// Option label already present in the tally
    #[error("Option '{0}' already exists")]
    DuplicateOption(String),

    /// Option label not present in the tally
    #[error("Unknown option '{0}'")]
    UnknownOption(String),

    /// The session has ended; no further changes are accepted
    #[error("Session {0} is no longer active")]
    SessionInactive(String),

    /// The location poll was already resolved for this session
    #[error("Location for session {0} has already been decided")]
    AlreadyResolved(String),

    /// No session is loaded on this device
    #[error("No active session")]
    NoActiveSession,

    /// This device is already running an active session
    #[error("Session {0} is already active on this device")]
    SessionAlreadyActive(String),

    /// Vote or option change while the poll is not open
    #[error("The {0} poll is not open")]
    PollNotOpen(&'static str),

    /// Member id not part of the session
    #[error("User '{member}' is not a member of session {session_id}")]
    NotAMember { session_id: String, member: String },

    /// Some member records could not be written
    #[error("Session {session_id} could not be delivered to: {}", .failed.join(", "))]
    PartialPropagation {
        session_id: String,
        succeeded: Vec<String>,
        failed: Vec<String>,
    },

    /// Reading the local user's record failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Record store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record exists for the user
    #[error("No record found for user '{0}'")]
    NotFound(String),

    /// A record for the user already exists
    #[error("User '{0}' already exists")]
    AlreadyExists(String),

    /// The backing store rejected the operation
    #[error("Store backend failure: {0}")]
    Backend(String),

    /// The stored record could not be encoded or decoded
    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
