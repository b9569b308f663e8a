//! Error handling for outpost.
//!
//! This module provides:
//! - [`OutpostError`]: The main error enum for all outpost operations
//! - [`ErrorClass`]: The failure taxonomy that drives retry decisions
//! - [`RemoteFailure`]: A status/message pair reported by the remote record service

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for outpost operations.
#[derive(Error, Debug)]
pub enum OutpostError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for operation {local_id}: {from} -> {to}")]
    InvalidTransition {
        local_id: i64,
        from: String,
        to: String,
    },

    #[error("Drain already in progress")]
    DrainInProgress,

    #[error("{0}")]
    Remote(#[from] RemoteFailure),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl OutpostError {
    /// Classify this error for retry purposes.
    ///
    /// Remote failures classify by HTTP status; transport-level failures
    /// (connection refused, DNS, broken pipe) count as `network`; everything
    /// that is not a remote-call failure falls back to `unknown`, which is
    /// terminal by default.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Remote(failure) => failure.class(),
            Self::Http(_) | Self::Channel(_) => ErrorClass::Network,
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::NotFound(_) => ErrorClass::NotFound,
            _ => ErrorClass::Unknown,
        }
    }

    /// Whether the retry executor may re-attempt after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

/// Failure taxonomy for remote calls.
///
/// `conflict` is neither retryable nor terminal: it escalates to the conflict
/// resolver, which decides whether the operation is retried, discarded, or
/// replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    Network,
    Timeout,
    Validation,
    Auth,
    NotFound,
    Conflict,
    RateLimit,
    Server,
    Unknown,
}

impl ErrorClass {
    /// Derive the class from a remote response status code.
    ///
    /// Status 0 is the conventional "no response at all" marker used by the
    /// HTTP client for connection-level failures.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            0 => Self::Network,
            400 | 422 => Self::Validation,
            401 | 403 => Self::Auth,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }

    /// Transient classes the executor retries with backoff.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimit | Self::Server
        )
    }

    /// Terminal classes surfaced immediately on the pending operation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Validation | Self::Auth | Self::NotFound | Self::Unknown
        )
    }

    /// Stable string form, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::RateLimit => "rate-limit",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the remote record service.
///
/// Every non-ok remote response carries an explicit status code and message;
/// [`ErrorClass`] derives from the status alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("Remote call failed ({status}): {message}")]
pub struct RemoteFailure {
    pub status: u16,
    pub message: String,
    /// Server-suggested wait, in seconds, from rate-limit responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RemoteFailure {
    /// Create a failure from a status code and message.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Connection-level failure that never produced a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    /// Classify by status code.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        ErrorClass::from_status(self.status)
    }
}

/// Result type alias using `OutpostError`.
pub type Result<T> = std::result::Result<T, OutpostError>;
