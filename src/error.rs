//! Error types for answersheet-dl
//!
//! This module provides the error handling for the library:
//! - A top-level [`Error`] covering configuration, transport, and platform API failures
//! - [`AuthError`] for the login / school-switch path, which is the only fatal class
//! - A [`Result`] alias used throughout the crate
//!
//! Per-student fetch failures are *not* errors at this level: they end up as
//! [`FetchOutcome::Failed`](crate::types::FetchOutcome) entries in the run report.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for answersheet-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for answersheet-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.batch_size")
        key: Option<String>,
    },

    /// Login or school switch failed; no further progress is possible with the current session
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The platform answered with a non-success payload
    #[error("API error from {endpoint}: {message}")]
    Api {
        /// Endpoint path that produced the error
        endpoint: String,
        /// Payload code/message as returned by the platform
        message: String,
    },

    /// The platform answered with an unexpected HTTP status
    #[error("unexpected HTTP status {status} from {endpoint}")]
    UnexpectedStatus {
        /// Endpoint path or URL
        endpoint: String,
        /// HTTP status code
        status: u16,
    },

    /// A request did not complete within its timeout
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Requested exam, course, or school not present in the platform response
    #[error("not found: {0}")]
    NotFound(String),

    /// Image file collides with an existing file and the collision action forbids writing
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// The reason for the collision
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Authentication-related errors (login and school switching)
#[derive(Debug, Error)]
pub enum AuthError {
    /// Login endpoint answered with a non-success code
    #[error("login rejected: {0}")]
    LoginRejected(String),

    /// Login endpoint answered with a non-200 status
    #[error("login failed with HTTP status {0}")]
    LoginStatus(u16),

    /// Login succeeded but the response lacked a required field
    #[error("login response missing field `{0}`")]
    MissingField(&'static str),

    /// School switch endpoint answered with a non-success code
    #[error("switching to school {school_id} rejected: {message}")]
    SwitchRejected {
        /// The school that was requested
        school_id: String,
        /// Payload as returned by the platform
        message: String,
    },

    /// Another caller's login, which this caller waited for, did not produce a session
    #[error("concurrent login did not establish a session")]
    ConcurrentLoginFailed,

    /// Login or switch request could not be delivered
    #[error("authentication request failed: {0}")]
    Transport(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Returns true if this error came out of the authentication path
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}
