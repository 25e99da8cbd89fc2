//! Error taxonomy for the agent
//!
//! Only [`ConfigError`] is allowed to stop the process, and only at startup.
//! Source and delivery errors are logged by the owning loop and retried on
//! its next tick.

use std::time::Duration;
use thiserror::Error;

/// Failure to obtain or interpret one reading of a source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source {0} not found")]
    NotFound(String),

    #[error("failed to read source {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read of source {location} exceeded {timeout:?}")]
    Timeout { location: String, timeout: Duration },

    #[error("malformed {kind} measurement: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

impl SourceError {
    pub fn malformed<S: Into<String>>(kind: &'static str, reason: S) -> Self {
        Self::Malformed { kind, reason: reason.into() }
    }
}

/// Failure to hand one record to the push endpoint
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to encode delivery record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("endpoint did not answer within {0:?}")]
    Timeout(Duration),

    #[error("endpoint rejected record with status {0}")]
    Rejected(reqwest::StatusCode),
}

impl DeliveryError {
    /// Classify a client error, keeping the configured bound for timeouts
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Transport(err)
        }
    }
}

/// Invalid startup configuration; fatal
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must not be empty")]
    Missing(&'static str),
}

impl ConfigError {
    pub fn invalid<V, R>(key: &'static str, value: V, reason: R) -> Self
    where
        V: Into<String>,
        R: Into<String>,
    {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}
