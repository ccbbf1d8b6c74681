use serde::{Deserialize, Serialize};

/// Errors surfaced by a cluster API client.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClusterError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("exec: {0}")]
    Exec(String),
    #[error("invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("retries_total must be at least 1")]
    ZeroAttempts,
    #[error("{0} must be a finite, non-negative number of seconds")]
    BadSeconds(&'static str),
    #[error("replica counts must be non-negative")]
    NegativeReplicas,
}
