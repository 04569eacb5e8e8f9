//! Error types for playops

use thiserror::Error;

/// Main error type for playops operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a definition error (unknown state, missing action, bad transition)
    pub fn definition(msg: impl Into<String>) -> Self {
        Error::Definition(msg.into())
    }

    /// Create an action error (a failed external invocation)
    pub fn action(msg: impl Into<String>) -> Self {
        Error::Action(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// True for errors produced by a failed action invocation: the remote
    /// call, its transport, or a timeout. Only these may be routed through
    /// a state's `onError` transition; definition and infrastructure
    /// errors abort the whole run.
    pub fn is_action_failure(&self) -> bool {
        matches!(
            self,
            Error::Action(_) | Error::Http(_) | Error::Timeout(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
