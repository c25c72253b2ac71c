//! Error types for the agent library

use thiserror::Error;

/// Errors returned by a container runtime client
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The runtime could not be reached or the request timed out
    #[error("runtime request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The runtime answered with a non-success status
    #[error("runtime returned {status} for {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },

    /// Container disappeared between listing and inspection
    #[error("no such container: {0}")]
    NotFound(String),

    #[error("invalid runtime URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors raised while talking to the management server
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("management server request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("management server returned {status} for {path}")]
    Status { status: u16, path: String },

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid management server URL: {0}")]
    Url(#[from] url::ParseError),
}
