//! Error kinds shared across the workspace.
//!
//! Service failures never reach the caller of `respond`: they are turned into
//! an in-band reply at the call site. These types exist so that the boundary
//! code can log and branch on what actually went wrong.

use thiserror::Error;

/// The connection to the conversation service failed to open or dropped.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("connection closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A completion or transcription request failed.
#[derive(Debug, Error)]
pub enum ServiceCallError {
    #[error("service returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),
    #[error("turn cancelled")]
    Cancelled,
    #[error("service returned an empty response")]
    EmptyResponse,
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Writing to or reading from durable storage failed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("no record stored under '{0}'")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not active; call start() first")]
    Inactive,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
