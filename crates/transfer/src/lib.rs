//! Streaming payload transfer with progress tracking.
//!
//! A [`TransferClient`] performs exactly one attempt: it streams the
//! payload, reports [`TransferProgress`](offload_protocol::TransferProgress)
//! as chunks go out, and classifies any failure so the queue can decide
//! what to do next. It never touches the item store.

mod chunked;
mod client;
mod http;
mod progress;
mod validation;

use std::time::Duration;

pub use chunked::{Chunk, ChunkReader, calculate_file_checksum};
pub use client::{ProgressCallback, TransferClient, TransferFuture};
pub use http::{HttpClientConfig, HttpTransferClient};
pub use progress::ProgressMeter;
pub use validation::{detect_media_type, validate_descriptor};

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connectivity lost or timed out.
    Network,
    /// The remote declined the payload.
    Rejected,
    /// The request was malformed; the payload was never sent.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::Network => "network",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Fatal => "fatal",
        })
    }
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("attempt timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("remote returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl TransferError {
    /// Classifies the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Connection(_) | TransferError::Timeout(_) => ErrorKind::Network,
            TransferError::Remote { status, .. } => classify_status(*status),
            TransferError::Io(_)
            | TransferError::InvalidDescriptor(_)
            | TransferError::InvalidRequest(_)
            | TransferError::InvalidResponse(_) => ErrorKind::Fatal,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransferError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            TransferError::InvalidResponse(err.to_string())
        } else {
            TransferError::Connection(err.to_string())
        }
    }
}

/// Maps an HTTP status to a failure class.
///
/// Throttling, request timeouts and server errors are transient; every
/// other non-success status is a rejection.
fn classify_status(status: u16) -> ErrorKind {
    match status {
        408 | 429 | 500..=599 => ErrorKind::Network,
        _ => ErrorKind::Rejected,
    }
}
