//! Queue error types.

use offload_store::StoreError;

/// Errors produced by completion hooks.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Errors surfaced to queue callers.
///
/// Transfer and completion hook failures never appear here; they are
/// recorded on the item.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}
