//! Durable persistence for the transfer queue.
//!
//! The store is deliberately dumb: it loads and saves the whole ordered
//! queue as one unit. A save either fully replaces the committed queue
//! or leaves it untouched.

mod json;
mod memory;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use offload_protocol::TransferItem;

pub use json::{JsonFileStore, write_atomic};
pub use memory::MemoryStore;

/// Errors produced by item stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt queue file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by [`ItemStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Load/save contract for the ordered queue.
///
/// Implementations must be atomic from the caller's point of view.
pub trait ItemStore: Send + Sync {
    /// Returns the committed queue in insertion order.
    fn load(&self) -> StoreFuture<'_, Vec<TransferItem>>;

    /// Replaces the committed queue.
    fn save<'a>(&'a self, items: &'a [TransferItem]) -> StoreFuture<'a, ()>;
}

/// Returns the default queue file path.
pub fn default_queue_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("offload").join("queue.json"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
