//! Shared data model for the Offload transfer queue.
//!
//! Every other crate in the workspace speaks in these types: the item
//! store persists them, the transfer client consumes their descriptors,
//! and the queue processor drives their status.

pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{ATTEMPT_TIMEOUT, DEFAULT_CHUNK_SIZE, INTER_ITEM_DELAY, MAX_RETRIES};
pub use types::{
    DestinationMeta, ItemStatus, PayloadDescriptor, QueueStats, TransferItem, TransferProgress,
    TransferReceipt,
};
