//! Offline transfer queue.
//!
//! [`OfflineQueue`] is the context object that ties the item store, the
//! transfer client and the connectivity monitor together. Callers enqueue
//! work at any time; the queue drains itself whenever the remote is
//! reachable, one item at a time, with a bounded number of automatic
//! attempts per item.
//!
//! Every mutation is load, modify, save, notify. Listeners registered
//! with [`OfflineQueue::subscribe`] receive the full snapshot after each
//! one.

pub mod bus;
pub mod error;
pub mod hook;
pub mod processor;
pub mod queue;
pub mod records;

pub use bus::{NotificationBus, Subscription};
pub use error::{HookError, QueueError};
pub use hook::{CompletionHook, HookFuture, NoopHook};
pub use processor::{DrainOutcome, DrainReport, ProcessorConfig};
pub use queue::{ActiveTransfer, OfflineQueue, QueueRuntime};
pub use records::{CompletionRecord, RecordBook};
