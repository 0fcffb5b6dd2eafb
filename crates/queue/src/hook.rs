//! Completion hook seam.

use std::future::Future;
use std::pin::Pin;

use offload_protocol::{TransferItem, TransferReceipt};

use crate::error::HookError;

/// Boxed future returned by [`CompletionHook::on_completed`].
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send + 'a>>;

/// Called once an item has been accepted by the remote, before the
/// completed state is persisted.
///
/// Implementations must be idempotent per item id: a crash between the
/// hook and the queue save replays the transfer, and the hook sees the
/// same item again.
pub trait CompletionHook: Send + Sync {
    fn on_completed<'a>(
        &'a self,
        item: &'a TransferItem,
        receipt: &'a TransferReceipt,
    ) -> HookFuture<'a>;
}

/// Hook that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl CompletionHook for NoopHook {
    fn on_completed<'a>(
        &'a self,
        _item: &'a TransferItem,
        _receipt: &'a TransferReceipt,
    ) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}
