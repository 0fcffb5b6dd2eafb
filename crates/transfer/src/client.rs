use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use offload_protocol::{DestinationMeta, PayloadDescriptor, TransferProgress, TransferReceipt};

use crate::TransferError;

/// Callback invoked with attempt progress.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Boxed future returned by [`TransferClient::transfer`].
pub type TransferFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransferReceipt, TransferError>> + Send + 'a>>;

/// Performs one transfer attempt.
///
/// The queue implements its retry policy on top of this trait, so an
/// implementation must not retry internally. Using a trait keeps the
/// processor independent of the transport and testable with mocks.
pub trait TransferClient: Send + Sync {
    /// Streams `payload` to the remote store.
    ///
    /// `on_progress` sees monotonically non-decreasing `bytes_sent`.
    fn transfer<'a>(
        &'a self,
        payload: &'a PayloadDescriptor,
        destination: &'a DestinationMeta,
        on_progress: ProgressCallback,
    ) -> TransferFuture<'a>;
}
