//! The `OfflineQueue` context object and its caller-facing operations.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use offload_connectivity::{ChangeSubscription, ConnectivityMonitor};
use offload_protocol::{
    DestinationMeta, ItemStatus, PayloadDescriptor, QueueStats, TransferItem, TransferProgress,
};
use offload_store::ItemStore;
use offload_transfer::TransferClient;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};

use crate::bus::{NotificationBus, Subscription};
use crate::error::QueueError;
use crate::hook::CompletionHook;
use crate::processor::ProcessorConfig;

/// Progress of the attempt currently running, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTransfer {
    pub item_id: String,
    pub progress: TransferProgress,
}

/// Durable transfer queue.
///
/// Built once at start-up with [`open`](Self::open) and shared as an
/// `Arc`. All state lives in the item store; this struct only holds the
/// collaborators and the coordination primitives.
pub struct OfflineQueue {
    pub(crate) store: Arc<dyn ItemStore>,
    pub(crate) client: Arc<dyn TransferClient>,
    pub(crate) connectivity: Arc<ConnectivityMonitor>,
    pub(crate) hook: Arc<dyn CompletionHook>,
    pub(crate) config: ProcessorConfig,
    pub(crate) bus: NotificationBus,
    /// Serializes load-modify-save-notify sequences.
    pub(crate) mutation: Mutex<()>,
    /// Set while a drain runs.
    pub(crate) draining: AtomicBool,
    /// A drain was requested while one was running.
    pub(crate) rerun: AtomicBool,
    pub(crate) progress: Arc<watch::Sender<Option<ActiveTransfer>>>,
}

impl OfflineQueue {
    /// Builds the queue and resets items left `in_flight` by a previous
    /// process to `pending`.
    pub async fn open(
        store: Arc<dyn ItemStore>,
        client: Arc<dyn TransferClient>,
        connectivity: Arc<ConnectivityMonitor>,
        hook: Arc<dyn CompletionHook>,
        config: ProcessorConfig,
    ) -> Result<Arc<Self>, QueueError> {
        let (progress, _) = watch::channel(None);
        let queue = Arc::new(Self {
            store,
            client,
            connectivity,
            hook,
            config,
            bus: NotificationBus::new(),
            mutation: Mutex::new(()),
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            progress: Arc::new(progress),
        });

        let recovered = queue
            .mutate(|items| {
                let count = items.iter_mut().map(TransferItem::recover).filter(|&r| r).count();
                (count > 0).then_some(count)
            })
            .await?
            .unwrap_or(0);
        if recovered > 0 {
            info!(recovered, "reset interrupted transfers to pending");
        }

        Ok(queue)
    }

    /// Runs `op` on the loaded queue under the mutation lock.
    ///
    /// `op` returns `None` when it changed nothing; otherwise the queue is
    /// saved and broadcast.
    pub(crate) async fn mutate<R>(
        &self,
        op: impl FnOnce(&mut Vec<TransferItem>) -> Option<R>,
    ) -> Result<Option<R>, QueueError> {
        let _lock = self.mutation.lock().await;
        let mut items = self.store.load().await?;
        let Some(result) = op(&mut items) else {
            return Ok(None);
        };
        self.store.save(&items).await?;
        debug!(items = items.len(), "queue persisted");
        self.bus.broadcast(&items);
        Ok(Some(result))
    }

    /// Accepts a transfer locally and returns its id.
    ///
    /// Succeeds regardless of network state. When the remote is reachable a
    /// drain is started in the background.
    pub async fn enqueue(
        self: &Arc<Self>,
        payload: PayloadDescriptor,
        destination: DestinationMeta,
    ) -> Result<String, QueueError> {
        let item = TransferItem::new(payload, destination);
        let id = item.id.clone();
        let name = item.payload.name.clone();
        let size = item.payload.size;

        self.mutate(|items| {
            items.push(item);
            Some(())
        })
        .await?;
        info!(item = %id, name = %name, size, "item enqueued");

        self.trigger();
        Ok(id)
    }

    pub async fn get_queue(&self) -> Result<Vec<TransferItem>, QueueError> {
        Ok(self.store.load().await?)
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<TransferItem>, QueueError> {
        Ok(self.store.load().await?.into_iter().find(|i| i.id == id))
    }

    /// Removes one item. Returns `false` for an unknown id.
    ///
    /// Removing an item that is being transferred does not abort the
    /// attempt; its outcome is discarded.
    pub async fn remove_item(&self, id: &str) -> Result<bool, QueueError> {
        let removed = self
            .mutate(|items| {
                let index = items.iter().position(|i| i.id == id)?;
                Some(items.remove(index))
            })
            .await?;
        if removed.is_some() {
            info!(item = %id, "item removed");
        }
        Ok(removed.is_some())
    }

    /// Removes every completed item. Returns how many were removed.
    ///
    /// Listeners are notified even when nothing matched.
    pub async fn clear_completed(&self) -> Result<usize, QueueError> {
        let removed = self
            .mutate(|items| {
                let before = items.len();
                items.retain(|i| i.status != ItemStatus::Completed);
                Some(before - items.len())
            })
            .await?
            .unwrap_or(0);
        debug!(removed, "cleared completed items");
        Ok(removed)
    }

    /// Removes every item. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<usize, QueueError> {
        let removed = self
            .mutate(|items| {
                let removed = items.len();
                items.clear();
                Some(removed)
            })
            .await?
            .unwrap_or(0);
        info!(removed, "queue cleared");
        Ok(removed)
    }

    /// Re-arms every failed item and starts a drain, even when nothing
    /// was failed.
    ///
    /// Attempts are not reset; each re-armed item gets a fresh budget of
    /// automatic attempts.
    pub async fn retry_failed(self: &Arc<Self>) -> Result<usize, QueueError> {
        let rearmed = self
            .mutate(|items| {
                let count = items.iter_mut().map(TransferItem::rearm).filter(|&r| r).count();
                (count > 0).then_some(count)
            })
            .await?
            .unwrap_or(0);
        if rearmed > 0 {
            info!(rearmed, "failed items re-armed");
        }
        self.trigger();
        Ok(rearmed)
    }

    pub async fn get_stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats::from_items(&self.store.load().await?))
    }

    /// Registers a listener that receives the full queue after every
    /// mutation.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[TransferItem]) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// Observes the progress of the running attempt.
    pub fn watch_progress(&self) -> watch::Receiver<Option<ActiveTransfer>> {
        self.progress.subscribe()
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Drains on every transition to reachable, and once right away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> QueueRuntime {
        let weak = Arc::downgrade(self);
        let watcher = self.connectivity.on_reachability_change(move |reachable| {
            if reachable && let Some(queue) = weak.upgrade() {
                queue.trigger();
            }
        });
        self.trigger();
        info!("queue runtime started");
        QueueRuntime {
            watcher: Some(watcher),
        }
    }

    /// Starts a background drain if the remote looks reachable.
    pub(crate) fn trigger(self: &Arc<Self>) {
        if !self.connectivity.is_reachable() {
            debug!("offline, drain deferred");
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = queue.process_queue().await {
                error!(error = %e, "background drain failed");
            }
        });
    }
}

/// Keeps the connectivity watcher of [`OfflineQueue::start`] alive.
pub struct QueueRuntime {
    watcher: Option<ChangeSubscription>,
}

impl QueueRuntime {
    /// Stops reacting to connectivity changes.
    ///
    /// A drain already running finishes its current pass.
    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        info!("queue runtime stopped");
    }
}
