//! Drain loop and per-item state machine.
//!
//! ```text
//! pending    --(picked by drain)-----------------------> in_flight
//! in_flight  --(transfer succeeds)---------------------> completed
//! in_flight  --(transfer fails, budget left)-----------> pending
//! in_flight  --(transfer fails, budget exhausted)------> failed
//! failed     --(retry_failed)--------------------------> pending
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use offload_protocol::{
    INTER_ITEM_DELAY, ItemStatus, MAX_RETRIES, TransferItem, TransferProgress, TransferReceipt,
};
use offload_transfer::{ErrorKind, ProgressCallback, TransferError};
use tracing::{debug, info, trace, warn};

use crate::error::QueueError;
use crate::queue::{ActiveTransfer, OfflineQueue};

/// Retry and pacing policy.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    /// Automatic attempts per item before it is marked failed.
    pub max_retries: u32,
    /// Pause between two attempted items of the same drain.
    pub inter_item_delay: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            inter_item_delay: INTER_ITEM_DELAY,
        }
    }
}

/// Counters for one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub completed: usize,
    /// Failed attempts that left the item pending.
    pub requeued: usize,
    /// Failed attempts that exhausted the item's budget.
    pub failed: usize,
}

/// Result of [`OfflineQueue::process_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain is running; it will do one more pass.
    AlreadyRunning,
    /// The remote is unreachable; nothing was touched.
    Offline,
    Completed(DrainReport),
}

/// Holds the single-flight flag for the duration of a drain.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one attempted item.
enum Attempt {
    Skipped,
    Completed,
    Requeued,
    Failed,
}

impl OfflineQueue {
    /// Attempts every eligible item once, in insertion order.
    ///
    /// At most one drain runs at a time. A call made while a drain is
    /// running returns [`DrainOutcome::AlreadyRunning`] and makes the
    /// running drain perform one more pass. That pass only selects work
    /// the drain has not attempted yet: items enqueued mid-drain, or items
    /// re-armed after this drain attempted them. Overlapping calls
    /// therefore never attempt an item twice.
    ///
    /// Transfer failures are recorded on the item and never abort the
    /// drain. A persistence failure aborts it and is returned.
    pub async fn process_queue(&self) -> Result<DrainOutcome, QueueError> {
        let mut report: Option<DrainReport> = None;
        let mut seen = HashSet::new();

        loop {
            let Some(guard) = DrainGuard::acquire(&self.draining) else {
                self.rerun.store(true, Ordering::SeqCst);
                debug!("drain already running");
                return Ok(report.map_or(DrainOutcome::AlreadyRunning, DrainOutcome::Completed));
            };
            self.rerun.store(false, Ordering::SeqCst);

            if !self.connectivity.is_reachable() {
                debug!("offline, drain skipped");
                return Ok(report.map_or(DrainOutcome::Offline, DrainOutcome::Completed));
            }

            if report.is_none() {
                info!("drain started");
            } else {
                debug!("extra pass for requests made during the drain");
            }
            let totals = report.get_or_insert_with(DrainReport::default);
            self.drain_pass(totals, &mut seen).await?;
            drop(guard);

            // A request that lands between the pass and the guard release
            // would otherwise wait for the next trigger.
            if !self.rerun.load(Ordering::SeqCst) {
                break;
            }
        }

        let report = report.unwrap_or_default();
        info!(
            attempted = report.attempted,
            completed = report.completed,
            requeued = report.requeued,
            failed = report.failed,
            "drain finished"
        );
        Ok(DrainOutcome::Completed(report))
    }

    /// Attempts every eligible item once, skipping items `seen` by an
    /// earlier pass of the same drain.
    ///
    /// `seen` is keyed by item id and re-arm base, so a re-armed item is
    /// new work.
    async fn drain_pass(
        &self,
        report: &mut DrainReport,
        seen: &mut HashSet<(String, u32)>,
    ) -> Result<(), QueueError> {
        let max_retries = self.config.max_retries;
        let selected: Vec<String> = self
            .store
            .load()
            .await?
            .into_iter()
            .filter(|i| i.is_eligible(max_retries))
            .filter(|i| seen.insert((i.id.clone(), i.retry_base)))
            .map(|i| i.id)
            .collect();
        debug!(selected = selected.len(), "drain pass");

        // Every selected item is attempted; the client classifies failures.
        for id in selected {
            // Paces consecutive attempts, including across passes.
            if report.attempted > 0 {
                tokio::time::sleep(self.config.inter_item_delay).await;
            }

            match self.attempt(&id).await? {
                Attempt::Skipped => continue,
                Attempt::Completed => report.completed += 1,
                Attempt::Requeued => report.requeued += 1,
                Attempt::Failed => report.failed += 1,
            }
            report.attempted += 1;
        }
        Ok(())
    }

    async fn attempt(&self, id: &str) -> Result<Attempt, QueueError> {
        let max_retries = self.config.max_retries;
        let started = self
            .mutate(|items| {
                let item = items
                    .iter_mut()
                    .find(|i| i.id == id)
                    .filter(|i| i.is_eligible(max_retries))?;
                item.begin_attempt(Utc::now());
                Some(item.clone())
            })
            .await?;
        let Some(item) = started else {
            debug!(item = %id, "item removed or no longer eligible, skipping");
            return Ok(Attempt::Skipped);
        };

        info!(item = %id, attempt = item.attempts, name = %item.payload.name, "transfer attempt started");
        let result = self
            .client
            .transfer(&item.payload, &item.destination, self.progress_callback(id))
            .await;
        self.progress.send_replace(None);

        match result {
            Ok(receipt) => self.finish_success(&item, receipt).await,
            Err(e) => self.finish_failure(&item, e).await,
        }
    }

    async fn finish_success(
        &self,
        attempted: &TransferItem,
        receipt: TransferReceipt,
    ) -> Result<Attempt, QueueError> {
        let _lock = self.mutation.lock().await;
        let mut items = self.store.load().await?;
        let Some(item) = items.iter_mut().find(|i| i.id == attempted.id) else {
            warn!(item = %attempted.id, remote_id = %receipt.remote_id, "item removed during transfer, result discarded");
            return Ok(Attempt::Completed);
        };

        item.complete(receipt.clone());
        if let Err(e) = self.hook.on_completed(item, &receipt).await {
            warn!(item = %item.id, error = %e, "completion hook failed");
            item.last_error = Some(format!("completion hook failed: {e}"));
        }

        self.store.save(&items).await?;
        self.bus.broadcast(&items);
        info!(item = %attempted.id, attempt = attempted.attempts, "transfer completed");
        Ok(Attempt::Completed)
    }

    async fn finish_failure(
        &self,
        attempted: &TransferItem,
        error: TransferError,
    ) -> Result<Attempt, QueueError> {
        let kind = error.kind();
        let message = match kind {
            ErrorKind::Fatal => format!("fatal: {error}"),
            ErrorKind::Network | ErrorKind::Rejected => error.to_string(),
        };
        warn!(
            item = %attempted.id,
            attempt = attempted.attempts,
            kind = %kind,
            error = %error,
            "transfer attempt failed"
        );

        let max_retries = self.config.max_retries;
        let status = self
            .mutate(|items| {
                let item = items.iter_mut().find(|i| i.id == attempted.id)?;
                Some(item.fail_attempt(&message, max_retries))
            })
            .await?;

        Ok(match status {
            Some(ItemStatus::Failed) => {
                warn!(item = %attempted.id, attempts = attempted.attempts, "retry budget exhausted, item failed");
                Attempt::Failed
            }
            Some(_) => Attempt::Requeued,
            None => {
                debug!(item = %attempted.id, "item removed during transfer");
                Attempt::Requeued
            }
        })
    }

    fn progress_callback(&self, id: &str) -> ProgressCallback {
        let progress = Arc::clone(&self.progress);
        let item_id = id.to_string();
        Arc::new(move |p: TransferProgress| {
            trace!(item = %item_id, sent = p.bytes_sent, total = p.bytes_total, "progress");
            progress.send_replace(Some(ActiveTransfer {
                item_id: item_id.clone(),
                progress: p,
            }));
        })
    }
}
