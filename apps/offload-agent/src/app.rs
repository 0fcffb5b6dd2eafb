//! Application orchestrator: wires the store, transfer client, probe and
//! queue together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use offload_connectivity::{ConnectivityMonitor, TcpProbe};
use offload_protocol::{DestinationMeta, ItemStatus, PayloadDescriptor};
use offload_queue::{OfflineQueue, RecordBook};
use offload_store::JsonFileStore;
use offload_transfer::{HttpTransferClient, detect_media_type};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::Cli;
use crate::config::Config;

/// Runs the agent until Ctrl-C, or until idle with `--exit-when-idle`.
pub async fn run(config: Config, cli: Cli) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // -- Persistence --
    let queue_path = config.queue_path()?;
    let records_path = config.records_path()?;
    let store = Arc::new(JsonFileStore::new(&queue_path));
    let records = Arc::new(
        RecordBook::open(&records_path)
            .await
            .with_context(|| format!("opening {}", records_path.display()))?,
    );

    // -- Transfer + connectivity --
    let client = Arc::new(HttpTransferClient::new(config.http_config())?);
    let monitor = Arc::new(ConnectivityMonitor::new(false));

    let queue = OfflineQueue::open(
        store,
        client,
        Arc::clone(&monitor),
        records,
        config.processor_config(),
    )
    .await
    .with_context(|| format!("opening {}", queue_path.display()))?;
    tracing::info!(path = %queue_path.display(), "queue opened");

    if cli.status {
        let stats = queue.get_stats().await?;
        println!(
            "total {}  pending {}  in flight {}  completed {}  failed {}",
            stats.total, stats.pending, stats.in_flight, stats.completed, stats.failed
        );
        return Ok(());
    }

    // -- Change logging + idle wake-ups --
    let changed = Arc::new(Notify::new());
    let notify = Arc::clone(&changed);
    let _changes = queue.subscribe(move |items| {
        let failed = items
            .iter()
            .filter(|i| i.status == ItemStatus::Failed)
            .count();
        tracing::debug!(items = items.len(), failed, "queue changed");
        notify.notify_one();
    });

    // -- Enqueue --
    let destination = destination_from_tags(&cli.tags);
    for path in &cli.files {
        let payload = build_descriptor(path).await?;
        let id = queue.enqueue(payload, destination.clone()).await?;
        tracing::info!(item = %id, path = %path.display(), "queued");
    }

    if cli.retry_failed {
        let rearmed = queue.retry_failed().await?;
        tracing::info!(rearmed, "failed items rearmed");
    }

    // -- Probe --
    let probe = TcpProbe::new(config.probe_config()?, Arc::clone(&monitor));
    probe.observe().await;
    let probe_task = probe.spawn(cancel.clone());

    let runtime = queue.start();

    // -- Progress logging --
    let mut progress = queue.watch_progress();
    let progress_cancel = cancel.clone();
    let progress_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = progress_cancel.cancelled() => break,
                changed = progress.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(active) = progress.borrow_and_update().clone() {
                        tracing::debug!(
                            item = %active.item_id,
                            sent = active.progress.bytes_sent,
                            total = active.progress.bytes_total,
                            "transferring"
                        );
                    }
                }
            }
        }
    });

    tracing::info!(endpoint = %config.endpoint, "agent running");

    // Wait for shutdown.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
        result = wait_until_idle(&queue, &changed), if cli.exit_when_idle => {
            result?;
            tracing::info!("nothing left to attempt");
        }
    }

    // Cleanup.
    runtime.shutdown().await;
    cancel.cancel();
    let _ = probe_task.await;
    let _ = progress_task.await;

    let stats = queue.get_stats().await?;
    tracing::info!(
        pending = stats.pending,
        completed = stats.completed,
        failed = stats.failed,
        "final queue state"
    );
    Ok(())
}

/// Resolves once no item is pending or in flight and no drain is running.
///
/// Pending items keep the agent waiting while the remote is unreachable.
async fn wait_until_idle(queue: &OfflineQueue, changed: &Notify) -> anyhow::Result<()> {
    loop {
        let stats = queue.get_stats().await?;
        if stats.pending == 0 && stats.in_flight == 0 && !queue.is_draining() {
            return Ok(());
        }
        // A drain can end without a final mutation, so poll as well.
        tokio::select! {
            _ = changed.notified() => {}
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}

/// Describes a local file for the queue.
pub async fn build_descriptor(path: &Path) -> anyhow::Result<PayloadDescriptor> {
    let path = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("resolving {}", path.display()))?;
    let metadata = tokio::fs::metadata(&path).await?;
    anyhow::ensure!(metadata.is_file(), "{} is not a regular file", path.display());

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))?;

    Ok(PayloadDescriptor {
        path: path.to_string_lossy().into_owned(),
        media_type: detect_media_type(&name).to_string(),
        name,
        size: metadata.len(),
    })
}

/// Parses a `KEY=VALUE` destination tag.
pub fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn destination_from_tags(tags: &[(String, String)]) -> DestinationMeta {
    let mut destination = DestinationMeta::new();
    for (key, value) in tags {
        destination.insert(key.clone(), value.clone());
    }
    destination
}
