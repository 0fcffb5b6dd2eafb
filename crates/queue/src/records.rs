//! Local record of completed transfers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use offload_protocol::{DestinationMeta, TransferItem, TransferReceipt};
use offload_store::write_atomic;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::HookError;
use crate::hook::{CompletionHook, HookFuture};

/// What is kept about a transfer once the remote holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub item_id: String,
    pub remote_id: String,
    pub name: String,
    pub media_type: String,
    pub size: u64,
    #[serde(default)]
    pub destination: DestinationMeta,
    #[serde(default)]
    pub remote_metadata: BTreeMap<String, String>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionRecord {
    fn new(item: &TransferItem, receipt: &TransferReceipt) -> Self {
        Self {
            item_id: item.id.clone(),
            remote_id: receipt.remote_id.clone(),
            name: item.payload.name.clone(),
            media_type: item.payload.media_type.clone(),
            size: item.payload.size,
            destination: item.destination.clone(),
            remote_metadata: receipt.metadata.clone(),
            completed_at: Utc::now(),
        }
    }
}

/// [`CompletionHook`] that upserts one record per item id.
///
/// Replaying a completion replaces the existing record instead of adding
/// a second one. With a path, the records are persisted as a JSON array
/// through an atomic write.
pub struct RecordBook {
    path: Option<PathBuf>,
    records: Mutex<Vec<CompletionRecord>>,
}

impl RecordBook {
    /// Opens the book at `path`, loading existing records if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, HookError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "record book opened");
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    /// Creates a book that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn records(&self) -> Vec<CompletionRecord> {
        self.records.lock().await.clone()
    }

    pub async fn get(&self, item_id: &str) -> Option<CompletionRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.item_id == item_id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Inserts or replaces the record for `record.item_id`.
    ///
    /// The in-memory list only changes once the file write succeeded.
    pub async fn upsert(&self, record: CompletionRecord) -> Result<(), HookError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let replaced = match next.iter_mut().find(|r| r.item_id == record.item_id) {
            Some(existing) => {
                *existing = record;
                true
            }
            None => {
                next.push(record);
                false
            }
        };

        if let Some(path) = &self.path {
            let json = serde_json::to_vec_pretty(&next)?;
            write_atomic(path, &json).await?;
        }
        *records = next;
        debug!(replaced, total = records.len(), "completion record stored");
        Ok(())
    }
}

impl CompletionHook for RecordBook {
    fn on_completed<'a>(
        &'a self,
        item: &'a TransferItem,
        receipt: &'a TransferReceipt,
    ) -> HookFuture<'a> {
        Box::pin(async move {
            self.upsert(CompletionRecord::new(item, receipt)).await?;
            info!(item = %item.id, remote_id = %receipt.remote_id, "completion recorded");
            Ok(())
        })
    }
}
