use std::collections::HashSet;
use std::path::{Path, PathBuf};

use offload_protocol::TransferItem;
use offload_protocol::constants::QUEUE_FORMAT_VERSION;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ItemStore, StoreError, StoreFuture};

/// On-disk layout of the queue file.
#[derive(Serialize, Deserialize)]
struct QueueDocument {
    version: u32,
    items: Vec<TransferItem>,
}

/// Queue persisted as a single JSON document.
///
/// Saves go through a sibling temp file that is synced and then renamed
/// over the target, so readers only ever see a complete document.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_items(&self) -> Result<Vec<TransferItem>, StoreError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no queue file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let doc: QueueDocument = serde_json::from_slice(&data).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        if doc.version > QUEUE_FORMAT_VERSION {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("unsupported format version {}", doc.version),
            });
        }

        let mut seen = HashSet::with_capacity(doc.items.len());
        for item in &doc.items {
            if !seen.insert(item.id.as_str()) {
                return Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    reason: format!("duplicate item id {}", item.id),
                });
            }
        }

        debug!(path = %self.path.display(), items = doc.items.len(), "queue loaded");
        Ok(doc.items)
    }

    async fn write_items(&self, items: &[TransferItem]) -> Result<(), StoreError> {
        let doc = QueueDocument {
            version: QUEUE_FORMAT_VERSION,
            items: items.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&doc)?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, &json).await?;
        debug!(path = %self.path.display(), items = items.len(), "queue saved");
        Ok(())
    }
}

impl ItemStore for JsonFileStore {
    fn load(&self) -> StoreFuture<'_, Vec<TransferItem>> {
        Box::pin(self.read_items())
    }

    fn save<'a>(&'a self, items: &'a [TransferItem]) -> StoreFuture<'a, ()> {
        Box::pin(self.write_items(items))
    }
}

/// Replaces `path` with `data` via a synced temp file and a rename.
///
/// On failure the temp file is removed and `path` keeps its previous
/// contents.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "queue".into());
    name.push(".tmp");
    path.with_file_name(name)
}
