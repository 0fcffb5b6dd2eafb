use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a queued transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl ItemStatus {
    /// Returns `true` for statuses no drain will move on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InFlight => "in_flight",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Immutable description of the bytes to send.
///
/// Captured once at enqueue time and trusted from then on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadDescriptor {
    /// Local location of the source bytes.
    pub path: String,
    /// Declared file name.
    pub name: String,
    /// Declared media type (e.g. `video/mp4`).
    pub media_type: String,
    /// Declared size in bytes.
    pub size: u64,
}

/// Opaque destination attributes passed through to the transfer client.
///
/// Tags, category, owner and channel identifiers all live here as plain
/// strings; the queue never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationMeta(BTreeMap<String, String>);

impl DestinationMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for DestinationMeta {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// What the remote store returned for a completed transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    /// Identifier the remote assigned to the stored payload.
    pub remote_id: String,
    /// Metadata echoed back by the remote.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    pub id: String,
    pub payload: PayloadDescriptor,
    #[serde(default)]
    pub destination: DestinationMeta,
    pub status: ItemStatus,
    #[serde(default)]
    pub attempts: u32,
    /// Attempt count at the last manual re-arm. The automatic budget is
    /// measured from here.
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub retry_base: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<TransferReceipt>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl TransferItem {
    /// Creates a fresh pending item with a generated id.
    pub fn new(payload: PayloadDescriptor, destination: DestinationMeta) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            destination,
            status: ItemStatus::Pending,
            attempts: 0,
            retry_base: 0,
            last_attempt_at: None,
            last_error: None,
            created_at: Utc::now(),
            receipt: None,
        }
    }

    /// Attempts consumed since the item was enqueued or last re-armed.
    pub fn budget_used(&self) -> u32 {
        self.attempts.saturating_sub(self.retry_base)
    }

    /// Returns `true` if a drain may attempt this item.
    pub fn is_eligible(&self, max_retries: u32) -> bool {
        match self.status {
            ItemStatus::Pending => true,
            ItemStatus::Failed => self.budget_used() < max_retries,
            ItemStatus::InFlight | ItemStatus::Completed => false,
        }
    }

    /// `pending -> in_flight`: counts the attempt and stamps its start.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = ItemStatus::InFlight;
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now);
    }

    /// `in_flight -> completed`.
    pub fn complete(&mut self, receipt: TransferReceipt) {
        self.status = ItemStatus::Completed;
        self.last_error = None;
        self.receipt = Some(receipt);
    }

    /// `in_flight -> pending | failed` depending on the remaining budget.
    pub fn fail_attempt(&mut self, error: &str, max_retries: u32) -> ItemStatus {
        if self.budget_used() >= max_retries {
            self.status = ItemStatus::Failed;
            self.last_error = Some(format!(
                "max retries exceeded ({} attempts): {error}",
                self.budget_used()
            ));
        } else {
            self.status = ItemStatus::Pending;
            self.last_error = Some(error.to_string());
        }
        self.status
    }

    /// `failed -> pending` on operator request. Attempts keep accumulating.
    ///
    /// Returns `false` if the item was not failed.
    pub fn rearm(&mut self) -> bool {
        if self.status != ItemStatus::Failed {
            return false;
        }
        self.status = ItemStatus::Pending;
        self.retry_base = self.attempts;
        true
    }

    /// Resets an attempt interrupted by a process exit.
    ///
    /// Returns `true` if the item was in flight.
    pub fn recover(&mut self) -> bool {
        if self.status != ItemStatus::InFlight {
            return false;
        }
        self.status = ItemStatus::Pending;
        self.last_error = Some("attempt interrupted by restart".into());
        true
    }
}

/// Derived counts over a queue snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn from_items(items: &[TransferItem]) -> Self {
        let mut stats = QueueStats {
            total: items.len(),
            ..QueueStats::default()
        };
        for item in items {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::InFlight => stats.in_flight += 1,
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Snapshot of one attempt's progress. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
    /// 0.0 to 100.0.
    pub percentage: f64,
    pub throughput_bytes_per_second: f64,
    /// `None` while throughput is still zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
}

impl TransferProgress {
    /// Derives percentage, throughput and ETA from raw counters.
    ///
    /// `elapsed` is measured from the start of the attempt.
    pub fn measure(bytes_sent: u64, bytes_total: u64, elapsed: Duration) -> Self {
        let percentage = if bytes_total == 0 {
            100.0
        } else {
            (bytes_sent as f64 / bytes_total as f64 * 100.0).min(100.0)
        };

        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            bytes_sent as f64 / secs
        } else {
            0.0
        };

        let eta_seconds = if throughput > 0.0 {
            Some(bytes_total.saturating_sub(bytes_sent) as f64 / throughput)
        } else {
            None
        };

        Self {
            bytes_sent,
            bytes_total,
            percentage,
            throughput_bytes_per_second: throughput,
            eta_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> PayloadDescriptor {
        PayloadDescriptor {
            path: "/tmp/clip.mp4".into(),
            name: "clip.mp4".into(),
            media_type: "video/mp4".into(),
            size: 4096,
        }
    }

    #[test]
    fn new_item_is_pending() {
        let item = TransferItem::new(sample_payload(), DestinationMeta::new());
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert!(item.last_attempt_at.is_none());
        assert!(item.is_eligible(3));
    }

    #[test]
    fn ids_are_unique() {
        let a = TransferItem::new(sample_payload(), DestinationMeta::new());
        let b = TransferItem::new(sample_payload(), DestinationMeta::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn failures_requeue_until_cap() {
        let mut item = TransferItem::new(sample_payload(), DestinationMeta::new());
        for attempt in 1..=2 {
            item.begin_attempt(Utc::now());
            assert_eq!(item.attempts, attempt);
            assert_eq!(item.status, ItemStatus::InFlight);
            assert_eq!(item.fail_attempt("timeout", 3), ItemStatus::Pending);
            assert_eq!(item.last_error.as_deref(), Some("timeout"));
        }

        item.begin_attempt(Utc::now());
        assert_eq!(item.fail_attempt("timeout", 3), ItemStatus::Failed);
        assert_eq!(item.attempts, 3);
        assert!(item.last_error.as_deref().unwrap().contains("max retries"));
        assert!(!item.is_eligible(3));
    }

    #[test]
    fn completion_clears_error() {
        let mut item = TransferItem::new(sample_payload(), DestinationMeta::new());
        item.begin_attempt(Utc::now());
        item.fail_attempt("reset", 3);
        item.begin_attempt(Utc::now());
        item.complete(TransferReceipt {
            remote_id: "r-1".into(),
            metadata: BTreeMap::new(),
        });
        assert_eq!(item.status, ItemStatus::Completed);
        assert!(item.last_error.is_none());
        assert_eq!(item.receipt.as_ref().unwrap().remote_id, "r-1");
        assert!(!item.is_eligible(3));
    }

    #[test]
    fn rearm_keeps_attempts_and_grants_budget() {
        let mut item = TransferItem::new(sample_payload(), DestinationMeta::new());
        for _ in 0..3 {
            item.begin_attempt(Utc::now());
            item.fail_attempt("down", 3);
        }
        assert_eq!(item.status, ItemStatus::Failed);

        assert!(item.rearm());
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 3);
        assert_eq!(item.budget_used(), 0);

        item.begin_attempt(Utc::now());
        assert_eq!(item.attempts, 4);
        assert_eq!(item.fail_attempt("down", 3), ItemStatus::Pending);
    }

    #[test]
    fn rearm_ignores_non_failed() {
        let mut item = TransferItem::new(sample_payload(), DestinationMeta::new());
        assert!(!item.rearm());
        assert_eq!(item.status, ItemStatus::Pending);
    }

    #[test]
    fn recover_resets_in_flight() {
        let mut item = TransferItem::new(sample_payload(), DestinationMeta::new());
        item.begin_attempt(Utc::now());
        assert!(item.recover());
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 1);
        assert!(!item.recover());
    }

    #[test]
    fn stats_count_each_status() {
        let mut items: Vec<TransferItem> = (0..4)
            .map(|_| TransferItem::new(sample_payload(), DestinationMeta::new()))
            .collect();
        items[1].status = ItemStatus::InFlight;
        items[2].status = ItemStatus::Completed;
        items[3].status = ItemStatus::Failed;

        let stats = QueueStats::from_items(&items);
        assert_eq!(
            stats,
            QueueStats {
                total: 4,
                pending: 1,
                in_flight: 1,
                completed: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn item_json_uses_camel_case_and_snake_status() {
        let mut item = TransferItem::new(
            sample_payload(),
            DestinationMeta::new().with("channel", "c-7"),
        );
        item.begin_attempt(Utc::now());
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"status\":\"in_flight\""));
        assert!(json.contains("\"mediaType\":\"video/mp4\""));
        assert!(json.contains("\"lastAttemptAt\""));
        assert!(json.contains("\"channel\":\"c-7\""));
        assert!(!json.contains("retryBase"));
        assert!(!json.contains("lastError"));

        let parsed: TransferItem = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn progress_derives_throughput_and_eta() {
        let p = TransferProgress::measure(500, 1000, Duration::from_secs(2));
        assert!((p.percentage - 50.0).abs() < f64::EPSILON);
        assert!((p.throughput_bytes_per_second - 250.0).abs() < f64::EPSILON);
        assert!((p.eta_seconds.unwrap() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_without_elapsed_has_no_eta() {
        let p = TransferProgress::measure(0, 1000, Duration::ZERO);
        assert_eq!(p.throughput_bytes_per_second, 0.0);
        assert!(p.eta_seconds.is_none());
    }

    #[test]
    fn progress_empty_payload_is_complete() {
        let p = TransferProgress::measure(0, 0, Duration::from_millis(10));
        assert_eq!(p.percentage, 100.0);
    }

    #[test]
    fn destination_meta_accessors() {
        let mut meta = DestinationMeta::new().with("owner", "u-1");
        meta.insert("tags", "a,b");
        assert_eq!(meta.get("owner"), Some("u-1"));
        assert_eq!(meta.len(), 2);
        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["owner", "tags"]);
    }
}
