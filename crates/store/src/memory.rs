use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use offload_protocol::TransferItem;

use crate::{ItemStore, StoreError, StoreFuture};

/// In-process store with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Vec<TransferItem>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `items`.
    pub fn with_items(items: Vec<TransferItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Makes subsequent loads fail until reset.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent saves fail until reset.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Returns the committed items without going through the trait.
    pub fn snapshot(&self) -> Vec<TransferItem> {
        self.items.lock().unwrap().clone()
    }
}

impl ItemStore for MemoryStore {
    fn load(&self) -> StoreFuture<'_, Vec<TransferItem>> {
        Box::pin(async move {
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected load failure".into()));
            }
            Ok(self.items.lock().unwrap().clone())
        })
    }

    fn save<'a>(&'a self, items: &'a [TransferItem]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("injected save failure".into()));
            }
            *self.items.lock().unwrap() = items.to_vec();
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
