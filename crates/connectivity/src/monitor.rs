use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Current reachability of the remote store.
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initial: bool) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn is_reachable(&self) -> bool {
        *self.state.borrow()
    }

    /// Records an observation. Only a change of value notifies subscribers.
    ///
    /// Returns `true` if the observation was a transition.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            info!(reachable, "reachability changed");
        }
        changed
    }

    /// Returns a receiver that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Calls `callback` with the new value on every transition.
    ///
    /// The callback runs on a spawned task, so this must be called from
    /// within a tokio runtime. Bursts of transitions may coalesce; the
    /// callback never sees the same value twice in a row.
    pub fn on_reachability_change<F>(&self, callback: F) -> ChangeSubscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut rx = self.state.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut last = *rx.borrow_and_update();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let reachable = *rx.borrow_and_update();
                        if reachable != last {
                            last = reachable;
                            callback(reachable);
                        }
                    }
                }
            }
            debug!("reachability watcher stopped");
        });

        ChangeSubscription {
            cancel,
            handle: Some(handle),
        }
    }
}

impl Default for ConnectivityMonitor {
    /// Starts optimistic: the first attempt decides.
    fn default() -> Self {
        Self::new(true)
    }
}

/// Handle for a callback registered with
/// [`ConnectivityMonitor::on_reachability_change`].
///
/// Dropping the handle stops the watcher.
pub struct ChangeSubscription {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels and waits for the watcher task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
