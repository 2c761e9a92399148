use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

use postbox_db::{AppendOutcome, Database, EntryRow};
use postbox_types::{ChildAdded, EntryValue};

/// Capacity of the live broadcast. A subscriber that falls further behind
/// than this catches up from the store instead.
const BROADCAST_CAPACITY: usize = 1024;

/// Commits entries and fans child-added events out to subscribers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,

    /// Every committed child of every namespace, in commit order.
    broadcast_tx: broadcast::Sender<ChildAdded>,

    /// Held across commit + broadcast so broadcast order equals seq order.
    append_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                broadcast_tx,
                append_lock: Mutex::new(()),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Number of live subscriptions across all namespaces.
    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }

    /// Commit `value` under `key` and announce it to every subscriber of
    /// `namespace`. Duplicate keys are reported and not broadcast.
    pub async fn append(&self, namespace: &str, key: &str, value: EntryValue) -> Result<AppendOutcome> {
        let _guard = self.inner.append_lock.lock().await;

        let db = self.inner.db.clone();
        let (ns, k, v) = (namespace.to_string(), key.to_string(), value.clone());
        let outcome = tokio::task::spawn_blocking(move || db.append_entry(&ns, &k, &v))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        if let AppendOutcome::Appended(seq) = outcome {
            debug!("Appended {}/{} at seq {}", namespace, key, seq);
            // No receivers is fine: nobody is listening yet.
            let _ = self.inner.broadcast_tx.send(ChildAdded {
                namespace: namespace.to_string(),
                seq,
                key: key.to_string(),
                value,
            });
        }

        Ok(outcome)
    }

    /// Subscribe to `namespace`: every existing child first, then every
    /// child committed afterwards, each exactly once and in commit order.
    pub async fn subscribe_child_added(&self, namespace: &str) -> Result<ChildSubscription> {
        // Subscribe before reading history so nothing committed in between
        // is lost; the seq filter drops what the history already covered.
        let live = self.inner.broadcast_tx.subscribe();

        let mut subscription = ChildSubscription {
            namespace: namespace.to_string(),
            db: self.inner.db.clone(),
            replay: VecDeque::new(),
            last_seq: 0,
            live,
        };
        subscription.refill().await?;

        debug!(
            "Subscribed to '{}' with {} children to replay",
            namespace,
            subscription.replay.len()
        );
        Ok(subscription)
    }
}

/// One namespace's child-added stream.
pub struct ChildSubscription {
    namespace: String,
    db: Arc<Database>,
    replay: VecDeque<ChildAdded>,
    /// Highest seq handed out (or queued for replay) so far.
    last_seq: i64,
    live: broadcast::Receiver<ChildAdded>,
}

impl ChildSubscription {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Next child, or `None` once the dispatcher is gone.
    pub async fn next(&mut self) -> Option<ChildAdded> {
        loop {
            if let Some(child) = self.replay.pop_front() {
                return Some(child);
            }

            match self.live.recv().await {
                Ok(child) => {
                    if child.namespace != self.namespace || child.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = child.seq;
                    return Some(child);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        "Subscriber of '{}' lagged by {} events, catching up from store",
                        self.namespace, n
                    );
                    if let Err(e) = self.refill().await {
                        warn!("Catch-up for '{}' failed: {}", self.namespace, e);
                        return None;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Queue every stored child newer than `last_seq`.
    async fn refill(&mut self) -> Result<()> {
        let db = self.db.clone();
        let namespace = self.namespace.clone();
        let after = self.last_seq;
        let rows = tokio::task::spawn_blocking(move || db.entries_since(&namespace, after))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        for row in rows {
            self.last_seq = self.last_seq.max(row.seq);
            if let Some(child) = decode_row(&row) {
                self.replay.push_back(child);
            }
        }
        Ok(())
    }
}

fn decode_row(row: &EntryRow) -> Option<ChildAdded> {
    match row.to_child_added() {
        Ok(child) => Some(child),
        Err(e) => {
            warn!("Skipping unreadable entry: {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn replays_history_then_streams_new_children() {
        let dispatcher = dispatcher();
        dispatcher.append("messages", "a", EntryValue::text("1")).await.unwrap();
        dispatcher.append("messages", "b", EntryValue::text("2")).await.unwrap();

        let mut sub = dispatcher.subscribe_child_added("messages").await.unwrap();
        dispatcher.append("messages", "c", EntryValue::text("3")).await.unwrap();

        let mut keys = Vec::new();
        for _ in 0..3 {
            keys.push(sub.next().await.unwrap().key);
        }
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn other_namespaces_are_filtered_out() {
        let dispatcher = dispatcher();
        let mut sub = dispatcher.subscribe_child_added("messages").await.unwrap();

        dispatcher
            .append("posts", "p", EntryValue::image_post("https://x/y.png", "y.png"))
            .await
            .unwrap();
        dispatcher.append("messages", "m", EntryValue::text("hi")).await.unwrap();

        let child = sub.next().await.unwrap();
        assert_eq!(child.key, "m");
        assert_eq!(child.namespace, "messages");
    }

    #[tokio::test]
    async fn duplicate_key_is_not_broadcast() {
        let dispatcher = dispatcher();
        let mut sub = dispatcher.subscribe_child_added("messages").await.unwrap();

        let first = dispatcher.append("messages", "k", EntryValue::text("1")).await.unwrap();
        let second = dispatcher.append("messages", "k", EntryValue::text("2")).await.unwrap();
        dispatcher.append("messages", "z", EntryValue::text("3")).await.unwrap();

        assert!(matches!(first, AppendOutcome::Appended(_)));
        assert_eq!(second, AppendOutcome::Duplicate);
        assert_eq!(sub.next().await.unwrap().key, "k");
        assert_eq!(sub.next().await.unwrap().key, "z");
    }

    #[tokio::test]
    async fn lagging_subscriber_catches_up_in_order() {
        let dispatcher = dispatcher();
        let mut sub = dispatcher.subscribe_child_added("messages").await.unwrap();

        let total = BROADCAST_CAPACITY + 10;
        for i in 0..total {
            dispatcher
                .append("messages", &format!("k{:05}", i), EntryValue::text(i.to_string()))
                .await
                .unwrap();
        }

        for i in 0..total {
            let child = sub.next().await.unwrap();
            assert_eq!(child.key, format!("k{:05}", i));
        }
    }
}
