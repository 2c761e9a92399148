//! Local mirror of a remote append-only child stream.
//!
//! The mirror owns an ordered list of entries that only ever grows. While
//! subscribed, a pump task moves each child-added event from the backend to
//! the end of the list and bumps a version counter that renderers watch. The
//! pump is the only writer.
//!
//! Keys are not de-duplicated: if the backend delivers the same child twice,
//! the list holds it twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use postbox_types::{Entry, EntryValue};

use crate::backend::{Backend, ChildStream, NamespaceRef};
use crate::error::BackendError;

/// Where the mirror's subscription stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Never subscribed.
    Idle,
    Live,
    /// The backend ended the stream. The list is stale from here on.
    Closed,
    /// The stream failed. The list is stale from here on.
    Failed(String),
    /// Detached by the owner; the list is frozen.
    Unsubscribed,
}

/// Proof of an active subscription, consumed by [`StreamMirror::unsubscribe`].
#[must_use = "dropping the handle leaves the subscription running"]
pub struct SubscriptionHandle {
    id: u64,
    pump: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn is_finished(&self) -> bool {
        self.pump.is_finished()
    }
}

pub struct StreamMirror {
    namespace: NamespaceRef,
    shared: Arc<MirrorShared>,
}

struct MirrorShared {
    namespace: NamespaceRef,
    list: RwLock<MirrorList>,
    version: watch::Sender<u64>,
    next_subscription: AtomicU64,
}

struct MirrorList {
    entries: Vec<Entry>,
    /// Subscription allowed to append; 0 when none is.
    active: u64,
    state: SubscriptionState,
}

impl MirrorShared {
    fn read(&self) -> RwLockReadGuard<'_, MirrorList> {
        self.list.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MirrorList> {
        self.list.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn append(&self, entry: Entry) {
        self.write().entries.push(entry);
        self.bump();
    }

    /// Append on behalf of subscription `id`; ignored once it was replaced
    /// or detached.
    fn deliver(&self, id: u64, entry: Entry) -> bool {
        {
            let mut list = self.write();
            if list.active != id {
                return false;
            }
            list.entries.push(entry);
        }
        self.bump();
        true
    }

    fn finish(&self, id: u64, state: SubscriptionState) {
        {
            let mut list = self.write();
            if list.active != id {
                return;
            }
            list.active = 0;
            list.state = state;
        }
        self.bump();
    }
}

impl StreamMirror {
    pub fn new(namespace: NamespaceRef) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            namespace: namespace.clone(),
            shared: Arc::new(MirrorShared {
                namespace,
                list: RwLock::new(MirrorList {
                    entries: Vec::new(),
                    active: 0,
                    state: SubscriptionState::Idle,
                }),
                version,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    pub fn namespace(&self) -> &NamespaceRef {
        &self.namespace
    }

    /// Subscribe to the mirrored namespace on `backend` and start mirroring.
    ///
    /// The list is rebuilt from scratch: it is cleared and then refilled by
    /// the backend's replay. A subscription still running on this mirror is
    /// replaced.
    pub async fn subscribe<B: Backend>(&self, backend: &B) -> Result<SubscriptionHandle, BackendError> {
        let stream = backend.subscribe_child_added(&self.namespace).await?;
        Ok(self.attach(stream))
    }

    /// Start mirroring an already opened child stream.
    pub fn attach(&self, stream: ChildStream) -> SubscriptionHandle {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        {
            let mut list = self.shared.write();
            list.entries.clear();
            list.active = id;
            list.state = SubscriptionState::Live;
        }
        self.shared.bump();

        info!("Mirroring '{}' (subscription {})", self.namespace, id);
        let pump = tokio::spawn(run_pump(self.shared.clone(), id, stream));
        SubscriptionHandle { id, pump }
    }

    /// Child-added callback: append `{key, value}` to the end of the list and
    /// notify watchers.
    pub fn on_entry(&self, key: impl Into<String>, value: EntryValue) {
        self.shared.append(Entry {
            key: key.into(),
            value,
        });
    }

    /// Detach a subscription. No entry is appended on its behalf after this
    /// returns; the list keeps its content.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        {
            let mut list = self.shared.write();
            if list.active == handle.id {
                list.active = 0;
                list.state = SubscriptionState::Unsubscribed;
            }
        }
        handle.pump.abort();
        self.shared.bump();
        debug!("Unsubscribed '{}' (subscription {})", self.namespace, handle.id);
    }

    /// Snapshot of the list in arrival order.
    pub fn entries(&self) -> Vec<Entry> {
        self.shared.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.read().state.clone()
    }

    /// Version counter bumped on every list or state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }
}

async fn run_pump(shared: Arc<MirrorShared>, id: u64, mut stream: ChildStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(entry) => {
                if !shared.deliver(id, entry) {
                    return;
                }
            }
            Err(e) => {
                warn!("Subscription to '{}' failed: {}", shared.namespace, e);
                shared.finish(id, SubscriptionState::Failed(e.to_string()));
                return;
            }
        }
    }

    warn!("Subscription to '{}' closed by backend", shared.namespace);
    shared.finish(id, SubscriptionState::Closed);
}
