//! In-process backend with the same semantics as the Postbox server.
//!
//! Useful for running the client core without a server and as the test
//! double for it. Fault switches let callers make individual operations
//! fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::debug;

use postbox_types::api::UploadResult;
use postbox_types::{Entry, EntryValue, PushIdGenerator};

use crate::backend::{Backend, ChildItem, ChildStream, EntryRef, NamespaceRef};
use crate::error::BackendError;

#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    public_base: String,
    keys: Mutex<PushIdGenerator>,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    namespaces: HashMap<String, NamespaceLog>,
    objects: HashMap<String, Bytes>,
    faults: Faults,
}

#[derive(Default)]
struct NamespaceLog {
    entries: Vec<Entry>,
    subscribers: Vec<mpsc::UnboundedSender<ChildItem>>,
}

impl NamespaceLog {
    /// Send to every live subscriber, forgetting the ones that hung up.
    fn fan_out(&mut self, item: &ChildItem) {
        self.subscribers.retain(|tx| tx.send(item.clone()).is_ok());
    }
}

/// Operations that should fail until switched back off.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    pub writes: bool,
    pub uploads: bool,
    pub url_resolution: bool,
    pub subscriptions: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_public_base("memory://objects")
    }

    /// Public object URLs are `{public_base}/{object_key}`.
    pub fn with_public_base(public_base: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                public_base: public_base.into().trim_end_matches('/').to_string(),
                keys: Mutex::new(PushIdGenerator::new()),
                state: Mutex::new(MemoryState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state().faults = faults;
    }

    /// Stored entries of a namespace, in append order.
    pub fn entries(&self, namespace: &str) -> Vec<Entry> {
        self.state()
            .namespaces
            .get(namespace)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    pub fn object(&self, object_key: &str) -> Option<Bytes> {
        self.state().objects.get(object_key).cloned()
    }

    pub fn subscriber_count(&self, namespace: &str) -> usize {
        let mut state = self.state();
        match state.namespaces.get_mut(namespace) {
            Some(log) => {
                log.subscribers.retain(|tx| !tx.is_closed());
                log.subscribers.len()
            }
            None => 0,
        }
    }

    /// Deliver an already stored entry to current subscribers a second time,
    /// the way a misbehaving transport might. Returns false if `key` is unknown.
    pub fn redeliver(&self, namespace: &str, key: &str) -> bool {
        let mut state = self.state();
        let Some(log) = state.namespaces.get_mut(namespace) else {
            return false;
        };
        let Some(entry) = log.entries.iter().find(|e| e.key == key).cloned() else {
            return false;
        };
        log.fan_out(&Ok(entry));
        true
    }

    /// Fail every open subscription of `namespace` with `reason`.
    pub fn drop_subscribers(&self, namespace: &str, reason: &str) {
        let mut state = self.state();
        if let Some(log) = state.namespaces.get_mut(namespace) {
            log.fan_out(&Err(BackendError::SubscriptionEnded(reason.to_string())));
            log.subscribers.clear();
        }
    }
}

impl Backend for MemoryBackend {
    fn generate_key(&self, namespace: &NamespaceRef) -> EntryRef {
        let key = self
            .inner
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .generate();
        EntryRef::new(namespace.clone(), key)
    }

    async fn write(&self, entry: &EntryRef, value: EntryValue) -> Result<(), BackendError> {
        let mut state = self.state();
        if state.faults.writes {
            return Err(BackendError::Transport("write refused (fault injected)".into()));
        }

        let log = state
            .namespaces
            .entry(entry.namespace().name().to_string())
            .or_default();
        if log.entries.iter().any(|e| e.key == entry.key()) {
            return Err(BackendError::Conflict(entry.key().to_string()));
        }

        let stored = Entry {
            key: entry.key().to_string(),
            value,
        };
        log.entries.push(stored.clone());
        log.fan_out(&Ok(stored));
        debug!("memory: wrote {}", entry);
        Ok(())
    }

    async fn subscribe_child_added(&self, namespace: &NamespaceRef) -> Result<ChildStream, BackendError> {
        let mut state = self.state();
        if state.faults.subscriptions {
            return Err(BackendError::Transport("subscribe refused (fault injected)".into()));
        }

        // Replay and registration happen under one lock, so no write can
        // slip between history and live delivery.
        let (tx, stream) = ChildStream::channel();
        let log = state.namespaces.entry(namespace.name().to_string()).or_default();
        for entry in &log.entries {
            let _ = tx.send(Ok(entry.clone()));
        }
        log.subscribers.push(tx);
        Ok(stream)
    }

    async fn upload_object(&self, object_key: &str, data: Bytes) -> Result<UploadResult, BackendError> {
        let mut state = self.state();
        if state.faults.uploads {
            return Err(BackendError::Transport("upload refused (fault injected)".into()));
        }

        let result = UploadResult {
            object_key: object_key.to_string(),
            size: data.len() as u64,
            sha256: hex::encode(Sha256::digest(&data)),
        };
        state.objects.insert(object_key.to_string(), data);
        Ok(result)
    }

    async fn resolve_public_url(&self, object_key: &str) -> Result<String, BackendError> {
        let state = self.state();
        if state.faults.url_resolution {
            return Err(BackendError::Transport("URL lookup refused (fault injected)".into()));
        }
        if !state.objects.contains_key(object_key) {
            return Err(BackendError::NotFound(object_key.to_string()));
        }

        let mut url = url::Url::parse(&format!("{}/", self.inner.public_base))
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Decode("public base cannot hold a path".into()))?
            .pop_if_empty()
            .push(object_key);
        Ok(url.to_string())
    }
}
