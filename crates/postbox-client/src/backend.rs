//! The seam between the client core and whatever realtime backend sits
//! behind it.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use postbox_types::api::UploadResult;
use postbox_types::{Entry, EntryValue};

use crate::error::BackendError;

/// A named append-only collection of entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceRef {
    name: String,
}

impl NamespaceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NamespaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Location of a single entry: a namespace plus a freshly generated key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryRef {
    namespace: NamespaceRef,
    key: String,
}

impl EntryRef {
    pub fn new(namespace: NamespaceRef, key: impl Into<String>) -> Self {
        Self {
            namespace,
            key: key.into(),
        }
    }

    pub fn namespace(&self) -> &NamespaceRef {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

pub type ChildItem = Result<Entry, BackendError>;

/// Child-added events for one namespace: every existing child, then every
/// new one, in backend append order.
///
/// The stream ends with `None` when the backend closes it, or yields one
/// `Err` first when it fails. Dropping it detaches from the backend.
pub struct ChildStream {
    rx: mpsc::UnboundedReceiver<ChildItem>,
    feeder: Option<AbortHandle>,
}

impl ChildStream {
    /// A stream fed through `rx`. `feeder`, if given, is aborted when the
    /// stream is dropped.
    pub fn new(rx: mpsc::UnboundedReceiver<ChildItem>, feeder: Option<AbortHandle>) -> Self {
        Self { rx, feeder }
    }

    /// A connected sender/stream pair with no feeder task.
    pub fn channel() -> (mpsc::UnboundedSender<ChildItem>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, None))
    }

    pub async fn next(&mut self) -> Option<ChildItem> {
        self.rx.recv().await
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

/// A realtime append-only keyed store plus blob storage.
///
/// Implementations are constructed explicitly and shared by reference (or
/// `Arc`); nothing here is a process-wide singleton.
pub trait Backend: Send + Sync + 'static {
    /// Reference to the namespace called `name`.
    fn namespace_ref(&self, name: &str) -> NamespaceRef {
        NamespaceRef::new(name)
    }

    /// Allocate a new, globally unique key under `namespace`. Keys sort in
    /// the order they were generated by this backend instance.
    fn generate_key(&self, namespace: &NamespaceRef) -> EntryRef;

    /// Store `value` at `entry`.
    fn write(
        &self,
        entry: &EntryRef,
        value: EntryValue,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Replay every existing child of `namespace`, then stream new ones.
    fn subscribe_child_added(
        &self,
        namespace: &NamespaceRef,
    ) -> impl Future<Output = Result<ChildStream, BackendError>> + Send;

    /// Store `data` under `object_key`, replacing any earlier object.
    fn upload_object(
        &self,
        object_key: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<UploadResult, BackendError>> + Send;

    /// Publicly fetchable URL of a stored object.
    fn resolve_public_url(
        &self,
        object_key: &str,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;
}
