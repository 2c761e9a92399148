//! Publishing locally authored values to the backend.
//!
//! Text goes straight into a stream. Files are uploaded first, then a post
//! pointing at the uploaded object is written to a separate stream. Neither
//! path touches a mirror; submitted values show up locally only once the
//! backend echoes them through a subscription.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use postbox_types::{EntryValue, ImagePost};
use postbox_types::api::UploadResult;

use crate::backend::{Backend, EntryRef, NamespaceRef};
use crate::error::SubmitError;

/// A file picked for upload. The name doubles as the storage object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, named after its final path component.
    pub async fn from_path(path: &Path) -> Result<Self, SubmitError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, bytes))
    }
}

/// A value waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSubmission {
    Text { value: String },
    File(SelectedFile),
}

/// A post that made it through every stage of the file pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub entry: EntryRef,
    pub post: ImagePost,
    pub upload: UploadResult,
}

/// What a dispatched submission produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Key allocated for a text message; the write itself is in flight.
    Text(EntryRef),
    Post(PublishedPost),
}

/// Streams submissions are published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub messages: NamespaceRef,
    pub posts: NamespaceRef,
}

type QueuedWrite = (EntryRef, EntryValue);

pub struct SubmissionGateway<B> {
    backend: Arc<B>,
    /// Text writes, drained in submission order by one writer task. Shared
    /// by every clone and started on first use.
    writes: Arc<OnceLock<mpsc::UnboundedSender<QueuedWrite>>>,
}

impl<B> Clone for SubmissionGateway<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            writes: self.writes.clone(),
        }
    }
}

impl<B: Backend> SubmissionGateway<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            writes: Arc::new(OnceLock::new()),
        }
    }

    /// Publish `text` under a fresh key in `stream`, fire-and-forget.
    ///
    /// Returns the allocated location at once. Writes are queued and
    /// committed one at a time, so texts from one gateway reach the backend
    /// in the order they were submitted. A failure is logged and not
    /// retried. Empty text is published like any other. Must be called from
    /// within a tokio runtime.
    pub fn submit_text(&self, stream: &NamespaceRef, text: impl Into<String>) -> EntryRef {
        let entry = self.backend.generate_key(stream);
        let value = EntryValue::Text(text.into());

        let writes = self
            .writes
            .get_or_init(|| spawn_writer(self.backend.clone()));
        if writes.send((entry.clone(), value)).is_err() {
            warn!("Writer task is gone, dropping write to {}", entry);
        }

        entry
    }

    /// Upload `file`, resolve its public URL and publish
    /// `{imageLink: url, text: name}` under a fresh key in `posts`.
    ///
    /// Stages run strictly in that order and the first failure is returned,
    /// tagged with the stage it happened in.
    pub async fn submit_file(&self, posts: &NamespaceRef, file: SelectedFile) -> Result<PublishedPost, SubmitError> {
        if file.name.is_empty() {
            return Err(SubmitError::EmptyFileName);
        }
        let SelectedFile { name, bytes } = file;

        let upload = self
            .backend
            .upload_object(&name, bytes)
            .await
            .map_err(SubmitError::Upload)?;

        let image_link = self
            .backend
            .resolve_public_url(&name)
            .await
            .map_err(SubmitError::ResolveUrl)?;

        let entry = self.backend.generate_key(posts);
        let post = ImagePost {
            image_link,
            text: name,
        };
        self.backend
            .write(&entry, post.clone().into())
            .await
            .map_err(SubmitError::Write)?;

        info!("Published post {} ({} bytes)", entry, upload.size);
        Ok(PublishedPost {
            entry,
            post,
            upload,
        })
    }

    /// Route a pending submission to the matching path.
    pub async fn dispatch(&self, pending: PendingSubmission, targets: &Targets) -> Result<Dispatched, SubmitError> {
        match pending {
            PendingSubmission::Text { value } => Ok(Dispatched::Text(self.submit_text(&targets.messages, value))),
            PendingSubmission::File(file) => Ok(Dispatched::Post(self.submit_file(&targets.posts, file).await?)),
        }
    }
}

/// Start the task that commits queued text writes in order. It exits once
/// every gateway clone holding the sender is dropped.
fn spawn_writer<B: Backend>(backend: Arc<B>) -> mpsc::UnboundedSender<QueuedWrite> {
    let (tx, mut rx) = mpsc::unbounded_channel::<QueuedWrite>();
    tokio::spawn(async move {
        while let Some((entry, value)) = rx.recv().await {
            match backend.write(&entry, value).await {
                Ok(()) => debug!("Wrote {}", entry),
                Err(e) => warn!("Write to {} failed: {}", entry, e),
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Faults, MemoryBackend};

    fn gateway(public_base: &str) -> (MemoryBackend, SubmissionGateway<MemoryBackend>) {
        let backend = MemoryBackend::with_public_base(public_base);
        let gateway = SubmissionGateway::new(Arc::new(backend.clone()));
        (backend, gateway)
    }

    #[tokio::test]
    async fn file_pipeline_publishes_the_exact_record() {
        let (backend, gateway) = gateway("https://x");
        let posts = NamespaceRef::new("posts");

        let published = gateway
            .submit_file(&posts, SelectedFile::new("y.png", &b"fake png"[..]))
            .await
            .unwrap();

        assert_eq!(
            published.post,
            ImagePost {
                image_link: "https://x/y.png".into(),
                text: "y.png".into(),
            }
        );
        assert_eq!(backend.object("y.png").unwrap(), Bytes::from_static(b"fake png"));

        let stored = backend.entries("posts");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key, published.entry.key());
        assert_eq!(stored[0].value, EntryValue::image_post("https://x/y.png", "y.png"));
        assert!(backend.entries("messages").is_empty());
    }

    #[tokio::test]
    async fn empty_file_name_is_rejected_before_upload() {
        let (backend, gateway) = gateway("https://x");
        let err = gateway
            .submit_file(&NamespaceRef::new("posts"), SelectedFile::new("", &b"data"[..]))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::EmptyFileName));
        assert!(backend.object("").is_none());
    }

    #[tokio::test]
    async fn each_stage_reports_its_own_failure() {
        let (backend, gateway) = gateway("https://x");
        let posts = NamespaceRef::new("posts");

        backend.set_faults(Faults { uploads: true, ..Faults::default() });
        let err = gateway.submit_file(&posts, SelectedFile::new("a.png", &b"1"[..])).await.unwrap_err();
        assert!(matches!(err, SubmitError::Upload(_)));

        backend.set_faults(Faults { url_resolution: true, ..Faults::default() });
        let err = gateway.submit_file(&posts, SelectedFile::new("b.png", &b"2"[..])).await.unwrap_err();
        assert!(matches!(err, SubmitError::ResolveUrl(_)));

        backend.set_faults(Faults { writes: true, ..Faults::default() });
        let err = gateway.submit_file(&posts, SelectedFile::new("c.png", &b"3"[..])).await.unwrap_err();
        assert!(matches!(err, SubmitError::Write(_)));

        assert!(backend.entries("posts").is_empty());
    }

    #[tokio::test]
    async fn same_name_overwrites_the_object_but_adds_a_post() {
        let (backend, gateway) = gateway("https://x");
        let posts = NamespaceRef::new("posts");

        gateway.submit_file(&posts, SelectedFile::new("cat.jpg", &b"old"[..])).await.unwrap();
        gateway.submit_file(&posts, SelectedFile::new("cat.jpg", &b"new"[..])).await.unwrap();

        assert_eq!(backend.object("cat.jpg").unwrap(), Bytes::from_static(b"new"));
        assert_eq!(backend.entries("posts").len(), 2);
    }

    #[tokio::test]
    async fn concurrent_file_submissions_are_independent() {
        let (backend, gateway) = gateway("https://x");
        let posts = NamespaceRef::new("posts");

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let gateway = gateway.clone();
                let posts = posts.clone();
                tokio::spawn(async move {
                    gateway
                        .submit_file(&posts, SelectedFile::new(format!("img-{}.png", i), vec![i as u8]))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(backend.entries("posts").len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn text_from_cloned_gateways_is_written_in_submission_order() {
        let (backend, gateway) = gateway("https://x");
        let messages = NamespaceRef::new("messages");
        let other = gateway.clone();

        let mut sent = Vec::new();
        for i in 0..200 {
            let target = if i % 2 == 0 { &gateway } else { &other };
            sent.push(target.submit_text(&messages, format!("m{}", i)).key().to_string());
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while backend.entries("messages").len() < sent.len() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stored: Vec<String> = backend.entries("messages").into_iter().map(|e| e.key).collect();
        assert_eq!(stored, sent);
    }

    #[tokio::test]
    async fn dispatch_routes_text_and_files() {
        let (backend, gateway) = gateway("https://x");
        let targets = Targets {
            messages: NamespaceRef::new("messages"),
            posts: NamespaceRef::new("posts"),
        };

        let text = gateway
            .dispatch(PendingSubmission::Text { value: "hi".into() }, &targets)
            .await
            .unwrap();
        let Dispatched::Text(entry) = text else { panic!("expected text dispatch") };
        assert_eq!(entry.namespace(), &targets.messages);

        let post = gateway
            .dispatch(PendingSubmission::File(SelectedFile::new("z.gif", &b"gif"[..])), &targets)
            .await
            .unwrap();
        assert!(matches!(post, Dispatched::Post(_)));
        assert_eq!(backend.entries("posts").len(), 1);
    }
}
