//! The chat widget: text form, file form and the rendered entry list.
//!
//! Form behavior is configurable because the two known variants of the
//! widget disagree: one supports uploads and leaves the text box alone after
//! sending, the other has no uploads and clears it.

use std::sync::Arc;

use futures_util::future::select_all;
use tokio::sync::watch;
use tracing::info;

use postbox_types::EntryValue;

use crate::backend::{Backend, EntryRef, NamespaceRef};
use crate::error::{BackendError, SubmitError};
use crate::gateway::{PendingSubmission, PublishedPost, SelectedFile, SubmissionGateway, Targets};
use crate::mirror::{StreamMirror, SubscriptionHandle, SubscriptionState};

pub const DEFAULT_MESSAGES_STREAM: &str = "messages";
pub const DEFAULT_POSTS_STREAM: &str = "posts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetConfig {
    /// Stream text messages are written to.
    pub messages_stream: String,
    /// Stream image posts are written to.
    pub posts_stream: String,
    /// Streams mirrored and rendered, in display order.
    pub rendered_streams: Vec<String>,
    pub file_upload_enabled: bool,
    pub clear_text_after_send: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            messages_stream: DEFAULT_MESSAGES_STREAM.to_string(),
            posts_stream: DEFAULT_POSTS_STREAM.to_string(),
            rendered_streams: vec![DEFAULT_MESSAGES_STREAM.to_string()],
            file_upload_enabled: true,
            clear_text_after_send: false,
        }
    }
}

impl WidgetConfig {
    /// The text-only variant: no file form, text box cleared after send.
    pub fn text_only() -> Self {
        Self {
            file_upload_enabled: false,
            clear_text_after_send: true,
            ..Self::default()
        }
    }
}

/// One rendered list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub stream: String,
    pub key: String,
    pub label: String,
    pub image_link: Option<String>,
}

impl ListItem {
    fn from_entry(stream: &str, key: String, value: EntryValue) -> Self {
        match value {
            EntryValue::Text(label) => Self {
                stream: stream.to_string(),
                key,
                label,
                image_link: None,
            },
            EntryValue::ImagePost(post) => Self {
                stream: stream.to_string(),
                key,
                label: post.text,
                image_link: Some(post.image_link),
            },
        }
    }
}

struct MountedStream {
    mirror: StreamMirror,
    handle: Option<SubscriptionHandle>,
}

pub struct ChatWidget<B: Backend> {
    backend: Arc<B>,
    config: WidgetConfig,
    gateway: SubmissionGateway<B>,
    targets: Targets,
    streams: Vec<MountedStream>,
    text_input: String,
    file_selection: Option<SelectedFile>,
}

impl<B: Backend> ChatWidget<B> {
    pub fn new(backend: Arc<B>, config: WidgetConfig) -> Self {
        let targets = Targets {
            messages: backend.namespace_ref(&config.messages_stream),
            posts: backend.namespace_ref(&config.posts_stream),
        };
        let streams = config
            .rendered_streams
            .iter()
            .map(|name| MountedStream {
                mirror: StreamMirror::new(backend.namespace_ref(name)),
                handle: None,
            })
            .collect();

        Self {
            gateway: SubmissionGateway::new(backend.clone()),
            backend,
            config,
            targets,
            streams,
            text_input: String::new(),
            file_selection: None,
        }
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    /// Subscribe every rendered stream. Each mirror rebuilds its list from
    /// the backend's full history.
    pub async fn mount(&mut self) -> Result<(), BackendError> {
        for stream in &mut self.streams {
            if let Some(old) = stream.handle.take() {
                stream.mirror.unsubscribe(old);
            }
            stream.handle = Some(stream.mirror.subscribe(self.backend.as_ref()).await?);
        }
        info!("Chat widget mounted ({} streams)", self.streams.len());
        Ok(())
    }

    /// Detach every subscription. Rendered content stays as it was.
    pub fn unmount(&mut self) {
        for stream in &mut self.streams {
            if let Some(handle) = stream.handle.take() {
                stream.mirror.unsubscribe(handle);
            }
        }
    }

    pub fn handle_text_change(&mut self, text: impl Into<String>) {
        self.text_input = text.into();
    }

    pub fn handle_file_change(&mut self, file: Option<SelectedFile>) {
        self.file_selection = file;
    }

    pub fn text_input(&self) -> &str {
        &self.text_input
    }

    pub fn file_selection(&self) -> Option<&SelectedFile> {
        self.file_selection.as_ref()
    }

    /// The text form's pending submission.
    pub fn pending_text(&self) -> PendingSubmission {
        PendingSubmission::Text {
            value: self.text_input.clone(),
        }
    }

    /// Send the text box content to the messages stream. The text is not
    /// validated; an empty box sends an empty message.
    pub fn send(&mut self) -> EntryRef {
        let entry = self.gateway.submit_text(&self.targets.messages, self.text_input.clone());
        if self.config.clear_text_after_send {
            self.text_input.clear();
        }
        entry
    }

    /// Upload the selected file and publish it to the posts stream. On
    /// success both the file selection and the text box are cleared; on
    /// failure they are left as they were.
    pub async fn upload(&mut self) -> Result<PublishedPost, SubmitError> {
        if !self.config.file_upload_enabled {
            return Err(SubmitError::UploadDisabled);
        }
        let file = self.file_selection.clone().ok_or(SubmitError::NoFileSelected)?;

        let published = self.gateway.submit_file(&self.targets.posts, file).await?;

        self.file_selection = None;
        self.text_input.clear();
        Ok(published)
    }

    /// Rows of every rendered stream, stream by stream in configured order,
    /// each in arrival order.
    pub fn render(&self) -> Vec<ListItem> {
        self.streams
            .iter()
            .flat_map(|stream| {
                let name = stream.mirror.namespace().name().to_string();
                stream
                    .mirror
                    .entries()
                    .into_iter()
                    .map(move |entry| ListItem::from_entry(&name, entry.key, entry.value))
            })
            .collect()
    }

    pub fn mirror(&self, stream: &str) -> Option<&StreamMirror> {
        self.streams
            .iter()
            .map(|s| &s.mirror)
            .find(|m| m.namespace() == &NamespaceRef::new(stream))
    }

    /// Subscription state of each rendered stream.
    pub fn stream_states(&self) -> Vec<(String, SubscriptionState)> {
        self.streams
            .iter()
            .map(|s| (s.mirror.namespace().name().to_string(), s.mirror.state()))
            .collect()
    }

    /// Notifications for re-rendering, independent of the widget borrow.
    pub fn change_feed(&self) -> ChangeFeed {
        ChangeFeed {
            receivers: self.streams.iter().map(|s| s.mirror.changes()).collect(),
        }
    }
}

/// Wakes whenever any rendered stream changes.
pub struct ChangeFeed {
    receivers: Vec<watch::Receiver<u64>>,
}

impl ChangeFeed {
    /// Wait for the next change. Returns false once no stream can change
    /// any more.
    pub async fn changed(&mut self) -> bool {
        if self.receivers.is_empty() {
            return std::future::pending().await;
        }
        let waits = self.receivers.iter_mut().map(|rx| Box::pin(rx.changed()));
        let (result, _, _) = select_all(waits).await;
        result.is_ok()
    }
}
