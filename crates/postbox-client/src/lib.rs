//! Client core for Postbox chat: mirroring remote child streams locally and
//! publishing text messages and image posts.
//!
//! Everything talks to the backend through the [`Backend`] trait.
//! [`RemoteBackend`] reaches a Postbox server; [`MemoryBackend`] keeps the
//! same semantics in process.

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod mirror;
pub mod remote;
pub mod widget;

pub use backend::{Backend, ChildStream, EntryRef, NamespaceRef};
pub use config::BackendConfig;
pub use error::{BackendError, ConfigError, SubmitError};
pub use gateway::{Dispatched, PendingSubmission, PublishedPost, SelectedFile, SubmissionGateway, Targets};
pub use memory::{Faults, MemoryBackend};
pub use mirror::{StreamMirror, SubscriptionHandle, SubscriptionState};
pub use remote::RemoteBackend;
pub use widget::{ChangeFeed, ChatWidget, ListItem, WidgetConfig};
