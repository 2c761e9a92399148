//! Shared wire and domain types for Postbox.
//!
//! Everything that crosses the client/server boundary lives here so the
//! store, the fan-out gateway and the client backends agree on one shape.

pub mod api;
pub mod events;
pub mod models;
pub mod push_id;

pub use events::{ChildAdded, StreamEvent};
pub use models::{Entry, EntryValue, ImagePost};
pub use push_id::PushIdGenerator;
