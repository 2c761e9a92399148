//! Child-added fan-out for the append-only store.
//!
//! `dispatcher` owns the commit-then-broadcast path and hands out
//! replay-then-live subscriptions; `connection` serves one subscription over
//! a WebSocket.

pub mod connection;
pub mod dispatcher;

pub use dispatcher::{ChildSubscription, Dispatcher};
