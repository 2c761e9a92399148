//! HTTP surface of the realtime backend: entry writes and listings, the
//! child-added WebSocket, and object storage.

pub mod db;
pub mod storage;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, put},
};
use url::Url;

use postbox_db::Database;
use postbox_gateway::Dispatcher;
use postbox_storage::Storage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub dispatcher: Dispatcher,
    pub storage: Storage,
    /// Base URL clients reach this server on; public object URLs hang off it.
    pub public_url: Url,
    pub max_object_bytes: usize,
}

impl AppStateInner {
    pub fn db(&self) -> &Arc<Database> {
        self.dispatcher.db()
    }

    /// Publicly fetchable URL of an object. Each segment is percent-encoded,
    /// so object keys may contain any character.
    pub fn object_url(&self, bucket: &str, object_key: &str) -> Option<Url> {
        let mut url = self.public_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(["storage", bucket, object_key]);
        Some(url)
    }
}

/// Logical key of an object inside the shared storage directory.
pub(crate) fn storage_key(bucket: &str, object_key: &str) -> String {
    format!("{}/{}", bucket, object_key)
}

pub fn router(state: AppState) -> Router {
    let max_object_bytes = state.max_object_bytes;

    let db_routes = Router::new()
        .route("/db/{namespace}", get(db::list_entries))
        .route("/db/{namespace}/{key}", put(db::write_entry))
        .route("/subscribe/{namespace}", get(db::subscribe));

    let storage_routes = Router::new()
        .route(
            "/storage/{bucket}/{object_key}",
            put(storage::upload_object).get(storage::download_object),
        )
        .route("/storage/{bucket}/{object_key}/url", get(storage::object_url))
        .layer(DefaultBodyLimit::max(max_object_bytes));

    Router::new()
        .merge(db_routes)
        .merge(storage_routes)
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
