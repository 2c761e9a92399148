use axum::{
    Json,
    extract::{Path, State, WebSocketUpgrade, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, error, warn};

use postbox_db::AppendOutcome;
use postbox_gateway::connection::handle_stream_socket;
use postbox_types::EntryValue;
use postbox_types::api::{EntryResponse, WriteResponse};
use postbox_types::models::is_valid_key;

use crate::AppState;

/// PUT /db/{namespace}/{key}: store a value under a client-generated key.
/// Entries are append-only: a key that already exists yields 409.
pub async fn write_entry(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
    payload: Result<Json<EntryValue>, JsonRejection>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_key(&namespace) || !is_valid_key(&key) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let Json(value) = payload.map_err(|e| {
        debug!("Rejected value for {}/{}: {}", namespace, key, e);
        StatusCode::BAD_REQUEST
    })?;

    let outcome = state.dispatcher.append(&namespace, &key, value).await.map_err(|e| {
        error!("Append {}/{} failed: {:#}", namespace, key, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match outcome {
        AppendOutcome::Appended(seq) => Ok((StatusCode::CREATED, Json(WriteResponse { key, seq }))),
        AppendOutcome::Duplicate => {
            warn!("Write to existing key {}/{} refused", namespace, key);
            Err(StatusCode::CONFLICT)
        }
    }
}

/// GET /db/{namespace}: every entry of the namespace in commit order.
pub async fn list_entries(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_key(&namespace) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db().clone();
    let rows = tokio::task::spawn_blocking(move || db.list_entries(&namespace))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB list_entries error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let entries: Vec<EntryResponse> = rows
        .iter()
        .filter_map(|row| {
            row.to_response()
                .map_err(|e| warn!("Skipping unreadable entry: {:#}", e))
                .ok()
        })
        .collect();

    Ok(Json(entries))
}

/// GET /subscribe/{namespace}: WebSocket stream of child-added events.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_key(&namespace) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| handle_stream_socket(socket, dispatcher, namespace)))
}
