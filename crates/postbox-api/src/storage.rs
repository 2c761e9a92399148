use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use postbox_types::api::{PublicUrlResponse, UploadResult};
use postbox_types::models::is_valid_key;

use crate::{AppState, storage_key};

/// PUT /storage/{bucket}/{object_key}: raw object bytes. The object key is
/// used verbatim; uploading to an existing key replaces it.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, object_key)): Path<(String, String)>,
    bytes: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_key(&bucket) || object_key.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if bytes.len() > state.max_object_bytes {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let key = storage_key(&bucket, &object_key);
    let stored = state.storage.put_object(&key, &bytes).await.map_err(|e| {
        error!("Failed to store object '{}': {:#}", key, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let db = state.db().clone();
    let meta = stored.clone();
    let meta_key = key.clone();
    tokio::task::spawn_blocking(move || {
        db.upsert_object(&meta_key, &meta.file_name, meta.size as i64, &meta.sha256)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("DB upsert_object error: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!("Stored object '{}' ({} bytes)", key, stored.size);

    Ok((
        StatusCode::CREATED,
        Json(UploadResult {
            object_key,
            size: stored.size,
            sha256: stored.sha256,
        }),
    ))
}

/// GET /storage/{bucket}/{object_key}: stream the object back.
pub async fn download_object(
    State(state): State<AppState>,
    Path((bucket, object_key)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let key = storage_key(&bucket, &object_key);
    let file = state
        .storage
        .open_object(&key)
        .await
        .map_err(|e| {
            error!("Failed to open object '{}': {:#}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok((
        [(header::CONTENT_TYPE, content_type_for(&object_key))],
        Body::from_stream(ReaderStream::new(file)),
    ))
}

/// GET /storage/{bucket}/{object_key}/url: public URL of a stored object.
pub async fn object_url(
    State(state): State<AppState>,
    Path((bucket, object_key)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let key = storage_key(&bucket, &object_key);
    let exists = state.storage.exists(&key).await.map_err(|e| {
        error!("Failed to stat object '{}': {:#}", key, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if !exists {
        return Err(StatusCode::NOT_FOUND);
    }

    let url = state
        .object_url(&bucket, &object_key)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(PublicUrlResponse { url: url.to_string() }))
}

/// Content type from the object key's extension, for inline display.
fn content_type_for(object_key: &str) -> &'static str {
    let ext = object_key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::content_type_for;

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("y.png"), "image/png");
        assert_eq!(content_type_for("Holiday.JPG"), "image/jpeg");
        assert_eq!(content_type_for("notes"), "application/octet-stream");
    }
}
