//! RemoteBackend against a real server bound to a loopback port.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use postbox_api::AppStateInner;
use postbox_client::config::{DATABASE_URL_VAR, STORAGE_BUCKET_VAR};
use postbox_client::{
    Backend, BackendConfig, BackendError, ChatWidget, RemoteBackend, SelectedFile, StreamMirror, WidgetConfig,
};
use postbox_db::Database;
use postbox_gateway::Dispatcher;
use postbox_storage::Storage;
use postbox_types::EntryValue;

/// Start a server on 127.0.0.1 and return its base URL.
async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let dir = std::env::temp_dir().join(format!("postbox_client_test_{}", uuid::Uuid::new_v4()));

    let state = Arc::new(AppStateInner {
        dispatcher: Dispatcher::new(Arc::new(Database::open_in_memory().unwrap())),
        storage: Storage::new(dir).await.unwrap(),
        public_url: base.parse().unwrap(),
        max_object_bytes: 1024 * 1024,
    });
    let app = postbox_api::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

fn remote(base: &str) -> RemoteBackend {
    let config = BackendConfig::from_lookup(|var| match var {
        DATABASE_URL_VAR => Some(base.to_string()),
        STORAGE_BUCKET_VAR => Some("images".to_string()),
        _ => None,
    })
    .unwrap();
    RemoteBackend::new(config).unwrap()
}

async fn wait_for_len(mirror: &StreamMirror, len: usize) {
    let mut changes = mirror.changes();
    tokio::time::timeout(Duration::from_secs(5), async {
        while mirror.len() < len {
            changes.changed().await.unwrap();
        }
    })
    .await
    .expect("timed out waiting for the mirror");
}

#[tokio::test]
async fn history_is_replayed_before_live_children() {
    let base = spawn_server().await;
    let backend = remote(&base);
    let messages = backend.namespace_ref("messages");

    let mut written = Vec::new();
    for i in 0..3 {
        let entry = backend.generate_key(&messages);
        backend.write(&entry, EntryValue::text(format!("m{}", i))).await.unwrap();
        written.push(entry.key().to_string());
    }

    let mirror = StreamMirror::new(messages.clone());
    let handle = mirror.subscribe(&backend).await.unwrap();

    for i in 3..5 {
        let entry = backend.generate_key(&messages);
        backend.write(&entry, EntryValue::text(format!("m{}", i))).await.unwrap();
        written.push(entry.key().to_string());
    }

    wait_for_len(&mirror, 5).await;
    let keys: Vec<String> = mirror.entries().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, written);
    assert_eq!(mirror.entries()[4].value, EntryValue::text("m4"));
    mirror.unsubscribe(handle);
}

#[tokio::test]
async fn rewriting_a_key_is_a_conflict() {
    let base = spawn_server().await;
    let backend = remote(&base);
    let entry = backend.generate_key(&backend.namespace_ref("messages"));

    backend.write(&entry, EntryValue::text("first")).await.unwrap();
    let err = backend.write(&entry, EntryValue::text("second")).await.unwrap_err();
    assert!(matches!(err, BackendError::Conflict(key) if key == entry.key()));
}

#[tokio::test]
async fn unknown_object_has_no_public_url() {
    let base = spawn_server().await;
    let backend = remote(&base);

    let err = backend.resolve_public_url("missing.png").await.unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)));
}

#[tokio::test]
async fn chat_round_trip_over_the_network() {
    let base = spawn_server().await;
    let config = WidgetConfig {
        rendered_streams: vec!["messages".into(), "posts".into()],
        ..WidgetConfig::default()
    };
    let mut widget = ChatWidget::new(Arc::new(remote(&base)), config);
    widget.mount().await.unwrap();

    widget.handle_text_change("hello");
    widget.send();

    widget.handle_file_change(Some(SelectedFile::new("my cat.png", &b"meow"[..])));
    let published = widget.upload().await.unwrap();

    let expected_link = format!("{}/storage/images/my%20cat.png", base);
    assert_eq!(published.post.image_link, expected_link);
    assert_eq!(published.post.text, "my cat.png");
    assert_eq!(published.upload.size, 4);

    let body = reqwest::get(&expected_link).await.unwrap().bytes().await.unwrap();
    assert_eq!(&body[..], b"meow");

    let mut feed = widget.change_feed();
    let rows = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let rows = widget.render();
            if rows.len() == 2 {
                return rows;
            }
            feed.changed().await;
        }
    })
    .await
    .expect("timed out waiting for both rows");

    assert_eq!(rows[0].label, "hello");
    assert_eq!(rows[0].image_link, None);
    assert_eq!(rows[1].label, "my cat.png");
    assert_eq!(rows[1].image_link.as_deref(), Some(expected_link.as_str()));

    widget.unmount();
}
