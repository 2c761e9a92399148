use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use url::Url;

use postbox_api::AppStateInner;
use postbox_db::Database;
use postbox_gateway::Dispatcher;
use postbox_storage::Storage;

/// 50 MB upload limit for objects
const DEFAULT_MAX_OBJECT_BYTES: usize = 50 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postbox=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("POSTBOX_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("POSTBOX_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let db_path: PathBuf = std::env::var("POSTBOX_DB_PATH")
        .unwrap_or_else(|_| "postbox.db".into())
        .into();
    let storage_dir: PathBuf = std::env::var("POSTBOX_STORAGE_DIR")
        .unwrap_or_else(|_| "./object-storage".into())
        .into();
    let public_url: Url = std::env::var("POSTBOX_PUBLIC_URL")
        .unwrap_or_else(|_| format!("http://localhost:{}", port))
        .parse()?;
    let max_object_bytes: usize = std::env::var("POSTBOX_MAX_OBJECT_BYTES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_OBJECT_BYTES);

    // Init store, storage and fan-out
    let db = Arc::new(Database::open(&db_path)?);
    let storage = Storage::new(storage_dir).await?;
    let dispatcher = Dispatcher::new(db);

    let state = Arc::new(AppStateInner {
        dispatcher,
        storage,
        public_url: public_url.clone(),
        max_object_bytes,
    });

    let app = postbox_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Postbox listening on {} (public URL {})", addr, public_url);
    info!("Object size limit: {} bytes", max_object_bytes);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
