use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use postbox_client::{
    BackendConfig, ChatWidget, ListItem, RemoteBackend, SelectedFile, SubscriptionState, WidgetConfig,
};

const HELP: &str = "Type a message and press enter to send it.
  /file <path>   select a file to upload
  /upload        upload the selected file as a post
  /quit          exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postbox_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let backend_config = BackendConfig::from_env()?;
    let widget_config = widget_config_from_env();
    info!("Backend: {:?}", backend_config);
    info!("Widget: {:?}", widget_config);

    let backend = Arc::new(RemoteBackend::new(backend_config)?);
    let mut widget = ChatWidget::new(backend, widget_config);
    widget.mount().await?;

    println!("{}", HELP);
    let mut feed = widget.change_feed();
    let mut shown: Vec<ListItem> = Vec::new();
    print_rows(&widget.render(), &mut shown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut widget, line.trim_end()).await {
                    break;
                }
            }
            _ = feed.changed() => {
                print_rows(&widget.render(), &mut shown);
                for (stream, state) in widget.stream_states() {
                    if !matches!(state, SubscriptionState::Live) {
                        warn!("Stream '{}' is no longer live: {:?}", stream, state);
                    }
                }
            }
        }
    }

    widget.unmount();
    info!("Bye");
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(widget: &mut ChatWidget<RemoteBackend>, line: &str) -> bool {
    if line == "/quit" {
        return false;
    }

    if line == "/upload" {
        match widget.upload().await {
            Ok(published) => println!("posted {} -> {}", published.post.text, published.post.image_link),
            Err(e) => error!("Upload failed: {}", e),
        }
    } else if let Some(path) = line.strip_prefix("/file ") {
        match SelectedFile::from_path(Path::new(path.trim())).await {
            Ok(file) => {
                println!("selected {} ({} bytes)", file.name, file.bytes.len());
                widget.handle_file_change(Some(file));
            }
            Err(e) => error!("Cannot select {}: {}", path, e),
        }
    } else if line.starts_with('/') {
        println!("{}", HELP);
    } else {
        widget.handle_text_change(line);
        let entry = widget.send();
        debug!("Sending {}", entry);
    }
    true
}

/// Print rows not shown yet. If earlier rows changed (a stream was rebuilt
/// or an earlier stream grew), the whole list is printed again.
fn print_rows(rows: &[ListItem], shown: &mut Vec<ListItem>) {
    let start = if rows.len() >= shown.len() && rows[..shown.len()] == shown[..] {
        shown.len()
    } else {
        println!("----");
        0
    };

    for row in &rows[start..] {
        match &row.image_link {
            Some(link) => println!("[{}] {} <{}>", row.stream, row.label, link),
            None => println!("[{}] {}", row.stream, row.label),
        }
    }
    *shown = rows.to_vec();
}

fn widget_config_from_env() -> WidgetConfig {
    let mut config = WidgetConfig::default();

    if let Ok(streams) = std::env::var("POSTBOX_CHAT_STREAMS") {
        let streams: Vec<String> = streams
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !streams.is_empty() {
            config.rendered_streams = streams;
        }
    }
    if let Some(clear) = env_flag("POSTBOX_CHAT_CLEAR_TEXT") {
        config.clear_text_after_send = clear;
    }
    if let Some(uploads) = env_flag("POSTBOX_CHAT_UPLOADS") {
        config.file_upload_enabled = uploads;
    }
    config
}

fn env_flag(var: &str) -> Option<bool> {
    let value = std::env::var(var).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("Ignoring {}={:?}", var, value);
            None
        }
    }
}
