use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use postbox_types::StreamEvent;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serve one child-added subscription for `namespace` over `socket`.
///
/// The client only listens; anything it sends apart from Pong and Close is
/// ignored.
pub async fn handle_stream_socket(socket: WebSocket, dispatcher: Dispatcher, namespace: String) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = match dispatcher.subscribe_child_added(&namespace).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!("[{}] subscribe to '{}' failed: {:#}", conn_id, namespace, e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!(
        "[{}] subscribed to '{}' ({} live subscribers)",
        conn_id,
        namespace,
        dispatcher.subscriber_count()
    );

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward children -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                child = subscription.next() => {
                    let Some(child) = child else { break };
                    let text = match serde_json::to_string(&StreamEvent::ChildAdded(child)) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("[{}] failed to encode child: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("[{}] heartbeat timeout (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Watch the client side for liveness and close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("[{}] unsubscribed from '{}'", conn_id, namespace);
}
