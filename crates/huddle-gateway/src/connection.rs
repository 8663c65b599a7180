use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use huddle_types::models::UserPublic;

use crate::error::HubError;
use crate::gateway::Gateway;
use crate::validate;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Run a WebSocket for an identity the HTTP upgrade layer already verified.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user: UserPublic) {
    let (handle, mut outbound) = match gateway.connect(user.clone()).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!("{} ({}) refused at connect: {}", user.name, user.id, e);
            return;
        }
    };
    let (mut sender, mut receiver) = socket.split();

    // Set by the reader on pong, cleared by the writer on each ping
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Single writer: drains the outbound queue in order, with heartbeat
    let writer_name = handle.user.name.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    // Closed queue: disconnected or evicted as a slow consumer.
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode event for {}: {}", writer_name, e);
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
                            warn!("Heartbeat timeout for {} (missed {} pongs), dropping connection", writer_name, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    // Read commands from client
    let reader_gateway = gateway.clone();
    let reader_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    reader_gateway.dispatch_text(&reader_handle, text.as_str()).await;
                }
                Message::Binary(data) => {
                    debug!("{} sent a binary frame of {} bytes", reader_handle.user.id, data.len());
                    let err = match validate::check_frame_size(data.len(), reader_gateway.config()) {
                        Err(e) => e,
                        Ok(()) => HubError::InvalidPayload("binary frames are not supported".into()),
                    };
                    reader_gateway.reject(&reader_handle, err).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(&handle).await;
    info!("{} ({}) connection {} closed", handle.user.name, handle.user.id, handle.conn_id);
}
