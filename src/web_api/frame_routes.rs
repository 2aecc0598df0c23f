//! WebSocket frame streaming
//!
//! Bridges one hub subscriber to one WebSocket client. The server initiates
//! no reads; client text is ignored, pongs feed the liveness check. Close
//! codes: 1008 when the drop policy ends the subscription, 1011 on internal
//! shutdown.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::state::AppState;
use crate::subscriber_hub::CloseReason;

/// Ping cadence and client liveness bound
const PING_INTERVAL: Duration = Duration::from_secs(15);
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct FrameStreamQuery {
    /// Missing stream_id means all streams
    pub stream_id: Option<Uuid>,
}

pub async fn ws_frames(
    ws: WebSocketUpgrade,
    Query(query): Query<FrameStreamQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.stream_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: Option<Uuid>) {
    let handle = state.hub.subscribe(filter);
    let subscriber_id = handle.id();

    let (mut sender, mut receiver) = socket.split();
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            frame = handle.next() => {
                match frame {
                    Some(message) => {
                        let text = match serde_json::to_string(&message) {
                            Ok(t) => t,
                            Err(e) => {
                                tracing::error!(error = %e, "Frame serialization failed");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let (code, reason) = match handle.close_reason() {
                            Some(CloseReason::Policy) => {
                                (close_code::POLICY, "subscriber not keeping up")
                            }
                            _ => (close_code::ERROR, "frame stream closed"),
                        };
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Client writes carry no meaning on this endpoint
                    }
                    Some(Err(e)) => {
                        tracing::debug!(subscriber_id = %subscriber_id, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::info!(subscriber_id = %subscriber_id, "Closing WebSocket: ping timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe(subscriber_id);
}
