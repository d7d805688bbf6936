//! WebSocket endpoint.
//!
//! Clients only listen: on connect they get an initial sync (current status
//! and the pending job list), then every `status` / `scheduledJobsUpdate`
//! broadcast until they hang up. Inbound frames other than close are
//! ignored.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::debug;
use uuid::Uuid;

use super::AppState;
use crate::broadcast::{JOBS_EVENT, STATUS_EVENT};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = Uuid::new_v4().to_string();
    let mut events = state.broadcaster.subscribe(id.clone()).await;
    debug!(subscriber = %id, "websocket client connected");

    // Initial sync so a fresh client renders without waiting for a change.
    state
        .broadcaster
        .send_to(&id, STATUS_EVENT, state.gateway.status().await)
        .await;
    state
        .broadcaster
        .send_to(&id, JOBS_EVENT, state.scheduler.list().await)
        .await;

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = events.recv() => {
                match outbound {
                    Some(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.broadcaster.unsubscribe(&id).await;
    debug!(subscriber = %id, "websocket client disconnected");
}
