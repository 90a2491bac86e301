//! `/events/stream` — long-lived per-connection event fan-out.
//!
//! Subscribes to the requested board's topic (if any) plus the caller's
//! personal topic, forwards published events as JSON text frames, and emits
//! a synthetic heartbeat on a fixed interval so intermediaries don't idle the
//! connection out. No replay: a client that was disconnected must refetch
//! snapshot state through the regular REST endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use cq_core::types::Event;

use crate::auth::AuthUser;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub board_id: Option<Uuid>,
}

pub async fn stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state, user_id, query.board_id))
}

async fn run(mut socket: WebSocket, state: Arc<ApiState>, user_id: Uuid, board_id: Option<Uuid>) {
    let mut user_sub = state.bus.subscribe(Event::user_topic(user_id));
    let mut board_sub = board_id.map(|id| state.bus.subscribe(Event::board_topic(id)));

    let heartbeat_secs = state.config.worker_protocol.stream_heartbeat_secs.max(1);
    let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs));
    heartbeat.tick().await; // first tick fires immediately; skip it

    loop {
        let board_recv = async {
            match &mut board_sub {
                Some(sub) => sub.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            Some(event) = user_sub.recv() => {
                if send(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            Some(event) = board_recv => {
                if send(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if send(&mut socket, &Event::Heartbeat).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

async fn send(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(json.into())).await
}
