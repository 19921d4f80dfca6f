//! WebSocket push channel for scheduler events.
//!
//! Sessions are stateless: a client subscribes on connect and re-subscribes
//! after reconnecting; there is no replay. Any inbound text elicits a pong.
//! A session that keeps lagging behind the broadcast is closed rather than
//! back-pressuring the scheduler.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::scheduler::EventHub;
use crate::server::app::AppState;

/// How many lag strikes before the session is dropped.
const MAX_LAG_STRIKES: u32 = 3;

/// GET /ws/scheduler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.events.clone();
    ws.on_upgrade(move |socket| handle_session(socket, events))
}

async fn handle_session(mut socket: WebSocket, events: EventHub) {
    let mut receiver = events.subscribe();
    let mut lag_strikes = 0u32;
    debug!("push channel session opened");

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    lag_strikes += 1;
                    warn!(skipped, lag_strikes, "push channel subscriber lagging");
                    if lag_strikes >= MAX_LAG_STRIKES {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(_))) => {
                    let pong = serde_json::json!({"type": "pong", "message": "connection active"});
                    if socket.send(Message::Text(pong.to_string())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "push channel receive error");
                    break;
                }
            },
        }
    }

    debug!("push channel session closed");
}
