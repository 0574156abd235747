//! `GET /v1/ws` (spec §4.6, §6): on handshake, send the most recent event
//! as a `snapshot` frame, then relay the shared `ConnectionHub` broadcast
//! (pings and signed batches) for the life of the connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::state::AppState;

pub async fn ws_handler(State(app): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(mut socket: WebSocket, app: Arc<AppState>) {
    // Subscribe before sending the snapshot so `unregister` below always has
    // a matching `subscribe` to balance, even if the snapshot send fails.
    let mut rx = app.hub.subscribe();

    match app.store.latest() {
        Ok(Some(event)) => {
            let frame = canaria_protocol::WsFrame::snapshot(event);
            if send_frame(&mut socket, &frame).await.is_err() {
                app.hub.unregister();
                return;
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "failed to load latest event for ws snapshot"),
    }

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    app.hub.unregister();
}

async fn send_frame(socket: &mut WebSocket, frame: &canaria_protocol::WsFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(text.into())).await
}
