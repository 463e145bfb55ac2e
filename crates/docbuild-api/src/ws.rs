//! WebSocket transport for the status/trigger protocol.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::handler::{Outcome, handle_message};

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    debug!("WebSocket connection established");

    while let Some(msg) = socket.next().await {
        match msg {
            Ok(Message::Text(text)) => match handle_message(&state, text.as_str()).await {
                Outcome::Reply(value) => {
                    if let Err(e) = socket.send(Message::Text(value.to_string().into())).await {
                        warn!(error = %e, "Failed to send response");
                        break;
                    }
                }
                Outcome::Close(e) => {
                    info!(error = %e, "Closing connection after invalid request");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            Ok(Message::Binary(_)) => {
                info!("Closing connection after binary frame");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            Ok(Message::Close(_)) => {
                debug!("WebSocket connection closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }
}
