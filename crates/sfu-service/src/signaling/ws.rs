//! WebSocket transport for the signaling protocol.
//!
//! Each upgraded socket gets one [`SignalingHandler`]. Inbound text frames
//! are handled in arrival order; outbound messages from the handler and from
//! registry broadcasts share one bounded queue drained into the socket.

use super::handler::SignalingHandler;
use super::protocol::ServerMessage;
use crate::actors::outbound_channel;
use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let services = Arc::clone(&state.services);
    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = outbound_channel();
        let handler = SignalingHandler::new(services, sender);
        serve_connection(socket, handler, receiver).await;
    })
}

#[instrument(skip_all, name = "sfu.signaling.connection", fields(connection_id = %handler.connection_id()))]
async fn serve_connection(
    mut socket: WebSocket,
    mut handler: SignalingHandler,
    mut outbound: mpsc::Receiver<ServerMessage>,
) {
    info!(target: "sfu.signaling", "Client connected");

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    break;
                };
                match message.to_json() {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(target: "sfu.signaling", error = %e, "Dropping unserializable message");
                    }
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handler.handle_text(&text).await,
                    Some(Ok(Message::Binary(_))) => handler.handle_binary(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        debug!(target: "sfu.signaling", error = %e, "Socket read failed");
                        break;
                    }
                }
            }
        }
    }

    handler.close().await;
    info!(target: "sfu.signaling", "Client disconnected");
}
