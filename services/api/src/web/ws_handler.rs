//! services/api/src/web/ws_handler.rs
//!
//! The admin side channel. Each connection receives the full session list on
//! connect and again whenever a query is answered or a session is cleared.

use crate::{
    error::ApiError,
    web::{
        protocol::{ClientMessage, ServerMessage},
        state::AppState,
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// The handler for upgrading admin HTTP requests to WebSocket connections.
pub async fn admin_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("New admin WebSocket connection established.");

    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the first snapshot so no update falls in between.
    let mut events = app_state.events.subscribe();

    // --- 1. Initial snapshot ---
    if let Err(e) = send_message(&mut sender, &app_state.sessions_message()).await {
        error!("Failed to send initial session snapshot: {:?}", e);
        return;
    }

    // --- 2. Main Message Loop ---
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_text_message(text.as_str(), &app_state, &mut sender).await {
                        error!("Failed to answer admin message: {:?}", e);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Admin client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Admin WebSocket receive failed: {}", e);
                    break;
                }
                None => {
                    info!("Admin client disconnected.");
                    break;
                }
            },
            event = events.recv() => {
                let message = match event {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Admin observer lagged; sending a fresh snapshot");
                        app_state.sessions_message()
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(e) = send_message(&mut sender, &message).await {
                    error!("Failed to push session update: {:?}", e);
                    break;
                }
            }
        }
    }

    // --- 3. Cleanup ---
    info!("Admin WebSocket connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<(), ApiError> {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_msg) => client_msg,
        Err(e) => {
            warn!("Failed to deserialize admin message: {}", e);
            let reply = ServerMessage::Error {
                message: format!("Unrecognised message: {}", e),
            };
            return send_message(sender, &reply).await;
        }
    };

    match client_msg {
        ClientMessage::GetSessions => send_message(sender, &app_state.sessions_message()).await,
        ClientMessage::ClearSession { session_id } => {
            if app_state.relay.clear_session(&session_id) {
                info!(session_id = %session_id, "Session cleared by admin.");
                send_message(sender, &ServerMessage::SessionCleared { session_id }).await?;
                app_state.broadcast_sessions();
                Ok(())
            } else {
                let reply = ServerMessage::Error {
                    message: format!("Session {} not found", session_id),
                };
                send_message(sender, &reply).await
            }
        }
    }
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), ApiError> {
    let json = serde_json::to_string(message)?;
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}
