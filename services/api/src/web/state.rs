//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::web::protocol::ServerMessage;
use chat_relay_core::Relay;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 64;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub config: Arc<Config>,
    /// Fan-out of session snapshots to connected admin sockets.
    pub events: broadcast::Sender<ServerMessage>,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, config: Arc<Config>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            relay,
            config,
            events,
        }
    }

    /// The current set of sessions, as sent to admin observers.
    pub fn sessions_message(&self) -> ServerMessage {
        ServerMessage::Sessions {
            sessions: self.relay.list_sessions(),
        }
    }

    /// Pushes a fresh snapshot to every admin observer, if any are listening.
    pub fn broadcast_sessions(&self) {
        if self.events.receiver_count() == 0 {
            return;
        }
        if let Ok(receivers) = self.events.send(self.sessions_message()) {
            debug!(receivers, "Broadcast session snapshot");
        }
    }
}
