//! services/api/src/web/protocol.rs
//!
//! Defines the admin WebSocket message protocol between an observer (e.g. an
//! admin page) and the API server.

use chat_relay_core::SessionView;
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Admin Client TO the Server
//=========================================================================================

/// Represents the structured text messages an admin client can send to the server.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Asks for the current set of sessions.
    GetSessions,

    /// Deletes one session; every observer receives a fresh snapshot afterwards.
    ClearSession { session_id: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Admin Client
//=========================================================================================

/// Represents the structured text messages the server can send to admin clients.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Every live session with its history. Sent on connect, on request, after
    /// each answered query, and after a session is cleared.
    Sessions { sessions: Vec<SessionView> },

    /// Confirms that the requested session was deleted.
    SessionCleared { session_id: String },

    /// Reports a problem with the last client message.
    Error { message: String },
}
