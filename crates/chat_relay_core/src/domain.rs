//! crates/chat_relay_core/src/domain.rs
//!
//! Defines the pure, core data structures for the relay.
//! These structs carry no locking or transport concerns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of turns a session keeps between requests.
pub const HISTORY_LIMIT: usize = 10;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message exchanged in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A conversation identity tying a client to a bounded message history.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub auth_token: String,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// The id/token pair handed to a client when a session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub session_id: String,
    pub token: String,
}

/// A token-free view of a session, used for admin listings and broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub history: Vec<Turn>,
}
