//! crates/chat_relay_core/src/session_store.rs
//!
//! In-memory session store. Each session owns a bounded conversation history
//! plus the bearer token issued with it. Nothing here survives a restart.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Credentials, Session, SessionView, Turn, HISTORY_LIMIT};
use crate::ports::{PortError, PortResult};

const TOKEN_LENGTH: usize = 48;

/// Held for the duration of one request to serialize work on a session.
pub type SessionGuard = OwnedMutexGuard<()>;

struct SessionSlot {
    session: Session,
    turn_lock: Arc<Mutex<()>>,
}

/// Process-wide mapping from session id to session state.
pub struct SessionStore {
    sessions: DashMap<String, SessionSlot>,
    history_limit: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl SessionStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            history_limit,
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Creates an empty session and returns the credentials for it.
    pub fn create(&self) -> Credentials {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            auth_token: generate_token(),
            history: Vec::new(),
            created_at: now,
            last_activity: now,
        };
        let credentials = Credentials {
            session_id: session.id.clone(),
            token: session.auth_token.clone(),
        };

        self.sessions.insert(
            session.id.clone(),
            SessionSlot {
                session,
                turn_lock: Arc::new(Mutex::new(())),
            },
        );
        info!(session_id = %credentials.session_id, "Session created");
        credentials
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|slot| slot.session.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Checks that the session exists and the presented token matches its own.
    pub fn validate(&self, id: &str, presented_token: &str) -> bool {
        self.sessions
            .get(id)
            .map(|slot| {
                bool::from(
                    slot.session
                        .auth_token
                        .as_bytes()
                        .ct_eq(presented_token.as_bytes()),
                )
            })
            .unwrap_or(false)
    }

    /// Waits for exclusive use of a session. Returns `None` for unknown ids.
    pub async fn lock(&self, id: &str) -> Option<SessionGuard> {
        // Clone the lock out so no map shard is held across the await.
        let turn_lock = self.sessions.get(id).map(|slot| slot.turn_lock.clone())?;
        Some(turn_lock.lock_owned().await)
    }

    pub fn touch(&self, id: &str) -> PortResult<()> {
        let mut slot = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| PortError::NotFound(format!("session {id}")))?;
        slot.session.last_activity = Utc::now();
        Ok(())
    }

    /// Appends a turn and drops the oldest entries beyond the history limit.
    ///
    /// Returns `true` when entries were dropped.
    pub fn append(&self, id: &str, turn: Turn) -> PortResult<bool> {
        let mut slot = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| PortError::NotFound(format!("session {id}")))?;
        slot.session.history.push(turn);
        slot.session.last_activity = Utc::now();
        Ok(truncate_history(&mut slot.session.history, self.history_limit))
    }

    pub fn history(&self, id: &str) -> Option<Vec<Turn>> {
        self.sessions.get(id).map(|slot| slot.session.history.clone())
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session removed");
        }
        removed
    }

    /// Drops sessions that have been idle for longer than `max_idle`.
    ///
    /// A session whose lock is held or awaited is in use and always kept.
    pub fn remove_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let before = self.sessions.len();
        self.sessions.retain(|_, slot| {
            slot.session.last_activity >= cutoff || Arc::strong_count(&slot.turn_lock) > 1
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "Expired idle sessions");
        }
        removed
    }

    /// Lists every session with its history, oldest session first.
    pub fn snapshot(&self) -> Vec<SessionView> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| {
                let session = &entry.value().session;
                (
                    session.created_at,
                    SessionView {
                        session_id: session.id.clone(),
                        history: session.history.clone(),
                    },
                )
            })
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.session_id.cmp(&b.1.session_id)));
        sessions.into_iter().map(|(_, view)| view).collect()
    }
}

fn truncate_history(history: &mut Vec<Turn>, limit: usize) -> bool {
    if history.len() <= limit {
        return false;
    }
    let excess = history.len() - limit;
    history.drain(..excess);
    true
}

fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
