//! crates/chat_relay_core/src/relay.rs
//!
//! The orchestrating entry point for a single query. A request moves through
//! validation, session authentication, rate limiting and the guarded remote
//! call, and the session history is updated on both sides of that call.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{Credentials, SessionView, Turn, HISTORY_LIMIT};
use crate::gate::{ConcurrencyGate, GateError};
use crate::ports::{CompletionService, PortError};
use crate::rate_limiter::{RateDecision, RateLimitSettings, RateLimiter};
use crate::retry::{call_with_retry, RetryPolicy};
use crate::session_store::SessionStore;

//=========================================================================================
// Settings, Requests and Errors
//=========================================================================================

/// Tunables for the relay. The defaults match the production limits.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub history_limit: usize,
    pub rate_limit: RateLimitSettings,
    pub gate_capacity: usize,
    pub max_pending: Option<usize>,
    pub retry: RetryPolicy,
    /// Covers waiting for a slot plus every attempt and backoff.
    pub completion_timeout: Duration,
    /// When false, knowing the session id is enough to use the session.
    pub require_bearer: bool,
    pub sweep_interval: Duration,
    pub session_idle_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            history_limit: HISTORY_LIMIT,
            rate_limit: RateLimitSettings::default(),
            gate_capacity: 4,
            max_pending: None,
            retry: RetryPolicy::default(),
            completion_timeout: Duration::from_secs(40),
            require_bearer: true,
            sweep_interval: Duration::from_secs(60),
            session_idle_timeout: None,
        }
    }
}

/// One inbound query, as extracted from the transport.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub query: Option<String>,
    pub session_id: Option<String>,
    pub bearer_token: Option<String>,
    /// Session id carried by the cookie, if the client sent one.
    pub cookie_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply {
    pub reply: String,
    pub history_truncated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamFailure {
    #[error("Remote completion failed: {0}")]
    Failed(#[from] PortError),
    #[error("Request timed out")]
    TimedOut,
    #[error("Completion capacity exhausted")]
    Busy,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Carries the replacement session the caller must switch to.
    #[error("Invalid or expired session")]
    Unauthorized(Credentials),
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamFailure),
    #[error("Internal error: {0}")]
    Internal(String),
}

//=========================================================================================
// The Relay
//=========================================================================================

pub struct Relay {
    sessions: Arc<SessionStore>,
    limiter: Arc<RateLimiter>,
    gate: ConcurrencyGate,
    completion: Arc<dyn CompletionService>,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(completion: Arc<dyn CompletionService>, settings: RelaySettings) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new(settings.history_limit)),
            limiter: Arc::new(RateLimiter::new(settings.rate_limit)),
            gate: ConcurrencyGate::new(settings.gate_capacity, settings.max_pending),
            completion,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn create_session(&self) -> Credentials {
        self.sessions.create()
    }

    pub fn list_sessions(&self) -> Vec<SessionView> {
        self.sessions.snapshot()
    }

    /// Deletes a session and its rate-limit counter.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.limiter.forget(session_id);
        self.sessions.remove(session_id)
    }

    /// Handles one query end to end.
    ///
    /// On an upstream failure the user turn stays in the history, so the
    /// transcript records the attempt.
    pub async fn handle_query(&self, request: QueryRequest) -> Result<QueryReply, RelayError> {
        // --- 1. Validate ---
        let query = request.query.as_deref().map(str::trim).unwrap_or_default();
        if query.is_empty() {
            return Err(RelayError::InvalidRequest("Query cannot be empty".to_string()));
        }
        let session_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::InvalidRequest("sessionId is required".to_string()))?;

        // --- 2. Authenticate ---
        if !self.is_authorized(session_id, &request) {
            return Err(self.reject(session_id));
        }

        // Same-session requests run one at a time from here on.
        let _guard = match self.sessions.lock(session_id).await {
            Some(guard) => guard,
            None => return Err(self.reject(session_id)),
        };
        if !self.sessions.contains(session_id) {
            // Cleared while this request was queued behind another.
            return Err(self.reject(session_id));
        }

        // --- 3. Rate limit ---
        if let RateDecision::Deny { retry_after_secs } = self.limiter.check_and_consume(session_id)
        {
            return Err(RelayError::RateLimited { retry_after_secs });
        }

        // --- 4. Record the user turn ---
        self.sessions.touch(session_id).map_err(internal)?;
        let mut history_truncated = self
            .sessions
            .append(session_id, Turn::user(query))
            .map_err(internal)?;
        let context = self
            .sessions
            .history(session_id)
            .ok_or_else(|| RelayError::Internal(format!("session {session_id} vanished")))?;

        // --- 5. Complete ---
        debug!(session_id, turns = context.len(), "Forwarding conversation upstream");
        let reply = self.complete(&context).await.map_err(|failure| {
            error!(session_id, error = %failure, "Query failed upstream");
            RelayError::Upstream(failure)
        })?;

        // --- 6. Record the assistant turn ---
        history_truncated |= self
            .sessions
            .append(session_id, Turn::assistant(reply.content.clone()))
            .map_err(internal)?;

        info!(session_id, history_truncated, "Query answered");
        Ok(QueryReply {
            reply: reply.content,
            history_truncated,
        })
    }

    /// Starts the background task that reaps expired rate-limit counters and,
    /// if configured, idle sessions. Runs until `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = self.limiter.clone();
        let sessions = self.sessions.clone();
        let period = self.settings.sweep_interval;
        let idle_timeout = self
            .settings
            .session_idle_timeout
            .and_then(|idle| chrono::Duration::from_std(idle).ok());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Sweeper stopped.");
                        break;
                    }
                    _ = ticker.tick() => {
                        limiter.sweep();
                        if let Some(max_idle) = idle_timeout {
                            sessions.remove_idle(max_idle);
                        }
                    }
                }
            }
        })
    }

    fn is_authorized(&self, session_id: &str, request: &QueryRequest) -> bool {
        if let Some(cookie_id) = request.cookie_session_id.as_deref() {
            if cookie_id != session_id {
                return false;
            }
        }
        if self.settings.require_bearer {
            request
                .bearer_token
                .as_deref()
                .map(|token| self.sessions.validate(session_id, token))
                .unwrap_or(false)
        } else {
            self.sessions.contains(session_id)
        }
    }

    fn reject(&self, session_id: &str) -> RelayError {
        let credentials = self.sessions.create();
        warn!(
            session_id,
            replacement = %credentials.session_id,
            "Rejected query for unknown session or bad token"
        );
        RelayError::Unauthorized(credentials)
    }

    async fn complete(&self, context: &[Turn]) -> Result<Turn, UpstreamFailure> {
        let guarded = async {
            let _permit = self.gate.acquire().await.map_err(|e| match e {
                GateError::Busy => UpstreamFailure::Busy,
                GateError::Closed => UpstreamFailure::Failed(PortError::Unexpected(e.to_string())),
            })?;
            call_with_retry(self.completion.as_ref(), context, &self.settings.retry)
                .await
                .map_err(UpstreamFailure::Failed)
        };

        match tokio::time::timeout(self.settings.completion_timeout, guarded).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamFailure::TimedOut),
        }
    }
}

fn internal(e: PortError) -> RelayError {
    error!(error = %e, "Session store failure");
    RelayError::Internal(e.to_string())
}
