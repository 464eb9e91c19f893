//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::config::Config;
use crate::web::{
    middleware::{bearer_token, session_cookie, session_id_from_cookie},
    state::AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chat_relay_core::{QueryRequest, RelayError, UpstreamFailure};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};

/// Response header repeating the bearer token issued with a new session.
pub const SESSION_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-session-token");

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        query_handler,
        list_sessions_handler,
        clear_session_handler,
    ),
    components(
        schemas(QueryPayload, QueryResponse, SessionResponse, ErrorResponse)
    ),
    modifiers(&AdminSecurity),
    tags(
        (name = "Chat Relay API", description = "Session-bound relay to a chat-completion provider.")
    )
)]
pub struct ApiDoc;

/// Registers the bearer scheme guarding the admin endpoints.
struct AdminSecurity;

impl Modify for AdminSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "admin_token",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The body of a `POST /query` request.
#[derive(Deserialize, ToSchema)]
pub struct QueryPayload {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

/// The assistant's reply to a query.
#[derive(Serialize, ToSchema)]
pub struct QueryResponse {
    response: String,
    /// True when older turns were dropped from the session history.
    message_limit_reached: bool,
}

/// The credentials for a newly created session.
#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    session_id: String,
    token: String,
}

/// The body of every error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    error: String,
    /// Seconds to wait before retrying (429 only).
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    /// Replacement session issued with a 401.
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    /// Diagnostic detail, only present in debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retry_after: None,
            session_id: None,
            token: None,
            detail: None,
        }
    }
}

/// Maps a relay failure onto its HTTP status and JSON body.
pub fn relay_error_response(err: RelayError, config: &Config) -> Response {
    let debug_errors = config.debug_errors;
    match err {
        RelayError::InvalidRequest(message) => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
        }
        RelayError::Unauthorized(credentials) => {
            let cookie = session_cookie(&credentials.session_id, config.cookie_secure);
            let body = ErrorResponse {
                session_id: Some(credentials.session_id),
                token: Some(credentials.token),
                ..ErrorResponse::new("Invalid or expired session")
            };
            (
                StatusCode::UNAUTHORIZED,
                [(header::SET_COOKIE, cookie)],
                Json(body),
            )
                .into_response()
        }
        RelayError::RateLimited { retry_after_secs } => {
            let body = ErrorResponse {
                retry_after: Some(retry_after_secs),
                ..ErrorResponse::new("Rate limit exceeded")
            };
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(body),
            )
                .into_response()
        }
        RelayError::Upstream(failure) => {
            let message = match &failure {
                UpstreamFailure::TimedOut => "Request timed out",
                UpstreamFailure::Busy => "Server is busy, please try again later",
                UpstreamFailure::Failed(_) => "Upstream service failed",
            };
            let body = ErrorResponse {
                detail: debug_errors.then(|| failure.to_string()),
                ..ErrorResponse::new(message)
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
        RelayError::Internal(detail) => {
            let body = ErrorResponse {
                detail: debug_errors.then_some(detail),
                ..ErrorResponse::new("Internal server error")
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Create a new session.
///
/// The session id is set as a cookie and returned together with the bearer
/// token that must accompany every query for the session.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Session created", body = SessionResponse)
    )
)]
pub async fn create_session_handler(State(app_state): State<Arc<AppState>>) -> Response {
    let credentials = app_state.relay.create_session();
    let cookie = session_cookie(&credentials.session_id, app_state.config.cookie_secure);

    (
        StatusCode::OK,
        [
            (header::SET_COOKIE, cookie),
            (SESSION_TOKEN_HEADER, credentials.token.clone()),
        ],
        Json(SessionResponse {
            session_id: credentials.session_id,
            token: credentials.token,
        }),
    )
        .into_response()
}

/// Relay a user query to the chat-completion provider.
///
/// The session's recent history is sent along as context.
#[utoipa::path(
    post,
    path = "/query",
    request_body = QueryPayload,
    responses(
        (status = 200, description = "Reply from the assistant", body = QueryResponse),
        (status = 400, description = "Malformed body, empty query or missing sessionId", body = ErrorResponse),
        (status = 401, description = "Unknown session or bad token; a new session is issued", body = ErrorResponse),
        (status = 429, description = "Too many requests for this session", body = ErrorResponse),
        (status = 500, description = "Upstream or internal failure", body = ErrorResponse)
    ),
    params(
        ("Authorization" = Option<String>, Header, description = "Bearer token issued with the session.")
    )
)]
pub async fn query_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<QueryPayload>, JsonRejection>,
) -> Response {
    let config = app_state.config.as_ref();
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("Rejected malformed query body: {}", rejection.body_text());
            let err = RelayError::InvalidRequest(
                "Request body must be JSON with query and sessionId".to_string(),
            );
            return relay_error_response(err, config);
        }
    };

    let request = QueryRequest {
        query: payload.query,
        session_id: payload.session_id,
        bearer_token: bearer_token(&headers),
        cookie_session_id: session_id_from_cookie(&headers),
    };

    match app_state.relay.handle_query(request).await {
        Ok(reply) => {
            app_state.broadcast_sessions();
            Json(QueryResponse {
                response: reply.reply,
                message_limit_reached: reply.history_truncated,
            })
            .into_response()
        }
        Err(err) => {
            // The user turn was already recorded before the upstream call failed.
            if matches!(err, RelayError::Upstream(_)) {
                app_state.broadcast_sessions();
            }
            relay_error_response(err, config)
        }
    }
}

/// Lists every live session with its history (admin only).
#[utoipa::path(
    get,
    path = "/admin/sessions",
    responses(
        (status = 200, description = "Every live session with its history, oldest first"),
        (status = 401, description = "Missing or invalid admin token")
    ),
    security(("admin_token" = []))
)]
pub async fn list_sessions_handler(State(app_state): State<Arc<AppState>>) -> Response {
    Json(app_state.relay.list_sessions()).into_response()
}

/// Deletes one session (admin only) and notifies admin observers.
#[utoipa::path(
    delete,
    path = "/admin/sessions/{session_id}",
    params(
        ("session_id" = String, Path, description = "The session to delete.")
    ),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "No such session", body = ErrorResponse)
    ),
    security(("admin_token" = []))
)]
pub async fn clear_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    if app_state.relay.clear_session(&session_id) {
        app_state.broadcast_sessions();
        StatusCode::NO_CONTENT.into_response()
    } else {
        warn!(session_id = %session_id, "Admin tried to clear an unknown session");
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Session not found")),
        )
            .into_response()
    }
}
