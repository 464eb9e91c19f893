//! services/api/src/web/middleware.rs
//!
//! Credential extraction helpers and the middleware protecting admin routes.

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::web::state::AppState;

const SESSION_COOKIE: &str = "session_id";

/// Builds the `Set-Cookie` value carrying a session id.
pub fn session_cookie(session_id: &str, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/{}",
        SESSION_COOKIE, session_id, secure
    )
}

/// Reads the session id from the request's cookie header, if present.
pub fn session_id_from_cookie(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE).and_then(|v| v.to_str().ok())?;
    cookie_header
        .split(';')
        .find_map(|c| {
            let c = c.trim();
            c.strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Reads the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn token_from_query(uri: &Uri) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()?
        .0
        .token
        .filter(|token| !token.is_empty())
}

/// Middleware that only lets requests carrying the admin token through.
///
/// The token may come from a bearer header or, for browser WebSockets which
/// cannot set headers, a `token` query parameter.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Admin access is disabled unless a token is configured
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or(StatusCode::NOT_FOUND)?;

    // 2. Extract the presented token
    let presented = bearer_token(req.headers())
        .or_else(|| token_from_query(req.uri()))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 3. Compare without leaking timing
    if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        warn!("Rejected admin request with an invalid token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    // 4. Continue to the handler
    Ok(next.run(req).await)
}
