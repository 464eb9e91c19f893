//! Router-level tests for the public and admin HTTP endpoints.

use api_lib::{
    config::Config,
    web::{rest::ApiDoc, router, state::AppState},
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chat_relay_core::{CompletionService, PortError, PortResult, Relay, Turn};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use utoipa::OpenApi;

//=========================================================================================
// Test Doubles & Helpers
//=========================================================================================

/// Fails the first `failures` calls, then echoes the last message.
struct FlakyCompletion {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyCompletion {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CompletionService for FlakyCompletion {
    async fn complete(&self, history: &[Turn]) -> PortResult<Turn> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(PortError::Unexpected(format!("upstream hiccup #{}", call + 1)));
        }
        let last = history.last().map(|t| t.content.as_str()).unwrap_or_default();
        Ok(Turn::assistant(format!("echo: {}", last)))
    }
}

fn test_config() -> Config {
    Config {
        completion_retry_delay: Duration::from_millis(1),
        ..Config::default()
    }
}

fn build_app(service: Arc<dyn CompletionService>, config: Config) -> (Router, Arc<AppState>) {
    let config = Arc::new(config);
    let relay = Arc::new(Relay::new(service, config.relay_settings()));
    let app_state = Arc::new(AppState::new(relay, config));
    (router(app_state.clone()), app_state)
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn new_session(app: &Router) -> (String, String) {
    let response = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    (
        body["session_id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

fn query_request(session_id: &str, token: &str, query: &str) -> Request<Body> {
    Request::post("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(
            json!({"query": query, "sessionId": session_id}).to_string(),
        ))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

//=========================================================================================
// Session & Query Endpoints
//=========================================================================================

#[tokio::test]
async fn test_root_issues_cookie_and_token() {
    let (app, state) = build_app(FlakyCompletion::new(0), test_config());

    let response = send(&app, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    let token_header = response.headers()["x-session-token"].to_str().unwrap().to_string();
    let body = body_json(response).await;
    let session_id = body["session_id"].as_str().unwrap();

    assert!(cookie.starts_with(&format!("session_id={};", session_id)));
    assert!(!cookie.contains("Secure"));
    assert_eq!(body["token"], token_header);
    assert!(state.relay.sessions().validate(session_id, &token_header));
}

#[tokio::test]
async fn test_query_returns_reply() {
    let (app, _) = build_app(FlakyCompletion::new(0), test_config());
    let (session_id, token) = new_session(&app).await;

    let response = send(&app, query_request(&session_id, &token, "Hello there")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"response": "echo: Hello there", "message_limit_reached": false})
    );
}

#[tokio::test]
async fn test_empty_query_is_bad_request() {
    let (app, _) = build_app(FlakyCompletion::new(0), test_config());
    let (session_id, token) = new_session(&app).await;

    let response = send(&app, query_request(&session_id, &token, "   ")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (app, _) = build_app(FlakyCompletion::new(0), test_config());

    let not_json = Request::post("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{query: oops"))
        .unwrap();
    assert_eq!(send(&app, not_json).await.status(), StatusCode::BAD_REQUEST);

    let missing_session = Request::post("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"query": "hi"}).to_string()))
        .unwrap();
    assert_eq!(send(&app, missing_session).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_session_is_unauthorized_with_new_credentials() {
    let (app, state) = build_app(FlakyCompletion::new(0), test_config());

    let response = send(&app, query_request("made-up", "whatever", "hello")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::SET_COOKIE));
    let body = body_json(response).await;
    let session_id = body["session_id"].as_str().unwrap();
    let token = body["token"].as_str().unwrap();
    assert!(state.relay.sessions().validate(session_id, token));

    // The new credentials work straight away.
    let retry = send(&app, query_request(session_id, token, "hello")).await;
    assert_eq!(retry.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let service = FlakyCompletion::new(2);
    let (app, _) = build_app(service.clone(), test_config());
    let (session_id, token) = new_session(&app).await;

    let response = send(&app, query_request(&session_id, &token, "still there?")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["response"], "echo: still there?");
    assert_eq!(service.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_return_server_error() {
    let (app, state) = build_app(FlakyCompletion::new(usize::MAX), test_config());
    let (session_id, token) = new_session(&app).await;

    let response = send(&app, query_request(&session_id, &token, "anyone?")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Upstream service failed");
    assert!(body.get("detail").is_none());
    assert_eq!(
        state.relay.sessions().history(&session_id).unwrap(),
        vec![Turn::user("anyone?")]
    );
}

#[tokio::test]
async fn test_debug_mode_echoes_error_detail() {
    let config = Config {
        debug_errors: true,
        ..test_config()
    };
    let (app, _) = build_app(FlakyCompletion::new(usize::MAX), config);
    let (session_id, token) = new_session(&app).await;

    let response = send(&app, query_request(&session_id, &token, "anyone?")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("upstream hiccup #3"));
}

#[tokio::test]
async fn test_thirty_first_request_is_rate_limited() {
    let (app, _) = build_app(FlakyCompletion::new(0), test_config());
    let (session_id, token) = new_session(&app).await;

    for i in 0..30 {
        let response = send(&app, query_request(&session_id, &token, &format!("q{}", i))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app, query_request(&session_id, &token, "q30")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_header: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = body_json(response).await;
    assert!(body["retry_after"].as_u64().unwrap() > 0);
    assert_eq!(body["retry_after"].as_u64().unwrap(), retry_header);
}

#[tokio::test]
async fn test_eleventh_exchange_reports_message_limit() {
    let (app, state) = build_app(FlakyCompletion::new(0), test_config());
    let (session_id, token) = new_session(&app).await;

    let mut last = Value::Null;
    for i in 1..=11 {
        let response = send(&app, query_request(&session_id, &token, &format!("q{}", i))).await;
        assert_eq!(response.status(), StatusCode::OK);
        last = body_json(response).await;
    }

    assert_eq!(last["message_limit_reached"], true);
    assert_eq!(state.relay.sessions().history(&session_id).unwrap().len(), 10);
}

//=========================================================================================
// Admin Endpoints
//=========================================================================================

#[tokio::test]
async fn test_admin_routes_absent_without_admin_token() {
    let (app, _) = build_app(FlakyCompletion::new(0), test_config());

    let response = send(&app, Request::get("/admin/sessions").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_can_list_and_clear_sessions() {
    let config = Config {
        admin_token: Some("admin-secret".to_string()),
        ..test_config()
    };
    let (app, state) = build_app(FlakyCompletion::new(0), config);
    let (session_id, token) = new_session(&app).await;
    send(&app, query_request(&session_id, &token, "hi")).await;

    let unauthenticated =
        send(&app, Request::get("/admin/sessions").body(Body::empty()).unwrap()).await;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    let listing = send(
        &app,
        Request::get("/admin/sessions")
            .header(header::AUTHORIZATION, "Bearer admin-secret")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(listing.status(), StatusCode::OK);
    assert_eq!(
        body_json(listing).await,
        json!([{
            "session_id": session_id,
            "history": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "echo: hi"}
            ]
        }])
    );

    let clear = || {
        Request::delete(format!("/admin/sessions/{}?token=admin-secret", session_id))
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(send(&app, clear()).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(send(&app, clear()).await.status(), StatusCode::NOT_FOUND);
    assert!(!state.relay.sessions().contains(&session_id));
}

#[tokio::test]
async fn test_answered_query_is_broadcast_to_observers() {
    let (app, state) = build_app(FlakyCompletion::new(0), test_config());
    let mut events = state.events.subscribe();
    let (session_id, token) = new_session(&app).await;

    send(&app, query_request(&session_id, &token, "hi")).await;

    let event = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "sessions");
    assert_eq!(event["sessions"][0]["session_id"], session_id);
    assert_eq!(event["sessions"][0]["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_query_is_still_broadcast_to_observers() {
    let (app, state) = build_app(FlakyCompletion::new(usize::MAX), test_config());
    let mut events = state.events.subscribe();
    let (session_id, token) = new_session(&app).await;

    let response = send(&app, query_request(&session_id, &token, "anyone?")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let event = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "sessions");
    assert_eq!(
        event["sessions"][0]["history"],
        json!([{"role": "user", "content": "anyone?"}])
    );
}

#[tokio::test]
async fn test_secure_cookie_is_opt_in() {
    let config = Config {
        cookie_secure: true,
        ..test_config()
    };
    let (app, _) = build_app(FlakyCompletion::new(0), config);

    let response = send(&app, Request::get("/").body(Body::empty()).unwrap()).await;

    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.ends_with("; Secure"));
}

#[tokio::test]
async fn test_admin_token_in_query_is_percent_decoded() {
    let config = Config {
        admin_token: Some("s3cret+key&more=".to_string()),
        ..test_config()
    };
    let (app, _) = build_app(FlakyCompletion::new(0), config);

    let response = send(
        &app,
        Request::get("/admin/sessions?token=s3cret%2Bkey%26more%3D")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn test_openapi_documents_admin_endpoints() {
    let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();

    assert!(doc["paths"]["/admin/sessions"]["get"].is_object());
    assert!(doc["paths"]["/admin/sessions/{session_id}"]["delete"].is_object());
    assert_eq!(
        doc["paths"]["/admin/sessions"]["get"]["security"],
        json!([{"admin_token": []}])
    );
    assert_eq!(
        doc["components"]["securitySchemes"]["admin_token"]["scheme"],
        "bearer"
    );
}
