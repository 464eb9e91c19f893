pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use crate::config::Config;
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
        Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// Re-export the handlers to make them easily accessible to the binary.
pub use middleware::require_admin;
pub use rest::{clear_session_handler, create_session_handler, list_sessions_handler, query_handler};
pub use ws_handler::admin_ws_handler;

use rest::{ApiDoc, SESSION_TOKEN_HEADER};
use state::AppState;

/// Builds the complete application router, Swagger UI included.
pub fn router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config);

    // Public routes (session credentials are checked by the relay itself)
    let mut api_router = Router::new()
        .route("/", get(create_session_handler))
        .route("/query", post(query_handler));

    // Admin routes exist only when an admin token is configured
    if app_state.config.admin_token.is_some() {
        let admin_routes = Router::new()
            .route("/admin/sessions", get(list_sessions_handler))
            .route("/admin/sessions/{session_id}", delete(clear_session_handler))
            .route("/admin/ws", get(admin_ws_handler))
            .layer(axum_middleware::from_fn_with_state(
                app_state.clone(),
                require_admin,
            ));
        api_router = api_router.merge(admin_routes);
    }

    let api_router = api_router.layer(cors).with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
        .expose_headers([SESSION_TOKEN_HEADER, RETRY_AFTER]);

    if config.allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(config.allowed_origins.clone())
            .allow_credentials(true)
    }
}
