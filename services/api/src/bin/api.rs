//! services/api/src/bin/api.rs

use api_lib::{
    adapters::OpenAiCompletionAdapter,
    config::{Config, ConfigError},
    error::ApiError,
    web::{router, state::AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use chat_relay_core::Relay;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize the Completion Adapter ---
    let api_key = config
        .openai_api_key
        .as_ref()
        .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(&config.openai_base_url);
    let openai_client = Client::with_config(openai_config);

    let completion_adapter = Arc::new(OpenAiCompletionAdapter::new(
        openai_client,
        config.chat_model.clone(),
        config.system_prompt.clone(),
    ));
    info!(
        "Relaying to model '{}' at {}",
        config.chat_model, config.openai_base_url
    );

    // --- 3. Build the Relay & Start Background Sweeps ---
    let relay = Arc::new(Relay::new(completion_adapter, config.relay_settings()));
    let shutdown = CancellationToken::new();
    let sweeper = relay.spawn_sweeper(shutdown.clone());

    // --- 4. Build the Shared AppState & Router ---
    let app_state = Arc::new(AppState::new(relay, config.clone()));
    if config.admin_token.is_none() {
        info!("ADMIN_TOKEN not set; admin endpoints are disabled.");
    }
    let app = router(app_state);

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // --- 6. Stop Background Work ---
    shutdown.cancel();
    sweeper
        .await
        .map_err(|e| ApiError::Internal(format!("Sweeper task failed: {}", e)))?;
    info!("Server stopped.");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for the shutdown signal: {:?}", e);
    }
    info!("Shutdown signal received.");
    shutdown.cancel();
}
