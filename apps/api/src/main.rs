use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drafter::config::Config;
use drafter::llm_client::LlmClient;
use drafter::operations::{OperationLimits, OperationManager};
use drafter::resilience::RetryOptions;
use drafter::routes::build_router;
use drafter::sequences::schema::email_sequence_schema;
use drafter::sequences::SequenceGenerator;
use drafter::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Drafter API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())
        .context("Failed to build LLM HTTP client")?;
    info!("LLM client initialized (model: {})", drafter::llm_client::MODEL);

    // Initialize operation bookkeeping (in-memory, single process)
    let operations = OperationManager::in_memory(OperationLimits {
        max_concurrent: config.max_concurrent_operations,
        timeout: config.operation_timeout,
        ..OperationLimits::default()
    });
    info!(
        "Operation limits: {} concurrent per user, {}s timeout",
        config.max_concurrent_operations,
        config.operation_timeout.as_secs()
    );

    // Initialize the sequence pipeline
    let schema = email_sequence_schema().context("Email sequence schema failed to compile")?;
    let retry = RetryOptions::new("email sequence")
        .max_retries(config.llm_max_retries)
        .base_delay(config.llm_base_delay);
    let sequences = SequenceGenerator::new(Arc::new(llm), operations.clone(), schema, retry);

    // Build app state
    let state = AppState {
        operations,
        sequences,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict allowed origins once the frontend host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
