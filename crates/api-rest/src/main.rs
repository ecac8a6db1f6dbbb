//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Useful during development when only the REST surface (with OpenAPI/Swagger UI) is wanted.
//! The workspace's main `emtct-run` binary serves the same router.

use api_rest::{router, AppState};
use emtct_core::{config::resolve_core_config, Engine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the EMTCT REST API server.
///
/// # Environment Variables
/// - `EMTCT_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `EMTCT_CONFIG`: Path to the staged YAML configuration file (optional)
/// - `EMTCT_STAGE`: Configuration stage (default: "dev")
/// - `EMTCT_SOURCE_DB` / `EMTCT_MIRROR_DB`: Database path overrides
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration cannot be resolved or a database cannot be opened,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("EMTCT_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = resolve_core_config(
        std::env::var("EMTCT_CONFIG").ok().map(PathBuf::from),
        std::env::var("EMTCT_STAGE").ok(),
        std::env::var("EMTCT_SOURCE_DB").ok().map(PathBuf::from),
        std::env::var("EMTCT_MIRROR_DB").ok().map(PathBuf::from),
    )?;
    let engine = Arc::new(Engine::open(&cfg)?);

    tracing::info!("-- Starting EMTCT REST API on {}", addr);

    let app = router(AppState::new(engine));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
