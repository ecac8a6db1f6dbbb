use api_rest::{router, AppState};
use emtct_core::{config::resolve_core_config, Engine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the EMTCT application.
///
/// Resolves configuration once, opens the source-of-record and mirror databases, and serves
/// the REST API (Swagger UI at `/swagger-ui`).
///
/// # Environment Variables
/// - `EMTCT_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `EMTCT_CONFIG`: Path to the staged YAML configuration file (optional)
/// - `EMTCT_STAGE`: Configuration stage (default: "dev")
/// - `EMTCT_SOURCE_DB`: Source-of-record database path override
/// - `EMTCT_MIRROR_DB`: Mirror registry database path override
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("emtct=info".parse()?)
                .add_directive("emtct_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr: SocketAddr = std::env::var("EMTCT_REST_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".into())
        .parse()?;

    let cfg = resolve_core_config(
        std::env::var("EMTCT_CONFIG").ok().map(PathBuf::from),
        std::env::var("EMTCT_STAGE").ok(),
        std::env::var("EMTCT_SOURCE_DB").ok().map(PathBuf::from),
        std::env::var("EMTCT_MIRROR_DB").ok().map(PathBuf::from),
    )?;
    tracing::info!(
        source_db = %cfg.source_db_path().display(),
        mirror_db = %cfg.mirror_db_path().display(),
        sample_workers = cfg.sample_workers(),
        "++ Resolved configuration"
    );

    let engine = Arc::new(Engine::open(&cfg)?);

    tracing::info!("++ Starting EMTCT REST on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    axum::serve(listener, router(AppState::new(engine))).await?;

    Ok(())
}
