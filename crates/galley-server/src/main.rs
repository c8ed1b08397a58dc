mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use galley_api::auth::{AppState, AppStateInner};
use galley_api::files::AttachmentStore;
use galley_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "galley=debug,galley_api=debug,galley_gateway=debug,galley_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and attachment storage
    let db = Arc::new(galley_db::Database::open(&config.db_path)?);
    let attachments =
        AttachmentStore::new(config.storage_dir.clone(), config.max_upload_bytes, &config.public_url).await?;

    if config.service_token.is_none() {
        warn!("GALLEY_SERVICE_TOKEN not set; system messages are disabled");
    }

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret.clone(),
        attachments,
        service_token: config.service_token.clone(),
    });

    let app = galley_api::routes::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Galley chat server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
