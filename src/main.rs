use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use nutrichat_backend::routes;
use nutrichat_backend::services::openai::{OpenAiClient, OpenAiConfig};
use nutrichat_backend::state::AppState;

const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
const PURGE_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = OpenAiConfig::from_env()?;
    let session_ttl = std::env::var("SESSION_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SESSION_TTL_SECS);
    let image_cache_dir = std::env::var("MEAL_IMAGE_CACHE_DIR")
        .ok()
        .map(PathBuf::from);

    let state = Arc::new(AppState::new(
        Duration::from_secs(session_ttl),
        OpenAiClient::new(config),
        image_cache_dir,
    ));

    // Drop sessions that have been idle past their TTL.
    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(PURGE_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let removed = purge_state.sessions.purge_expired().await;
            if removed > 0 {
                debug!(removed, "purged idle sessions");
            }
        }
    });

    let cors = CorsLayer::very_permissive();

    let app = routes::create_router().with_state(state).layer(cors);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;

    info!("nutrition assistant running at http://localhost:3000");
    axum::serve(listener, app).await?;
    Ok(())
}
