// Finance Tracker - Web Server
//
// Usage: finance-server [settings.json]
// FINANCE_CONFIG may name the settings file instead of the argument.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use finance_tracker::api::{router, AppState};
use finance_tracker::{build_policy, init_tracing, Gateway, Settings, SqliteGateway};

const ENV_CONFIG: &str = "FINANCE_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG).ok())
        .map(PathBuf::from);

    let settings = Settings::load(config_path.as_deref())
        .with_context(|| format!("Failed to load settings from {:?}", config_path))?;
    init_tracing(&settings.log_filter);

    let gateway: Arc<dyn Gateway> = Arc::new(
        SqliteGateway::open(&settings.db_path)
            .with_context(|| format!("Failed to open database {:?}", settings.db_path))?,
    );
    info!(db = ?settings.db_path, "database opened");

    let state = AppState {
        policy: build_policy(settings.closure_policy, Arc::clone(&gateway)),
        gateway,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;

    info!(
        addr = %settings.bind_addr,
        closure_policy = ?settings.closure_policy,
        version = finance_tracker::VERSION,
        "server running"
    );

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
