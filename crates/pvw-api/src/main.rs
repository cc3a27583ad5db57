//! pvw-api: HTTP and WebSocket server.

use std::net::SocketAddr;

use tracing::info;

use pvw_api::{build_router, AppState, ServerConfig};
use pvw_db::Database;
use pvw_jobs::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let _log_guard = init_logging("pvw_api=debug,tower_http=debug,pvw_jobs=info", "pvw-api.log");

    let config = ServerConfig::from_env();
    info!(
        "Rate limiting: {} ({} requests per {} seconds)",
        if config.rate_limit_enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.rate_limit_requests,
        config.rate_limit_period.as_secs()
    );

    info!("Connecting to database...");
    let db = Database::connect(&config.database_url).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    tokio::fs::create_dir_all(&config.uploads.upload_dir).await?;
    info!(upload_dir = %config.uploads.upload_dir.display(), "Upload storage ready");

    let state = AppState::init(db, &config).await;
    let app = build_router(state.clone(), &config);

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    })
    .await?;

    state.shutdown().await;
    info!("Server stopped");
    Ok(())
}
