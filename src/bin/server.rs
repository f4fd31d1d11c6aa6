use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use outflow::db;
use outflow::engine::{EngineContext, GatewayExecutor};
use outflow::queue::{self, CampaignScheduler};
use outflow::server::AppConfig;
use outflow::services::CredentialVault;
use outflow::web;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let db = db::connect(&config.database_url).await?;
    info!("Connected to database");
    db::schema::initialize(&db).await?;

    // The only acceptable startup crash: no usable credential key and no way
    // to persist a generated one.
    let vault = Arc::new(CredentialVault::from_env_or_generate(Path::new(&config.env_file))?);

    let executor = Arc::new(GatewayExecutor::new(&config.gateway_url));

    let ctx = Arc::new(EngineContext {
        db: db.clone(),
        vault,
        executor,
        settings: config.engine.clone(),
    });

    let scheduler = Arc::new(CampaignScheduler::new(ctx));
    let resumed = scheduler.resume_active().await?;
    info!(resumed, "Campaign scheduler ready");

    let housekeeping = queue::spawn_housekeeping(db.clone());

    let router = web::create_axum_router(db, scheduler.clone());
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, draining scheduler");
    scheduler.shutdown().await;
    housekeeping.abort();
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
