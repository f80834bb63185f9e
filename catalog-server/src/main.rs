use catalog_server::lifecycle::shutdown_signal;
use shared::config::Config;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables before the filter reads RUST_LOG
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match dotenv {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    info!("Starting catalog server");
    catalog::telemetry::describe_metrics();

    let config = Config::from_env();
    let app = match catalog_server::build(&config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize catalog server: {}", e);
            return ExitCode::from(1);
        }
    };

    info!("  - HTTP:    {}://{}", config.http.scheme(), config.http_addr());
    info!("  - RPC:     {}://{}", config.rpc.scheme(), config.rpc_addr());
    info!("  - Metrics: {}://{}", config.metrics.scheme(), config.metrics_addr());

    let report = app.orchestrator.run(shutdown_signal()).await;
    if !report.aborted.is_empty() {
        warn!(aborted = ?report.aborted, "Some subsystems were aborted at the drain deadline");
    }

    info!(cause = ?report.cause, "Catalog server stopped");
    ExitCode::from(report.exit_code())
}
