//! PDF Workbench - Entry point
//!
//! Serves MCP over stdio, or HTTP when `PDF_WORKBENCH_HTTP_ADDR` is set.

use pdf_workbench::{http, run_server_with_config, ServiceConfig, WorkspaceManager};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    // Initialize logging (stdout belongs to the MCP transport)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_workbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServiceConfig::from_env()?;
    tracing::info!(
        data_root = %config.data_root.display(),
        tool = %config.tool_path.display(),
        timeout_secs = config.tool_timeout.as_secs(),
        "Starting PDF workbench"
    );

    let workspaces = WorkspaceManager::new(&config.data_root)?;
    workspaces.sweep(config.max_artifact_age_hours);
    spawn_sweeper(workspaces, &config);

    match config.http_addr {
        Some(addr) => http::serve(&config, addr).await,
        None => run_server_with_config(&config).await,
    }
}

fn spawn_sweeper(workspaces: WorkspaceManager, config: &ServiceConfig) {
    let max_age_hours = config.max_artifact_age_hours;
    let mut interval = tokio::time::interval(config.sweep_interval);

    tokio::spawn(async move {
        // The first tick completes immediately; startup already swept
        interval.tick().await;
        loop {
            interval.tick().await;
            let workspaces = workspaces.clone();
            if let Err(e) =
                tokio::task::spawn_blocking(move || workspaces.sweep(max_age_hours)).await
            {
                tracing::warn!(error = %e, "Periodic sweep task failed");
            }
        }
    });
}
