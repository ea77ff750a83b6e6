mod api;
mod cli;
mod live;
mod metrics;
mod router;
mod runner;
mod startup;
mod state;

use std::future::IntoFuture;

use clap::Parser;
use reactor_core::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

async fn serve(config: Config, bootstrap_model: bool) -> anyhow::Result<()> {
    config.log_summary();
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let (state, runner) = startup::build_app_state(config, bootstrap_model).await?;
    let runner_handle = runner.spawn();
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
    });

    runner::supervise(server.into_future(), runner_handle).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reactor_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve(args) => serve(config, args.bootstrap_model).await,
        Command::Train(args) => cli::run_train(&config, &args),
    }
}
