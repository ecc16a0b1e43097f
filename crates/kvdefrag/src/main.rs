use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kvdefrag::cli::{self, Cli};
use kvdefrag::discovery::SrvNameService;
use kvdefrag::gateway::GatewayClusterService;
use kvdefrag::Orchestrator;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if cli.version {
        println!("{}", cli::version_string());
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = cli.into_config().context("failed to load configuration")?;
    config.validate()?;

    let cluster = Arc::new(GatewayClusterService::new(&config)?);
    let names = Arc::new(SrvNameService::from_system_conf()?);

    let mut orchestrator = Orchestrator::new(config, cluster, names);
    let report = orchestrator.run().await?;
    Ok(report.is_success())
}
