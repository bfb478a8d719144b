//! Tally agent binary.

use anyhow::{Context, Result};
use clap::Parser;
use tally_agent::{Agent, AgentArgs, AgentConfig};
use tracing_subscriber::EnvFilter;

async fn run(config: AgentConfig) -> Result<()> {
    let agent = Agent::new(config)?;
    agent.run().await
}

fn main() -> Result<()> {
    let args = AgentArgs::parse();
    let config = AgentConfig::resolve(args).context("Invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting Tally agent v{}", env!("CARGO_PKG_VERSION"));

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}
