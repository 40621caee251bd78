//! Gateway command — run the orchestrator until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use nexbot_agent::Orchestrator;
use nexbot_core::config::load_config;

use crate::helpers;

pub async fn run() -> Result<()> {
    let config = load_config(None);

    helpers::print_banner();
    println!("  Mode:      Gateway");
    println!("  Provider:  {}", config.provider);
    println!("  Model:     {}", config.agent.model);
    println!("  Workspace: {}", config.workspace);
    println!();
    println!("  Ctrl+C to stop");
    println!();

    let orchestrator = Arc::new(Orchestrator::new(config));
    orchestrator.initialize().await?;
    orchestrator.start_message_processing().await?;
    info!("gateway running");

    tokio::signal::ctrl_c().await?;
    println!();
    println!("  Shutting down...");
    orchestrator.shutdown().await;

    println!("  Gateway stopped. Goodbye!");
    Ok(())
}
