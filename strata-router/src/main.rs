//! Strata router node binary.
//!
//! Hosts the authoritative object store and notification fan-out for
//! in-process and demo deployments. Network listeners are transport
//! adapters outside the core; this binary runs the node itself.
//!
//! Usage:
//!   strata-router --port 9113

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use strata_router::{RouterConfig, RouterNode};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "strata-router")]
#[command(about = "Strata object store router node")]
struct Args {
    /// Advertised port
    #[arg(short, long, default_value = "9113")]
    port: u16,

    /// Environment name
    #[arg(short, long, default_value = "DEV")]
    env: String,

    /// Path to a JSON configuration file (overrides other flags)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => RouterConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RouterConfig {
            env_name: args.env.clone(),
            port: args.port,
            ..RouterConfig::default()
        },
    };

    info!("Strata router starting...");
    let node = RouterNode::start(config);

    println!("\n========================================");
    println!("  Strata Router Running");
    println!("========================================");
    println!("  Env:  {}", node.config().env_name);
    println!("  Port: {}", node.config().port);
    println!("========================================\n");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    node.shutdown();
    Ok(())
}
