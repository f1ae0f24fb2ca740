//! Composition binary: loads configuration, builds the multi-channel
//! system, and runs it until ctrl-c.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use market_core::{MultiChannelSystem, SystemConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "market_core")]
#[command(about = "Multi-channel market-data processing pipeline")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MARKET_CORE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = SystemConfig::from_env();
    info!(
        tick = config.tick_enabled,
        ohlcv = config.ohlcv_enabled,
        fmv = config.fmv_enabled,
        "market-core starting"
    );

    let system = MultiChannelSystem::new(config).context("failed to initialize multi-channel system")?;
    wait_until_ready(&system).await;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    system.shutdown().await;
    Ok(())
}

async fn wait_until_ready(system: &Arc<MultiChannelSystem>) {
    for _ in 0..50 {
        if system.ready() {
            info!("market-core ready");
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("market_core={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
