//! ml2d - ML2 driver-orchestration engine daemon.
//!
//! Loads the configuration, builds the configured drivers, reconciles the
//! segment pools, expires silent agents and logs every published
//! notification until shutdown.

use anyhow::Context;
use clap::Parser;
use ml2_plugin::audit::init_logging;
use ml2_plugin::{DriverRegistry, Ml2Config, Ml2Plugin, DEFAULT_CONFIG_PATH};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// ML2 driver-orchestration engine
#[derive(Parser, Debug)]
#[command(name = "ml2d")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("ml2d failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("Starting ml2d, config {}", args.config);

    let config = Ml2Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config))?;
    config.validate().context("invalid configuration")?;
    info!(
        "type_drivers={:?} tenant_network_types={:?} mechanism_drivers={:?}",
        config.ml2.type_drivers, config.ml2.tenant_network_types, config.ml2.mechanism_drivers
    );
    if args.check_config {
        info!("Configuration OK");
        return Ok(());
    }

    let down_time = config.agent_down_time();
    let plugin = Arc::new(
        Ml2Plugin::from_config(config, &DriverRegistry::new()).context("building drivers")?,
    );
    plugin.initialize().await.context("initializing drivers")?;

    let reaper = {
        let plugin = plugin.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(down_time);
            loop {
                tick.tick().await;
                plugin.expire_agents().await;
            }
        })
    };

    let mut notifications = plugin.subscribe(None);
    let printer = tokio::spawn(async move {
        while let Some(n) = notifications.recv().await {
            info!(target: "notifications", "{}", n.to_json());
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    reaper.abort();
    drop(plugin);
    printer.abort();
    info!("ml2d stopped");
    Ok(())
}
