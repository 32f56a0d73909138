//! uplink - CLI entry point
//!
//! Resolves the configured controller destination and keeps the published
//! connection target current. On unix, `SIGUSR1` reports a failed connection
//! attempt and makes the agent fail over to the next resolved address.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uplink::{Agent, AgentHandle, Config, Destination, VERSION};

#[derive(Parser, Debug)]
#[command(name = "uplink")]
#[command(version = VERSION)]
#[command(about = "Controller address resolution and connection-target failover")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "uplink.yaml")]
    config: PathBuf,

    /// Destination to resolve at startup (overrides config)
    #[arg(short = 'd', long = "destination")]
    destination: Option<Destination>,

    /// Target file (overrides config)
    #[arg(long = "target-file")]
    target_file: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long = "json-logs")]
    json_logs: bool,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    // One cooperative loop drives the resolver channel
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .thread_name("uplink")
        .build()?;

    runtime.block_on(async_main())
}

fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("uplink={}", level)))?;

    if json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            // logging is not up yet
            eprintln!("Failed to load configuration {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };

    init_logging(config.log_level.as_deref().unwrap_or("info"), args.json_logs)?;

    info!("uplink v{}", VERSION);
    info!("Loaded configuration from: {}", args.config.display());

    // Apply CLI overrides
    if let Some(dest) = args.destination {
        config.destination = dest;
    }
    if let Some(target_file) = args.target_file {
        config.target_file = target_file;
    }
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // Test mode
    if args.test {
        info!("Configuration test passed");
        return Ok(());
    }

    let mut agent = Agent::from_config(&config);
    let handle = agent.handle();

    tokio::spawn(forward_signals(handle));

    if let Err(e) = agent.run().await {
        error!("Agent error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Map process signals onto agent commands
async fn forward_signals(handle: AgentHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Cannot install SIGUSR1 handler: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = handle.shutdown();
                }
                return;
            }
        };

        loop {
            tokio::select! {
                _ = usr1.recv() => {
                    info!("SIGUSR1: connection attempt failed");
                    if handle.connect_failed().is_err() {
                        return;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    let _ = handle.shutdown();
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        let _ = handle.shutdown();
    }
}
