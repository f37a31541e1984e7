//! CLI entry point (§4.K).

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use swgp_relay::{Config, Relay};

#[derive(Parser, Debug)]
#[command(name = "swgp-relay", about = "A WireGuard obfuscation relay")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: std::path::PathBuf,

    /// Raise the log level; repeat for more verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit structured JSON log lines instead of human-readable ones.
    #[arg(long)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    install_logging(args.verbose, args.json_logs);

    let config = Config::load(&args.config).context("failed to load configuration")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let relay = Relay::start(&config).context("failed to start relay")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!(name = %relay, "shutdown signal received");
    relay.stop().await;

    Ok(())
}

fn install_logging(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
