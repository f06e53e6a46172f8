use clap::Parser;
use inkwatch_relay::{RelayConfig, start_server};
use std::path::PathBuf;
use tracing::info;

/// Websocket relay between a phone camera and overlay viewers.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Optional TOML config with `[server]`, `[overlay]` and `[logging]` tables.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to listen on; overrides the config file.
    #[arg(long, env = "INKWATCH_BIND")]
    bind: Option<String>,
    /// Start every viewer with detection switched on.
    #[arg(long)]
    detect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if args.detect {
        config.server.detect_on_connect = true;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        bind = config.server.bind_addr,
        relay_capacity = config.server.relay_capacity,
        detect_on_connect = config.server.detect_on_connect,
        sensitivity = config.overlay.sensitivity(),
        "starting inkwatch relay"
    );

    let (_, handle) = start_server(&config).await?;
    handle.await?;
    Ok(())
}
