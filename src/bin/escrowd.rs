use anyhow::Context;
use clap::Parser;
use meterpay::config::AppConfig;
use meterpay::escrow::EscrowEngine;
use meterpay::server::{router, AppState};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "escrowd")]
#[command(about = "Escrow service for metered API micropayments")]
struct Args {
    /// Path to a TOML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long, env = "METERPAY_PUBLIC_URL")]
    public_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_with_env_overrides(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides().context("applying env overrides")?;
            config
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(public_url) = args.public_url {
        config.server.public_url = Some(public_url);
    }
    config.validate().context("validating config")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if config.protocol.operator.is_none() {
        tracing::warn!("no operator configured: minting and slashing are disabled");
    }
    if config.protocol.arbitrator.is_none() {
        tracing::warn!("no arbitrator configured: disputes cannot be resolved");
    }

    let engine = EscrowEngine::new(config.protocol.clone())
        .context("building escrow engine")?;
    let state = AppState::new(engine, config.public_url());

    let address = config.server_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    tracing::info!(%address, instance = %config.protocol.instance, "escrowd listening");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
