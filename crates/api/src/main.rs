//! OpsRelay API server binary.
//!
//! Usage:
//!   opsrelay --config config.toml
//!   opsrelay --port 8080 --bind 0.0.0.0
//!
//! # Environment Variables
//!
//! - `LLM_BASE_URL` - Override the reasoning endpoint
//! - `LLM_DEFAULT_MODEL` - Override the reasoning model
//! - `LLM_API_KEY` - API key for the reasoning endpoint
//! - `OPSRELAY_BIND_ADDR` - Server bind address (default: 127.0.0.1)

use std::net::SocketAddr;
use std::sync::Arc;

use relay_api::{serve, AppState};
use relay_coordinator::RelayConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut port: u16 = 8080;
    let mut config_path: Option<String> = None;
    let mut bind_addr: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    bind_addr = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("OpsRelay API Server");
                println!();
                println!("Usage: opsrelay [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --port <PORT>    Port to listen on (default: 8080)");
                println!("  -b, --bind <ADDR>    Bind address (default: 127.0.0.1)");
                println!("  -c, --config <FILE>  Path to config.toml file");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let host = bind_addr
        .or_else(|| std::env::var("OPSRELAY_BIND_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    if host == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0 exposes the API to all network interfaces. \
             Make sure a firewall is in place."
        );
    }

    let config = if let Some(path) = config_path {
        tracing::info!(path = %path, "loading configuration");
        RelayConfig::from_file(&path)?
    } else {
        tracing::info!("using default configuration");
        let mut config = RelayConfig::default();
        config.llm.apply_env_overrides();
        config
    };

    let state = Arc::new(AppState::new(&config));

    // Initial discovery pass so the first turn already has capabilities.
    let report = state.coordinator.refresh_capabilities().await;
    tracing::info!(
        capabilities = report.total_capabilities,
        providers = report.providers.len(),
        "initial capability discovery complete"
    );

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    serve(state, addr).await?;

    Ok(())
}
