//! Fixbot server - HTTP surface for analysis, approval links, and scans.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fixbot::io::config::{DEFAULT_CONFIG_FILE, Secrets, load_config};
use fixbot::logging;
use fixbot::registry::{AgentDeps, AgentRegistry};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "fixbot-server")]
#[command(about = "HTTP server for issue analysis and fix approval")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override `server.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Override `server.port`
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("fixbot=info,fixbot_server=info,tower_http=info");

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let port = args.port.unwrap_or(config.server.port);
    let scan_interval = config.server.scan_interval_secs;

    let secrets = Secrets::from_env();
    info!(config = %args.config.display(), ?secrets, "starting fixbot-server");
    let deps = AgentDeps::from_config(config, &secrets)?;
    let state = AppState::new(Arc::new(AgentRegistry::new(deps)));

    if scan_interval > 0 {
        info!(every_secs = scan_interval, "periodic scan enabled");
        state.spawn_periodic_scan(Duration::from_secs(scan_interval));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {bind}:{port}"))?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
