//! Portcullis gateway server.
//!
//! Boots the communication service from environment configuration and
//! serves the operator REST surface.

use anyhow::Result;
use clap::Parser;
use portcullis::{observability, rest_api, CommunicationService, GatewayConfig};
use tokio::net::TcpListener;
use tracing::info;

/// Policy-enforced external communication gateway.
#[derive(Debug, Parser)]
#[command(name = "portcullis", version, about)]
struct Args {
    /// Address to serve the REST surface on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Override the evidence database path (defaults to PORTCULLIS_DB).
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_logging("portcullis=info");

    let args = Args::parse();
    let mut config = GatewayConfig::from_env()?;
    if let Some(db) = args.db {
        config.db_path = db.into();
    }

    info!(
        db = %config.db_path.display(),
        global_rate_limit = config.global_rate_limit,
        "Starting Portcullis gateway"
    );

    let service = CommunicationService::bootstrap(&config).await?;
    let app = rest_api::router(service);

    let listener = TcpListener::bind(&args.bind).await?;
    info!(bind = %args.bind, "Gateway REST surface listening");
    axum::serve(listener, app).await?;

    info!("Gateway shutting down");
    Ok(())
}
