//! Rifa API Server Binary
//!
//! HTTP front end for the raffle fulfillment engine.

use clap::Parser;
use rifa::{
    api::server::ApiServer,
    config::ConfigLoader,
    fulfillment::FulfillmentEngine,
    storage::Storage,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rifa-api")]
#[command(about = "Raffle Fulfillment API Server", long_about = None)]
struct Args {
    /// Path to TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// API server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// API server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Database directory (overrides config)
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rifa=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.api.listen_address = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_dir = db_path;
    }

    info!("Opening fulfillment database: {}", config.storage.data_dir);
    let storage = Storage::open(&config.storage.data_dir)?;

    let engine = Arc::new(FulfillmentEngine::new(storage, &config.scratchcards));

    let server = ApiServer::new(config.api.clone(), engine);
    server.run().await?;

    Ok(())
}
