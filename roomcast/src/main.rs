mod config;
mod http;
mod logging;
mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use config::Config;
use server::RoomcastServer;

/// Roomcast - WebRTC selective forwarding server for shared rooms
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "ROOMCAST_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Roomcast server starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Run until shutdown
    RoomcastServer::new(config).start().await
}
