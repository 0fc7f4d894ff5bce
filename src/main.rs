//! MCP SSE relay server
//!
//! Entry point: loads configuration, initializes logging and serves.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;

use mcp_sse_relay::config::{AppConfig, Cli};
use mcp_sse_relay::{server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let cli = Cli::parse();
    telemetry::init(cli.log_json);

    let config = match AppConfig::from_cli(&cli) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };

    tracing::info!(
        name: "config.loaded",
        host = %config.server.host,
        port = config.server.port,
        keepalive_secs = config.relay.keepalive_secs,
        delivery_timeout_secs = config.relay.delivery_timeout_secs,
        search_configured = config.search.api_key.is_some(),
        "Configuration loaded"
    );

    server::start_server(config).await
}
