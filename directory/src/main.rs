//! Directory server binary

use anyhow::Result;
use clap::Parser;
use infermux_directory::{DirectoryRegistry, DirectoryServer};
use std::sync::Arc;

/// Capability directory for infermux dispatchers
#[derive(Parser)]
#[command(name = "infermux-directory", version, about)]
struct Cli {
    /// Bind host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    infermux_core::init_tracing();
    let cli = Cli::parse();

    let registry = Arc::new(DirectoryRegistry::new());
    let server = DirectoryServer::new(format!("{}:{}", cli.host, cli.port), registry);

    server.serve(shutdown_signal()).await?;
    tracing::info!("directory shut down");
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    tracing::info!("received shutdown signal");
}
