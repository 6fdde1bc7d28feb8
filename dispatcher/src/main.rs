//! Infermux dispatcher binary
//!
//! Wires the routing core together: spawns and readies the configured
//! workers, serves the KServe v2 inference port and the private management
//! port, keeps the cluster directory registration alive, and drains
//! everything on SIGINT/SIGTERM. Exits 0 on clean shutdown, non-zero on
//! startup failure.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use infermux_core::capability::Capability;
use infermux_core::config::DispatcherConfig;
use infermux_core::registry::ModelRegistry;
use infermux_core::supervisor::{WorkerSpec, WorkerSupervisor};
use infermux_core::worker::WorkerClient;
use infermux_directory::{DirectoryClient, RegisterRequest};
use infermux_grpc::{DelegationRouter, GrpcServer, InferenceServiceImpl, WorkerManagementImpl};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Routing front-end for model inference workers
#[derive(Parser)]
#[command(name = "infermux-dispatcher", version, about)]
struct Cli {
    /// Client-facing inference address
    #[arg(long)]
    serve_addr: Option<String>,

    /// Private worker management address
    #[arg(long)]
    management_addr: Option<String>,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Worker command line to launch; repeatable
    #[arg(long = "worker", value_name = "CMD")]
    workers: Vec<String>,

    /// Directory base URL for cluster registration
    #[arg(long)]
    directory_url: Option<String>,

    /// Replica id announced to the directory
    #[arg(long)]
    replica_id: Option<String>,

    /// Endpoint remote clients should dial; defaults to the serve address
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Capability offer announced to the directory, as comma-separated
    /// k=v pairs; repeatable, one offer per flag
    #[arg(long = "capability", value_name = "K=V,...")]
    capabilities: Vec<String>,
}

fn parse_offer(raw: &str) -> Result<Capability> {
    let mut offer = Capability::new();
    for pair in raw.split(',').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid capability attribute '{}', expected k=v", pair))?;
        offer.insert(key.trim(), value.trim());
    }
    Ok(offer)
}

async fn start_workers(supervisor: &WorkerSupervisor, workers: &[String]) -> Result<()> {
    for (index, command_line) in workers.iter().enumerate() {
        let mut parts = command_line.split_whitespace().map(String::from);
        let command = parts
            .next()
            .with_context(|| format!("empty --worker command at position {}", index))?;

        let mut spec = WorkerSpec::new(format!("worker-{}", index), command);
        spec.args = parts.collect();

        let handle = supervisor.spawn(spec).await?;
        supervisor.wait_for_ready(&handle).await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    infermux_core::init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DispatcherConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DispatcherConfig::default(),
    };
    if let Some(addr) = cli.serve_addr.clone() {
        config.serve_addr = addr;
    }
    if let Some(addr) = cli.management_addr.clone() {
        config.management_addr = addr;
    }

    let mut offers = Vec::new();
    for raw in &cli.capabilities {
        offers.push(parse_offer(raw)?);
    }

    let registry = Arc::new(ModelRegistry::new());
    let worker_client = Arc::new(WorkerClient::new(
        config.pool_config(),
        config.request_timeout(),
    ));
    let ready = Arc::new(AtomicBool::new(false));

    // Backstop for worker crashes: evict the dead worker's registrations
    // and its connection pool so subsequent requests see NOT_FOUND instead
    // of timing out on a dead socket.
    let supervisor = Arc::new(WorkerSupervisor::new(config.supervisor_config()));
    {
        let registry = Arc::clone(&registry);
        let worker_client = Arc::clone(&worker_client);
        supervisor
            .on_worker_exit(move |worker_id| {
                let endpoint = registry.worker_endpoint(worker_id);
                let dropped = registry.unregister_worker(worker_id);
                tracing::warn!(
                    worker_id = %worker_id,
                    models = dropped,
                    "worker exited, evicted registry entries"
                );
                if let Some(endpoint) = endpoint {
                    let worker_client = Arc::clone(&worker_client);
                    tokio::spawn(async move {
                        worker_client.remove_endpoint(&endpoint).await;
                    });
                }
            })
            .await;
    }

    let replica_id = cli
        .replica_id
        .clone()
        .unwrap_or_else(|| format!("dispatcher-{}", uuid::Uuid::new_v4().simple()));

    let mut inference = InferenceServiceImpl::new(
        Arc::clone(&registry),
        Arc::clone(&worker_client),
        Arc::clone(&ready),
        config.server_name.clone(),
        config.server_version.clone(),
    );
    if let Some(url) = &cli.directory_url {
        inference = inference.with_delegation(DelegationRouter::new(
            DirectoryClient::new(url.clone()),
            replica_id.clone(),
        ));
    } else if !offers.is_empty() {
        tracing::warn!("--capability given without --directory-url, offers are not announced");
    }

    let management = WorkerManagementImpl::new(Arc::clone(&registry));
    let server = GrpcServer::new(
        &config.serve_addr,
        &config.management_addr,
        inference,
        management,
    )
    .map_err(|e| anyhow!("invalid server address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut server_task = tokio::spawn(server.serve(shutdown_rx.clone()));

    // Startup gate: every configured worker must come up ready. A server
    // that stops during startup (e.g. bind failure) also aborts startup.
    let startup = tokio::select! {
        result = start_workers(&supervisor, &cli.workers) => result,
        result = &mut server_task => Err(match result {
            Ok(Ok(())) => anyhow!("server stopped during startup"),
            Ok(Err(e)) => anyhow!("server error: {}", e),
            Err(e) => anyhow!("server task failed: {}", e),
        }),
    };
    if let Err(e) = startup {
        supervisor.stop_all().await;
        worker_client.shutdown().await;
        let _ = shutdown_tx.send(true);
        return Err(e.context("dispatcher startup failed"));
    }

    ready.store(true, Ordering::SeqCst);
    tracing::info!(
        serve_addr = %config.serve_addr,
        management_addr = %config.management_addr,
        replica_id = %replica_id,
        "dispatcher ready"
    );

    if let Some(url) = cli.directory_url.clone() {
        let registration = RegisterRequest {
            replica_id: replica_id.clone(),
            endpoint: cli
                .advertise_addr
                .clone()
                .unwrap_or_else(|| config.serve_addr.clone()),
            capabilities: offers,
        };
        let client = DirectoryClient::new(url);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            client.maintain(registration, shutdown).await;
        });
    }

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("received shutdown signal, draining");
            ready.store(false, Ordering::SeqCst);
            let _ = shutdown_tx.send(true);
            supervisor.stop_all().await;
            worker_client.shutdown().await;
            server_task
                .await
                .map_err(|e| anyhow!("server task failed: {}", e))?
                .map_err(|e| anyhow!("server error: {}", e))?;
            tracing::info!("dispatcher stopped");
            Ok(())
        }
        result = &mut server_task => {
            supervisor.stop_all().await;
            worker_client.shutdown().await;
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow!("server error: {}", e)),
                Err(e) => Err(anyhow!("server task failed: {}", e)),
            }
        }
    }
}
