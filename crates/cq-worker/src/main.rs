#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod client;
mod executor;
mod integrations;
mod runtime;

use std::time::Duration;

use clap::Parser;
use cq_harness::shutdown::ShutdownSignal;
use tracing::info;

use client::{ClientError, WorkerClient};
use runtime::{WorkerConfig, WorkerRuntime};

/// cq-worker -- claims and executes tasks from a cq-daemon server.
#[derive(Parser)]
#[command(name = "cq-worker", version, about)]
struct Cli {
    /// Base URL of the cq-daemon server, e.g. http://127.0.0.1:8080.
    #[arg(short = 's', long)]
    server: String,

    /// Display name for this worker (shown in logs, not used for auth).
    #[arg(short = 'u', long)]
    user: String,

    /// Auth token for this worker's owning user. Prompted if omitted.
    #[arg(long, env = "CQ_WORKER_PASSWORD")]
    password: Option<String>,

    /// Seconds between poll attempts.
    #[arg(long, default_value_t = 5)]
    poll: u64,

    /// Seconds between heartbeats.
    #[arg(long, default_value_t = 30)]
    heartbeat: u64,

    /// Maximum number of tasks this worker executes concurrently.
    #[arg(long, default_value_t = 1)]
    max_concurrent_tasks: u32,

    /// Worker-reported hostname; defaults to the machine's hostname.
    #[arg(long)]
    hostname: Option<String>,

    /// AI CLI executable used for `agent_run` tasks.
    #[arg(long, default_value = "claude")]
    agent_cli: String,

    /// Capability tags advertised at registration (repeatable).
    #[arg(long = "capability")]
    capabilities: Vec<String>,
}

/// Exit codes: 0 clean shutdown, 1 unrecoverable startup error, 2 auth failure.
#[tokio::main]
async fn main() {
    cq_telemetry::logging::init_logging("cq-worker", "info");

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let password = match cli.password.clone() {
        Some(p) => p,
        None => match dialoguer::Password::new().with_prompt("Worker auth token").interact() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to read auth token");
                return 1;
            }
        },
    };

    let hostname = cli.hostname.clone().unwrap_or_else(hostname_or_fallback);
    let config = WorkerConfig {
        hostname,
        capabilities: cli.capabilities.clone(),
        max_concurrent_tasks: cli.max_concurrent_tasks,
        heartbeat_interval: Duration::from_secs(cli.heartbeat),
        poll_interval: Duration::from_secs(cli.poll),
        agent_cli: cli.agent_cli.clone(),
    };

    info!(user = %cli.user, server = %cli.server, "starting cq-worker");
    let client = WorkerClient::new(cli.server.clone(), password);
    let runtime = match WorkerRuntime::bootstrap(client, config).await {
        Ok(rt) => rt,
        Err(ClientError::Unauthorized(msg)) => {
            tracing::error!(error = %msg, "authentication rejected by server");
            return 2;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap worker");
            return 1;
        }
    };

    let shutdown = ShutdownSignal::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_on_signal().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received, draining in-flight tasks");
        shutdown_for_signal.trigger();
    });

    if let Err(e) = runtime.run(shutdown).await {
        tracing::error!(error = %e, "worker loop failed");
        return 1;
    }

    info!("cq-worker stopped");
    0
}

fn hostname_or_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(unix)]
async fn shutdown_on_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_on_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
