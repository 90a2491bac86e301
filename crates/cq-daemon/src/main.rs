//! Standalone server binary for the task dispatch core.

use anyhow::{Context, Result};
use cq_core::config::Config;
use cq_core::lockfile::DaemonLockfile;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    cq_telemetry::logging::init_logging("cq-daemon", "info");

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "cq-daemon starting");

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let replace_mode = std::env::args().any(|a| a == "--replace" || a == "-r");
    if let Some(existing) = DaemonLockfile::read_valid() {
        if replace_mode {
            info!(pid = existing.pid, "replacing existing daemon (--replace)");
            #[cfg(unix)]
            unsafe {
                libc::kill(existing.pid as i32, libc::SIGTERM);
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            DaemonLockfile::remove();
        } else {
            eprintln!(
                "cq-daemon already running (pid={}, api={})\n\nHint: use --replace to restart it.",
                existing.pid,
                existing.api_url(),
            );
            std::process::exit(1);
        }
    }

    let bind_addr = format!("{}:{}", config.daemon.host, config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {bind_addr}"))?;
    let api_port = listener.local_addr()?.port();
    info!(api_port, "API listener bound");

    let daemon = cq_daemon::daemon::Daemon::new(config.clone())
        .await
        .context("failed to initialize daemon")?;

    let lockfile = DaemonLockfile {
        pid: std::process::id(),
        api_port,
        frontend_port: 0,
        host: config.daemon.host.clone(),
        started_at: chrono::Utc::now().to_rfc3339(),
        project_path: std::env::current_dir().ok().map(|p| p.to_string_lossy().into_owned()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(msg) = lockfile.acquire_or_fail() {
        eprintln!("failed to acquire lockfile: {msg}");
        std::process::exit(1);
    }
    info!("lockfile written to {}", DaemonLockfile::path().display());

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = shutdown_on_signal().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        DaemonLockfile::remove();
        shutdown.trigger();
    });

    info!(api_port, "cq-daemon ready");

    if let Err(e) = daemon.run_with_listener(listener).await {
        tracing::error!(error = %e, "daemon execution failed");
        DaemonLockfile::remove();
        return Err(e);
    }

    DaemonLockfile::remove();
    Ok(())
}

#[cfg(unix)]
async fn shutdown_on_signal() -> Result<()> {
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
async fn shutdown_on_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
