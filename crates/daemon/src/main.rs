// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `vead`: the vehicle edge application supervisor.
//!
//! Startup is deliberately simple: open the store, reconcile once,
//! then serve. Recovery is entirely the reconciler's job; there is no
//! separate restoration path.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use fs2::FileExt;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vea_core::SystemClock;
use vea_store::{Store, StoreConfig, StoreError};

use vea_daemon::config::{Config, ConfigError};
use vea_daemon::console::ConsoleHub;
use vea_daemon::health::{self, Health};
use vea_daemon::lifecycle::LifecycleCore;
use vea_daemon::listener::{self, ListenCtx};
use vea_daemon::sandbox::{DockerDriver, SandboxDriver};
use vea_daemon::signals::{BrokerGateway, DisabledGateway, SignalGateway};

#[derive(Debug, Error)]
enum BootError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("another supervisor holds the lock at {0}")]
    AlreadyRunning(std::path::PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("vead: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), BootError> {
    let config = Config::load()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let _log_guard = init_tracing(&config);

    // One supervisor per node: the lock file is authoritative.
    let lock_path = config.data_dir.join("vead.pid");
    let mut lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(BootError::AlreadyRunning(lock_path));
    }
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    let store = Arc::new(Store::open(StoreConfig {
        log_ring_bytes: config.log_ring_bytes,
        checkpoint_every: config.checkpoint_every,
        ..StoreConfig::under(&config.data_dir)
    })?);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config, store))?;
    Ok(())
}

async fn serve(config: Config, store: Arc<Store>) -> Result<(), BootError> {
    let driver: Arc<dyn SandboxDriver> =
        Arc::new(DockerDriver::new(&config.sandbox_socket, config.script_image.clone()));
    let gateway: Arc<dyn SignalGateway> = if config.broker_enabled {
        Arc::new(BrokerGateway::new(config.broker_endpoint.clone()))
    } else {
        info!("signal gateway disabled by configuration");
        Arc::new(DisabledGateway::new())
    };

    let console = Arc::new(ConsoleHub::new(Arc::clone(&driver), Arc::clone(&store), SystemClock));
    let core = Arc::new(LifecycleCore::new(
        config.clone(),
        Arc::clone(&store),
        driver,
        gateway,
        Arc::clone(&console),
        SystemClock,
    ));
    let health = Arc::new(Health::new(config.reconcile_interval()));
    let shutdown = CancellationToken::new();

    // Startup is exactly one reconciliation pass.
    let summary = core.reconcile_once().await;
    health.mark_reconcile();
    health.mark_ready();
    info!(apps = summary.apps, rebuilt = summary.rebuilt, "startup reconciliation complete");

    // Interval reconciler.
    {
        let core = Arc::clone(&core);
        let health = Arc::clone(&health);
        let shutdown = shutdown.clone();
        let interval = config.reconcile_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate first tick; startup already reconciled
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        core.reconcile_once().await;
                        health.mark_reconcile();
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    // Health endpoint.
    let health_listener =
        TcpListener::bind(("0.0.0.0", config.health_port)).await.map_err(BootError::Io)?;
    {
        let router = health::router(Arc::clone(&core), Arc::clone(&health));
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let serve = axum::serve(health_listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "health endpoint failed");
            }
        });
    }

    // Control channel.
    let control_listener =
        TcpListener::bind(("0.0.0.0", config.control_port)).await.map_err(BootError::Io)?;
    let ctx = Arc::new(ListenCtx::new(Arc::clone(&core), console, SystemClock));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            listener::run(control_listener, ctx, shutdown).await;
        });
    }

    info!(
        control_port = config.control_port,
        health_port = config.health_port,
        data_dir = %config.data_dir.display(),
        "vead ready"
    );

    wait_for_shutdown().await;
    info!("shutdown signal received");
    shutdown.cancel();

    // Sandboxes stay up across supervisor restarts; the next startup
    // re-adopts them. Flush durable state and leave.
    if let Err(e) = store.checkpoint() {
        warn!(error = %e, "final checkpoint failed; journal remains authoritative");
    }
    info!("vead stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Tracing to stderr and a daily-rotated file under the data dir.
fn init_tracing(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_appender = tracing_appender::rolling::daily(&config.data_dir, "vead.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    guard
}
