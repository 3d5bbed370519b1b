//! Vigil - health-check and remediation engine
//!
//! Runs configured checks against HTTP endpoints, TCP ports, TLS
//! certificates, local resources and orchestrator-reported state, and
//! applies at most one remediation per fault with a cooldown.

mod collab;
mod config;
mod policy;
mod probe;
mod remediation;
mod scheduler;
mod sink;
mod task;
mod web;

use collab::Collaborators;
use config::{load_checks, ServerConfig};
use scheduler::{Registry, Scheduler};
use sink::{spawn_dispatcher, LogSink, MemorySink, NotifierSink, ResultSink, SinkHandle};
use web::Server;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Loading checks from {}", cfg.config_path.display());
    let checks = load_checks(&cfg.config_path)?;

    let collab = Collaborators::from_config(&cfg)?;
    let registry = Registry::build(&checks, &collab)?;

    // Result sinks
    let events = Arc::new(MemorySink::new(cfg.event_history));
    let mut sinks: Vec<Arc<dyn ResultSink>> = vec![Arc::new(LogSink), events.clone()];
    if cfg.webhook_url.is_some() {
        // notify remediations already announce CRITICAL for their checks
        let notifier = NotifierSink::new(collab.notifier.clone()).self_notifying(registry.notifying());
        sinks.push(Arc::new(notifier));
    }
    let (sink, rx) = SinkHandle::channel(cfg.event_buffer);
    let dispatcher = spawn_dispatcher(rx, sinks);

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(registry, cfg.workers, sink));
    scheduler.start();

    // Start status API
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let web = if cfg.http_port == 0 {
        tracing::info!("Status API disabled");
        None
    } else {
        let server = Server::new(cfg.clone(), scheduler.clone(), events);
        Some(tokio::spawn(server.start(async move {
            let _ = stop_rx.changed().await;
        })))
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown(cfg.shutdown_grace).await;

    let _ = stop_tx.send(true);
    if let Some(web) = web {
        match web.await {
            Ok(Err(e)) => tracing::error!("Status API failed: {}", e),
            Err(e) => tracing::error!("Status API task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    // Closing the last publisher lets the dispatcher drain and exit
    drop(scheduler);
    if tokio::time::timeout(Duration::from_secs(5), dispatcher).await.is_err() {
        tracing::warn!("Sink dispatcher did not drain in time");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
