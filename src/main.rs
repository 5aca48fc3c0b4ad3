//! swapd - Cross-chain atomic swap daemon
//!
//! Runs the swap task tree: an orchestrator persisting swaps and routing them
//! to a delayed and an immediate execution strategy, with match verification
//! against the order-matching ledger.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

mod binder;
mod config;
mod error;
mod metrics;
mod orchestrator;
mod store;
mod strategy;
mod swap;
mod task;

use binder::{Binder, EthLedger};
use config::Settings;
use metrics::MetricsServer;
use orchestrator::{Message, Orchestrator};
use store::SqliteSwapStore;
use strategy::{ExecutionStrategy, MatchExecutor, SwapExecutor};
use swap::StrategyKind;
use task::Task;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting swapd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!("Loaded configuration for instance {}", settings.daemon.instance_id);

    // Open swap store
    let store = Arc::new(SqliteSwapStore::open(&settings.database).await?);
    store.health_check().await?;
    info!("Swap store ready");

    // Match verification
    let binder = if settings.binder.enabled {
        let ledger = EthLedger::new(&settings.binder)?;
        let binder = Binder::new(
            Arc::new(ledger),
            &settings.binder.authorized_addresses,
            settings.binder.poll_interval(),
        )?;
        info!(
            "Binder enabled with {} authorized traders",
            settings.binder.authorized_addresses.len()
        );
        Some(Arc::new(binder))
    } else {
        None
    };
    let executor: Arc<dyn SwapExecutor> =
        Arc::new(MatchExecutor::new(binder, settings.binder.match_timeout()));

    // Build the task tree
    let capacity = settings.daemon.queue_capacity;
    let delayed = Task::new(
        "delayed",
        capacity,
        ExecutionStrategy::new(StrategyKind::Delayed, executor.clone()),
        vec![],
    );
    let immediate = Task::new(
        "immediate",
        capacity,
        ExecutionStrategy::new(StrategyKind::Immediate, executor),
        vec![],
    );
    let orchestrator = Orchestrator::new(store.clone(), delayed.input(), immediate.input());

    let shutdown = CancellationToken::new();
    let root = Task::new("orchestrator", capacity, orchestrator, vec![delayed, immediate])
        .spawn(&shutdown);
    if !root.send(Message::Bootload).await {
        return Err(anyhow!("Orchestrator stopped before bootload"));
    }
    let input = root.input();
    let (output, tree) = root.into_output();

    // Output drain, feeding results back through an unbounded relay
    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
    let relay_handle = tokio::spawn(relay(feedback_rx, input.clone(), shutdown.clone()));
    let drain_handle = tokio::spawn(drain(output, feedback_tx));

    // Heartbeat
    let ticker_handle = tokio::spawn(ticker(
        input.clone(),
        settings.daemon.tick_interval(),
        shutdown.clone(),
    ));

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("swapd is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    shutdown.cancel();
    tree.join_timeout(settings.daemon.shutdown_grace()).await;

    // Abort background tasks
    ticker_handle.abort();
    relay_handle.abort();
    drain_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("swapd stopped");
    Ok(())
}

/// Log the root output and route results back into the orchestrator
async fn drain(mut output: mpsc::Receiver<Message>, feedback: mpsc::UnboundedSender<Message>) {
    while let Some(batch) = output.recv().await {
        for message in batch.flatten() {
            match message {
                Message::Error(e) => error!("Orchestrator error: {}", e),
                Message::DelayedSwapRequest(blob) | Message::ImmediateSwapRequest(blob) => {
                    info!("Dispatched swap {} to {} strategy", blob.id, blob.strategy().name());
                }
                message @ (Message::ReceiptUpdate(_) | Message::SwapCompleted(_)) => {
                    if feedback.send(message).is_err() {
                        return;
                    }
                }
                other => debug!("Ignoring {} on output", other.kind()),
            }
        }
    }
}

/// Forward fed-back results into the root input, waiting for queue space
async fn relay(
    mut feedback: mpsc::UnboundedReceiver<Message>,
    input: mpsc::Sender<Message>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = feedback.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = input.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

async fn ticker(input: mpsc::Sender<Message>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if input.send(Message::Tick).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swapd=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
