//! # Duplex-RPC Demo
//!
//! Runs a coordinator and a worker on separate threads, each with its own
//! single-threaded runtime, joined by a serialized in-memory channel.
//!
//! Environment:
//! - `DUPLEX_RPC_CONFIG`: path to a JSON [`RpcConfig`] file
//! - `DUPLEX_RPC_TIMEOUT_MS`: overrides the default call timeout
//! - `RUST_LOG`: log filter (default `info`)

use anyhow::{anyhow, Context, Result};
use duplex_rpc::{
    Callable, CallOptions, ChannelEnd, Endpoint, HandlerError, MemoryChannel, RpcConfig, RpcError,
    Value,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Load configuration from an optional file and environment overrides.
fn load_config() -> Result<RpcConfig> {
    let mut config = match std::env::var("DUPLEX_RPC_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("invalid config file {path}"))?
        }
        Err(_) => RpcConfig::default(),
    };

    if let Ok(ms) = std::env::var("DUPLEX_RPC_TIMEOUT_MS") {
        match ms.parse() {
            Ok(ms) => config.default_timeout = Duration::from_millis(ms),
            Err(_) => warn!("DUPLEX_RPC_TIMEOUT_MS must be a whole number of milliseconds"),
        }
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// WORKER
// =============================================================================

fn worker_handlers() -> Vec<(&'static str, Callable)> {
    let add = Callable::new(|args| async move {
        let mut sum: i64 = 0;
        for (i, arg) in args.values().iter().enumerate() {
            sum += arg
                .as_i64()
                .ok_or_else(|| HandlerError::invalid_argument(i, "integer"))?;
        }
        Ok(Value::from(sum))
    });

    let resize = Callable::new(|args| async move {
        let width = args
            .arg(0)?
            .as_i64()
            .ok_or_else(|| HandlerError::invalid_argument(0, "integer"))?;
        let height = args
            .arg(1)?
            .as_i64()
            .ok_or_else(|| HandlerError::invalid_argument(1, "integer"))?;
        let on_progress = args
            .arg(2)?
            .into_fn()
            .ok_or_else(|| HandlerError::invalid_argument(2, "callable"))?;

        for pct in [25, 50, 75, 100] {
            on_progress.call(vec![Value::from(pct)]).await?;
        }

        Ok(Value::record([
            ("width", Value::from(width)),
            ("height", Value::from(height)),
            ("area", Value::from(width * height)),
        ]))
    });

    let make_counter = Callable::new(|_| async move {
        let count = Arc::new(AtomicI64::new(0));
        Ok(Value::callable(move |_| {
            let count = Arc::clone(&count);
            async move { Ok(Value::from(count.fetch_add(1, Ordering::Relaxed) + 1)) }
        }))
    });

    let slow = Callable::new(|_| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Value::from("done"))
    });

    vec![
        ("add", add),
        ("resize", resize),
        ("make_counter", make_counter),
        ("slow", slow),
    ]
}

async fn serve(end: ChannelEnd, config: RpcConfig, done: oneshot::Receiver<()>) -> Result<()> {
    let (sender, receiver) = end.split();
    let worker = Endpoint::spawn(sender, receiver, config)?;
    worker.expose(worker_handlers());
    info!(handlers = worker.handler_count(), "[worker] Ready");

    let _ = done.await;
    info!(stats = ?worker.stats(), "[worker] Finished");
    Ok(())
}

fn run_worker(end: ChannelEnd, config: RpcConfig, done: oneshot::Receiver<()>) -> Result<()> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(serve(end, config, done))
}

// =============================================================================
// COORDINATOR
// =============================================================================

async fn exercise(coordinator: &Endpoint) -> Result<()> {
    let sum = coordinator
        .call("add", vec![Value::from(2), Value::from(3), Value::from(37)])
        .await?;
    info!(sum = ?sum.as_i64(), "[coordinator] add");

    let on_progress = Callable::new(|args| async move {
        let pct = args.arg(0)?.as_i64().unwrap_or_default();
        info!(pct, "[coordinator] resize progress");
        Ok(Value::Null)
    });
    let resized = coordinator
        .call(
            "resize",
            vec![Value::from(640), Value::from(480), Value::Callable(on_progress)],
        )
        .await?;
    let area = resized
        .as_view()
        .and_then(|view| view.get("area"))
        .and_then(|area| area.as_i64());
    info!(area = ?area, "[coordinator] resize");

    let counter = coordinator
        .call("make_counter", vec![])
        .await?
        .into_fn()
        .ok_or_else(|| anyhow!("make_counter did not return a callable"))?;
    for _ in 0..3 {
        let n = counter.call(vec![]).await?;
        info!(n = ?n.as_i64(), "[coordinator] counter");
    }

    let options = CallOptions::new().with_timeout(Duration::from_millis(50));
    match coordinator.call_with("slow", vec![], options).await {
        Err(err @ RpcError::Timeout { .. }) => info!(%err, "[coordinator] slow call timed out"),
        other => warn!(?other, "[coordinator] expected a timeout"),
    }

    match coordinator.call("missing", vec![]).await {
        Err(err @ RpcError::HandlerNotFound { .. }) => info!(%err, "[coordinator] missing handler"),
        other => warn!(?other, "[coordinator] expected handler not found"),
    }

    Ok(())
}

async fn coordinate(end: ChannelEnd, config: RpcConfig, done: oneshot::Sender<()>) -> Result<()> {
    let (sender, receiver) = end.split();
    let coordinator = Endpoint::spawn(sender, receiver, config)?;

    let outcome = exercise(&coordinator).await;

    let stats = serde_json::to_string(&coordinator.stats())?;
    info!(%stats, "[coordinator] Finished");
    let _ = done.send(());
    coordinator.shutdown();
    outcome
}

fn run_coordinator(end: ChannelEnd, config: RpcConfig, done: oneshot::Sender<()>) -> Result<()> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(coordinate(end, config, done))
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let config = load_config()?;
    info!(
        timeout_ms = config.default_timeout.as_millis() as u64,
        grace_ms = config.grace_period.as_millis() as u64,
        "Starting duplex-rpc demo"
    );

    let (coordinator_end, worker_end) = MemoryChannel::serialized_pair();
    let (done_tx, done_rx) = oneshot::channel();

    let worker_config = config.clone();
    let worker = thread::Builder::new()
        .name("worker".into())
        .spawn(move || run_worker(worker_end, worker_config, done_rx))?;
    let coordinator = thread::Builder::new()
        .name("coordinator".into())
        .spawn(move || run_coordinator(coordinator_end, config, done_tx))?;

    coordinator
        .join()
        .map_err(|_| anyhow!("coordinator thread panicked"))??;
    worker
        .join()
        .map_err(|_| anyhow!("worker thread panicked"))??;

    info!("Demo complete");
    Ok(())
}
