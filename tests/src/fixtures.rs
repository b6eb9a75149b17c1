//! Test fixtures: connected endpoint pairs and common handlers.

use duplex_rpc::{Callable, Endpoint, FaultInjector, HandlerError, MemoryChannel, RpcConfig, Value};
use std::time::Duration;

/// Which in-memory channel connects the two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    /// Envelopes handed over as-is
    Structured,
    /// Envelopes pushed through the JSON codec
    Serialized,
}

pub const WIRES: [Wire; 2] = [Wire::Structured, Wire::Serialized];

/// Two connected endpoints plus fault handles for each side.
pub struct Harness {
    pub coordinator: Endpoint,
    pub worker: Endpoint,
    pub coordinator_faults: FaultInjector,
    pub worker_faults: FaultInjector,
}

/// Connect a coordinator and a worker. Must run inside a tokio runtime.
pub fn connect(wire: Wire, config: RpcConfig) -> Harness {
    let (a, b) = match wire {
        Wire::Structured => MemoryChannel::pair(),
        Wire::Serialized => MemoryChannel::serialized_pair(),
    };
    let coordinator_faults = a.fault_injector();
    let worker_faults = b.fault_injector();
    let (a_tx, a_rx) = a.split();
    let (b_tx, b_rx) = b.split();

    Harness {
        coordinator: Endpoint::spawn(a_tx, a_rx, config.clone()).expect("valid config"),
        worker: Endpoint::spawn(b_tx, b_rx, config).expect("valid config"),
        coordinator_faults,
        worker_faults,
    }
}

/// Returns null.
pub fn noop() -> Callable {
    Callable::new(|_| async { Ok(Value::Null) })
}

/// Returns its first argument, materialized.
pub fn echo() -> Callable {
    Callable::new(|args| async move { Ok(args.arg(0)?.into_value()) })
}

/// Never completes.
pub fn hang() -> Callable {
    Callable::new(|_| async {
        futures::future::pending::<()>().await;
        Ok(Value::Null)
    })
}

/// Sleeps for `delay`, then returns `"done"`.
pub fn sleeper(delay: Duration) -> Callable {
    Callable::new(move |_| async move {
        tokio::time::sleep(delay).await;
        Ok(Value::from("done"))
    })
}

/// Sums integer arguments.
pub fn adder() -> Callable {
    Callable::new(|args| async move {
        let mut sum: i64 = 0;
        for (i, arg) in args.values().iter().enumerate() {
            sum += arg
                .as_i64()
                .ok_or_else(|| HandlerError::invalid_argument(i, "integer"))?;
        }
        Ok(Value::from(sum))
    })
}
