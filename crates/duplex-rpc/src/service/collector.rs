//! Ephemeral handler collector.
//!
//! Sweeps are driven by traffic: every inbound message cancels the pending
//! sweep and schedules a new one a debounce window later, so a burst of
//! messages produces at most one sweep and an idle channel none.
//!
//! Only handlers whose name carries the ephemeral prefix are considered.
//! The first sweep to see a handler without a liveness record stamps it;
//! a later sweep evicts it once it has been idle for longer than the grace
//! period.

use crate::domain::context::RuntimeContext;
use crate::service::endpoint::Shared;
use crate::stats::RpcStats;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// One collection pass. Returns the names of the evicted handlers.
pub fn sweep(
    ctx: &mut RuntimeContext,
    now: Instant,
    grace: Duration,
    prefix: &str,
) -> Vec<String> {
    let mut evicted = Vec::new();

    for (name, handler) in ctx.handlers_with_prefix(prefix) {
        match ctx.liveness().last_used(&handler) {
            None => ctx.liveness_mut().stamp(&handler, now),
            Some(last) if now.saturating_duration_since(last) > grace => {
                ctx.unregister(&name);
                evicted.push(name);
            }
            Some(_) => {}
        }
    }

    ctx.liveness_mut().prune();
    evicted
}

/// Sweep an endpoint's context now.
pub(crate) fn run_sweep(shared: &Shared) -> Vec<String> {
    let evicted = {
        let mut ctx = shared.context.lock();
        sweep(
            &mut ctx,
            Instant::now(),
            shared.config.grace_period,
            &shared.config.ephemeral_prefix,
        )
    };

    if !evicted.is_empty() {
        RpcStats::add(&shared.stats.handlers_collected, evicted.len() as u64);
        info!(count = evicted.len(), "Collected idle ephemeral handlers");
    }
    evicted
}

/// Cancel-and-reschedule timer for the next sweep.
#[derive(Default)]
pub(crate) struct SweepScheduler {
    scheduled: Mutex<Option<AbortHandle>>,
}

impl SweepScheduler {
    /// Replace any scheduled sweep with one a full debounce window from now.
    pub(crate) fn reschedule(&self, shared: &Arc<Shared>) {
        let weak = Arc::downgrade(shared);
        let debounce = shared.config.sweep_debounce;

        let task = shared.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Some(shared) = weak.upgrade() {
                debug!("Running ephemeral handler sweep");
                run_sweep(&shared);
            }
        });

        if let Some(previous) = self.scheduled.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    pub(crate) fn cancel(&self) {
        if let Some(scheduled) = self.scheduled.lock().take() {
            scheduled.abort();
        }
    }
}
