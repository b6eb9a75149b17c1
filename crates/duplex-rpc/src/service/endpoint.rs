//! Endpoint: one end of a duplex RPC channel.
//!
//! Each end plays both roles at once: it exposes handlers the other side can
//! call, and it calls handlers the other side exposes.

use crate::domain::config::{ConfigError, RpcConfig};
use crate::domain::context::RuntimeContext;
use crate::domain::token::CallableRef;
use crate::domain::value::{Buffer, Callable, Value};
use crate::ports::{ChannelReceiver, ChannelSender};
use crate::service::collector::{self, SweepScheduler};
use crate::service::dispatcher;
use crate::service::tracker::{self, CallHandle};
use crate::stats::{RpcStats, StatsSnapshot};
use crate::transform::view::RemoteFn;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::info;

/// State shared between the endpoint, its dispatcher, timers and stubs.
///
/// Only the [`Endpoint`] holds it strongly; everything else holds a weak
/// reference and stops once the endpoint is gone.
pub(crate) struct Shared {
    pub(crate) context: Mutex<RuntimeContext>,
    pub(crate) sender: Box<dyn ChannelSender>,
    pub(crate) config: RpcConfig,
    pub(crate) stats: RpcStats,
    pub(crate) collector: SweepScheduler,
    pub(crate) runtime: Handle,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Buffers to move rather than copy
    pub transfer: Vec<Buffer>,
    /// Overrides the endpoint's default timeout
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transfer(mut self, transfer: Vec<Buffer>) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One end of a duplex RPC channel.
pub struct Endpoint {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
}

impl Endpoint {
    /// Create the runtime context and start the dispatcher.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        sender: impl ChannelSender + 'static,
        receiver: impl ChannelReceiver + 'static,
        config: RpcConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let runtime = Handle::current();
        let shared = Arc::new(Shared {
            context: Mutex::new(RuntimeContext::new()),
            sender: Box::new(sender),
            config,
            stats: RpcStats::default(),
            collector: SweepScheduler::default(),
            runtime: runtime.clone(),
        });

        let dispatcher = runtime.spawn(dispatcher::run(
            Arc::downgrade(&shared),
            Box::new(receiver),
        ));

        Ok(Self { shared, dispatcher })
    }

    // =========================================================================
    // CALLEE SIDE
    // =========================================================================

    /// Register named handlers.
    ///
    /// Reopens the endpoint after a connection failure.
    pub fn expose<I, K>(&self, handlers: I)
    where
        I: IntoIterator<Item = (K, Callable)>,
        K: Into<String>,
    {
        let mut ctx = self.shared.context.lock();
        let was_closed = ctx.is_closed();
        ctx.reopen();

        let mut count = 0;
        for (name, handler) in handlers {
            ctx.register(name, handler);
            count += 1;
        }

        info!(count, reopened = was_closed, "Exposed handlers");
    }

    /// Register a callable and return its transportable reference.
    ///
    /// With a `name`, the callable is registered under it (replacing any
    /// previous entry) and never collected. Without one it keeps a name it
    /// was pinned under, or gets a fresh ephemeral name.
    pub fn pin(&self, callable: &Callable, name: Option<&str>) -> CallableRef {
        let prefix = &self.shared.config.ephemeral_prefix;
        let mut ctx = self.shared.context.lock();
        let name = match name {
            Some(name) => {
                ctx.register(name, callable.clone());
                name.to_string()
            }
            None => match ctx.pinned_name_of(callable, prefix) {
                Some(pinned) => pinned,
                None => ctx.register_ephemeral(callable.clone(), prefix),
            },
        };
        CallableRef::new(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.shared.context.lock().unregister(name).is_some()
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.shared.context.lock().has_handler(name)
    }

    pub fn handler_count(&self) -> usize {
        self.shared.context.lock().handler_count()
    }

    // =========================================================================
    // CALLER SIDE
    // =========================================================================

    /// Call `name` on the other side with the default options.
    pub fn call(&self, name: &str, args: Vec<Value>) -> CallHandle {
        self.call_with(name, args, CallOptions::default())
    }

    pub fn call_with(&self, name: &str, args: Vec<Value>, options: CallOptions) -> CallHandle {
        tracker::issue_call(
            &self.shared,
            name,
            args,
            options.transfer,
            options.timeout,
        )
    }

    /// A reusable stub for the remote handler `name`.
    pub fn method(&self, name: &str) -> RemoteFn {
        RemoteFn::new(name, Arc::downgrade(&self.shared))
    }

    pub fn pending_count(&self) -> usize {
        self.shared.context.lock().pending_count()
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    /// Run a collection pass immediately. Returns the evicted names.
    pub fn sweep_now(&self) -> Vec<String> {
        collector::run_sweep(&self.shared)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &RpcConfig {
        &self.shared.config
    }

    /// True after a connection failure until the next [`expose`](Self::expose).
    pub fn is_closed(&self) -> bool {
        self.shared.context.lock().is_closed()
    }

    /// Fail outstanding calls and stop the dispatcher.
    pub fn shutdown(self) {
        let failed = self.shared.context.lock().fail_connection("endpoint shut down");
        info!(failed, "Endpoint shut down");
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.shared.collector.cancel();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("closed", &self.is_closed())
            .field("handlers", &self.handler_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}
