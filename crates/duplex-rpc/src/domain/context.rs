//! Per-channel runtime context.
//!
//! Owns the handler registry, the table of in-flight outbound calls and the
//! liveness map. Exactly one context exists per endpoint; it is mutated only
//! by that endpoint's dispatcher, tracker and collector.

use crate::domain::correlation::{random_suffix, CorrelationId};
use crate::domain::liveness::LivenessMap;
use crate::domain::value::Callable;
use crate::error::{RpcError, RpcResult};
use crate::transform::view::Received;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

const EPHEMERAL_SUFFIX_LEN: usize = 11;

/// An outstanding outbound call.
pub(crate) struct PendingEntry {
    /// Target handler name (for errors and logging)
    pub(crate) name: String,
    /// Completion half of the caller's result handle
    completer: oneshot::Sender<RpcResult<Received>>,
    /// When the call was issued
    pub(crate) created_at: Instant,
    /// Timeout timer, cancelled on completion
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    pub(crate) fn new(
        name: impl Into<String>,
        completer: oneshot::Sender<RpcResult<Received>>,
    ) -> Self {
        Self {
            name: name.into(),
            completer,
            created_at: Instant::now(),
            timer: None,
        }
    }

    /// Fulfill or fail the call. Returns false if the caller went away.
    pub(crate) fn complete(self, outcome: RpcResult<Received>) -> bool {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.completer.send(outcome).is_ok()
    }
}

/// Mutable state of one channel end.
#[derive(Default)]
pub struct RuntimeContext {
    handlers: HashMap<String, Callable>,
    pending: HashMap<CorrelationId, PendingEntry>,
    liveness: LivenessMap,
    closed: bool,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // HANDLER REGISTRY
    // =========================================================================

    /// Register under a caller-chosen name, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, handler: Callable) -> Option<Callable> {
        let replaced = self.handlers.insert(name.into(), handler);
        if let Some(old) = &replaced {
            self.liveness.forget(old);
        }
        replaced
    }

    /// Register under a freshly generated `prefix`-named entry.
    pub fn register_ephemeral(&mut self, handler: Callable, prefix: &str) -> String {
        let mut name = format!("{prefix}{}", random_suffix(EPHEMERAL_SUFFIX_LEN));
        while self.handlers.contains_key(&name) {
            name = format!("{prefix}{}", random_suffix(EPHEMERAL_SUFFIX_LEN));
        }
        self.handlers.insert(name.clone(), handler);
        name
    }

    pub fn unregister(&mut self, name: &str) -> Option<Callable> {
        let removed = self.handlers.remove(name)?;
        self.liveness.forget(&removed);
        Some(removed)
    }

    pub fn handler(&self, name: &str) -> Option<Callable> {
        self.handlers.get(name).cloned()
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Name under which this exact callable is registered, if any.
    pub fn name_of(&self, handler: &Callable) -> Option<String> {
        self.handlers
            .iter()
            .find(|(_, registered)| registered.ptr_eq(handler))
            .map(|(name, _)| name.clone())
    }

    /// Name under which this callable is registered outside the ephemeral
    /// namespace, if any.
    pub fn pinned_name_of(&self, handler: &Callable, ephemeral_prefix: &str) -> Option<String> {
        self.handlers
            .iter()
            .find(|(name, registered)| {
                !name.starts_with(ephemeral_prefix) && registered.ptr_eq(handler)
            })
            .map(|(name, _)| name.clone())
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn handlers_with_prefix(&self, prefix: &str) -> Vec<(String, Callable)> {
        self.handlers
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, handler)| (name.clone(), handler.clone()))
            .collect()
    }

    // =========================================================================
    // PENDING CALLS
    // =========================================================================

    /// A correlation ID not currently in use.
    pub fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId::generate_unique(|id| self.pending.contains_key(id))
    }

    pub(crate) fn insert_pending(&mut self, reqid: CorrelationId, entry: PendingEntry) {
        self.pending.insert(reqid, entry);
    }

    /// Attach the timeout timer. Returns false if the call already finished.
    pub(crate) fn attach_timer(&mut self, reqid: &CorrelationId, timer: AbortHandle) -> bool {
        match self.pending.get_mut(reqid) {
            Some(entry) => {
                entry.timer = Some(timer);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_pending(&mut self, reqid: &CorrelationId) -> Option<PendingEntry> {
        self.pending.remove(reqid)
    }

    pub fn is_pending(&self, reqid: &CorrelationId) -> bool {
        self.pending.contains_key(reqid)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // =========================================================================
    // LIVENESS
    // =========================================================================

    pub fn liveness(&self) -> &LivenessMap {
        &self.liveness
    }

    pub fn liveness_mut(&mut self) -> &mut LivenessMap {
        &mut self.liveness
    }

    // =========================================================================
    // CONNECTION STATE
    // =========================================================================

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn reopen(&mut self) {
        self.closed = false;
    }

    /// Fail every pending call and clear the registry.
    ///
    /// Returns the number of calls failed.
    pub(crate) fn fail_connection(&mut self, reason: &str) -> usize {
        self.closed = true;
        self.handlers.clear();
        self.liveness.clear();

        let failed = self.pending.len();
        for (_, entry) in self.pending.drain() {
            entry.complete(Err(RpcError::connection(reason)));
        }
        failed
    }
}
