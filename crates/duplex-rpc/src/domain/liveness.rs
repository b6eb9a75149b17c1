//! Weak liveness tracking for ephemeral handlers.
//!
//! Records are keyed by handler identity and hold only a `Weak`, so the
//! handler registry stays the sole strong owner. A record whose handler
//! has been dropped is treated as absent.

use crate::domain::value::{Callable, HandlerFn};
use std::collections::HashMap;
use std::sync::Weak;
use tokio::time::Instant;

struct LivenessRecord {
    handler: Weak<HandlerFn>,
    last_used: Instant,
}

impl LivenessRecord {
    fn is_live(&self) -> bool {
        self.handler.strong_count() > 0
    }
}

/// Last-invocation timestamps for ephemeral handlers.
#[derive(Default)]
pub struct LivenessMap {
    records: HashMap<usize, LivenessRecord>,
}

impl LivenessMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a live record exists for this handler.
    pub fn contains(&self, handler: &Callable) -> bool {
        self.records
            .get(&handler.addr())
            .is_some_and(LivenessRecord::is_live)
    }

    /// Set the handler's timestamp, creating the record if needed.
    pub fn stamp(&mut self, handler: &Callable, now: Instant) {
        self.records.insert(
            handler.addr(),
            LivenessRecord {
                handler: handler.downgrade(),
                last_used: now,
            },
        );
    }

    /// Refresh the timestamp only when a record already exists.
    pub fn touch_if_tracked(&mut self, handler: &Callable, now: Instant) -> bool {
        if !self.contains(handler) {
            return false;
        }
        self.stamp(handler, now);
        true
    }

    pub fn last_used(&self, handler: &Callable) -> Option<Instant> {
        self.records
            .get(&handler.addr())
            .filter(|r| r.is_live())
            .map(|r| r.last_used)
    }

    pub fn forget(&mut self, handler: &Callable) {
        self.records.remove(&handler.addr());
    }

    /// Drop records whose handler no longer exists.
    pub fn prune(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_live());
        before - self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
