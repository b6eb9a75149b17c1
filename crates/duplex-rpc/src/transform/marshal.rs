//! Marshal: local value graph → transport payload.
//!
//! Aggregates are shadow-copied node by node. A visited cache keyed by node
//! identity is populated before recursing into children, so cycles and
//! shared sub-structure map onto the same shadow node. While a node is still
//! being walked its cache entry is a back-link, so the edge that closes a
//! cycle does not own the shadow and the shadow graph is freed with its
//! root.
//!
//! Callables are registered in the sender's handler registry and replaced by
//! tokens. A callable pinned under a chosen name keeps that name; any other
//! callable gets a fresh ephemeral name each time it is sent, so every send
//! starts its own grace window.

use crate::domain::context::RuntimeContext;
use crate::domain::envelope::Payload;
use crate::domain::token::CallableRef;
use crate::domain::value::{Buffer, List, Record, Value};
use std::collections::HashMap;

/// Result of marshalling: the payload plus the transferred resources to
/// hand to the channel alongside it.
#[derive(Debug)]
pub struct Marshalled {
    pub payload: Payload,
    pub transfer: Vec<Buffer>,
}

/// Marshal `value` for sending.
///
/// Buffers named in `transfer` are moved into the payload without copying
/// and their source handles are left detached; every other buffer is
/// copied.
pub fn marshal(
    ctx: &mut RuntimeContext,
    ephemeral_prefix: &str,
    value: &Value,
    transfer: &[Buffer],
) -> Marshalled {
    let mut walker = Walker {
        ctx,
        prefix: ephemeral_prefix,
        visited: HashMap::new(),
    };

    let mut moved = Vec::with_capacity(transfer.len());
    for buffer in transfer {
        if walker.visited.contains_key(&buffer.addr()) {
            continue;
        }
        let target = buffer.transfer();
        walker
            .visited
            .insert(buffer.addr(), Value::Buffer(target.clone()));
        moved.push(target);
    }

    let shadow = walker.walk(value);
    Marshalled {
        payload: Payload(shadow),
        transfer: moved,
    }
}

struct Walker<'a> {
    ctx: &'a mut RuntimeContext,
    prefix: &'a str,
    /// Original node address → shadow
    visited: HashMap<usize, Value>,
}

impl Walker<'_> {
    fn walk(&mut self, value: &Value) -> Value {
        match value {
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Ref(_) => value.clone(),

            Value::Buffer(buffer) => {
                if let Some(shadow) = self.visited.get(&buffer.addr()) {
                    return shadow.clone();
                }
                let shadow = Value::Buffer(buffer.copy());
                self.visited.insert(buffer.addr(), shadow.clone());
                shadow
            }

            Value::List(list) => {
                if let Some(shadow) = self.visited.get(&list.addr()) {
                    return shadow.clone();
                }
                let items = list.items();
                let shadow = List::with_capacity(items.len());
                self.visited
                    .insert(list.addr(), Value::List(shadow.back_link()));
                for item in &items {
                    let mapped = self.walk(item);
                    shadow.push(mapped);
                }
                self.visited.insert(list.addr(), Value::List(shadow.clone()));
                Value::List(shadow)
            }

            Value::Record(record) => {
                if let Some(shadow) = self.visited.get(&record.addr()) {
                    return shadow.clone();
                }
                let entries = record.entries();
                let shadow = Record::new();
                self.visited
                    .insert(record.addr(), Value::Record(shadow.back_link()));
                for (key, item) in &entries {
                    let mapped = self.walk(item);
                    shadow.insert(key.clone(), mapped);
                }
                self.visited
                    .insert(record.addr(), Value::Record(shadow.clone()));
                Value::Record(shadow)
            }

            Value::Callable(callable) => {
                if let Some(token) = self.visited.get(&callable.addr()) {
                    return token.clone();
                }
                let name = match self.ctx.pinned_name_of(callable, self.prefix) {
                    Some(name) => name,
                    None => self.ctx.register_ephemeral(callable.clone(), self.prefix),
                };
                let token = Value::Ref(CallableRef::new(name));
                self.visited.insert(callable.addr(), token.clone());
                token
            }
        }
    }
}
