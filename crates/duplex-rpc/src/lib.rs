//! # duplex-rpc
//!
//! Bidirectional RPC over a message-only channel between two isolated
//! execution contexts.
//!
//! ## Overview
//!
//! - **Symmetric**: each end exposes handlers and calls the other end's
//! - **Correlated**: results are matched to calls by correlation ID, with a
//!   per-call timeout
//! - **Embedded callables**: a callable anywhere inside arguments or a result
//!   crosses the channel as a reference token and arrives as a call stub
//! - **Lazy views**: received graphs are read through on access, cycles and
//!   shared sub-structure included
//! - **Collection**: anonymous handlers created for embedded callables are
//!   evicted once idle past a grace period
//!
//! ## Architecture
//!
//! ```text
//!  Endpoint A                                              Endpoint B
//! ┌──────────────────────┐                      ┌──────────────────────┐
//! │ call() ─→ marshal ─→ tracker ──Request──────→ dispatcher ─→ view    │
//! │                      │                      │        │              │
//! │                      │                      │   handler task        │
//! │                      │                      │        │              │
//! │ caller ←─ view ←─ dispatcher ←──Result────── marshal ←┘             │
//! │                      │                      │                       │
//! │ collector (debounced)│                      │ collector (debounced) │
//! └──────────────────────┘                      └──────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use duplex_rpc::{Callable, Endpoint, MemoryChannel, RpcConfig, Value};
//!
//! let (a, b) = MemoryChannel::pair();
//! let (a_tx, a_rx) = a.split();
//! let (b_tx, b_rx) = b.split();
//!
//! let worker = Endpoint::spawn(b_tx, b_rx, RpcConfig::default())?;
//! worker.expose([("double", Callable::new(|args| async move {
//!     Ok(Value::from(args.arg(0)?.as_i64().unwrap_or(0) * 2))
//! }))]);
//!
//! let coordinator = Endpoint::spawn(a_tx, a_rx, RpcConfig::default())?;
//! let result = coordinator.call("double", vec![Value::from(21)]).await?;
//! assert_eq!(result.as_i64(), Some(42));
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod codec;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;
pub mod stats;
pub mod transform;

// Re-export main types
pub use adapters::{ChannelEnd, FaultInjector, MemoryChannel, MemoryReceiver, MemorySender};
pub use codec::{decode_envelope, encode_envelope, MalformedEnvelope};
pub use domain::{
    Buffer, Callable, CallableRef, ConfigError, CorrelationId, Envelope, HandlerFuture, List,
    Payload, Record, RpcConfig, RuntimeContext, TokenKind, Value, PROTOCOL_MARKER,
};
pub use error::{codes, ChannelError, CodecError, HandlerError, RpcError, RpcResult};
pub use ports::{ChannelEvent, ChannelReceiver, ChannelSender, Message};
pub use service::{CallHandle, CallOptions, Endpoint};
pub use stats::{RpcStats, StatsSnapshot};
pub use transform::{Received, RemoteFn, View};

/// Default call timeout.
pub const DEFAULT_TIMEOUT: std::time::Duration = domain::config::DEFAULT_TIMEOUT;

/// Idle time after which an ephemeral handler may be collected.
pub const DEFAULT_GRACE_PERIOD: std::time::Duration = domain::config::DEFAULT_GRACE_PERIOD;
