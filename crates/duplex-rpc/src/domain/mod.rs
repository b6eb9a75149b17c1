//! Domain types: value graph, tokens, envelopes, configuration and the
//! per-channel runtime context.

pub mod config;
pub mod context;
pub mod correlation;
pub mod envelope;
pub mod liveness;
pub mod token;
pub mod value;

pub use config::{ConfigError, RpcConfig};
pub use context::RuntimeContext;
pub use correlation::CorrelationId;
pub use envelope::{Envelope, Payload, PROTOCOL_MARKER};
pub use liveness::LivenessMap;
pub use token::{CallableRef, TokenKind};
pub use value::{Buffer, Callable, HandlerFuture, List, Record, Value};
