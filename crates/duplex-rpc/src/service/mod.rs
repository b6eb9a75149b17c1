//! Endpoint services: request tracker, message dispatcher and ephemeral
//! handler collector, tied together by [`Endpoint`].

pub mod collector;
pub mod dispatcher;
pub mod endpoint;
pub mod tracker;

pub use collector::sweep;
pub use endpoint::{CallOptions, Endpoint};
pub use tracker::CallHandle;
