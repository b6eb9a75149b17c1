//! Payload transform: marshalling local graphs for transport and
//! unmarshalling received payloads into read-through views.

pub mod marshal;
pub mod view;

pub use marshal::{marshal, Marshalled};
pub use view::{Received, RemoteFn, View};
