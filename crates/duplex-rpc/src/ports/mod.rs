//! Ports: the channel primitive the endpoint is driven by.

pub mod outbound;

pub use outbound::{ChannelEvent, ChannelReceiver, ChannelSender, Message};
