//! Channel ports.
//!
//! The endpoint needs two things from its transport: a way to post a message
//! (optionally transferring buffers with it) and a stream of inbound events.
//! Delivery is asynchronous and best-effort; the transport gives no
//! acknowledgement and knows nothing about requests or results.

use crate::domain::envelope::Envelope;
use crate::domain::value::Buffer;
use crate::error::ChannelError;
use async_trait::async_trait;

/// A message as it travels over the channel.
#[derive(Clone, Debug)]
pub enum Message {
    /// Structured envelope handed over in-process
    Envelope(Envelope),
    /// Serialized frame; may be a protocol envelope or unrelated traffic
    Raw(serde_json::Value),
}

/// Inbound channel events.
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    Message(Message),
    /// Transport fault; the channel may still deliver later messages
    Error(String),
    /// The channel is gone for good
    Closed,
}

/// Posting side of a channel.
pub trait ChannelSender: Send + Sync {
    /// Post `message`, handing ownership of `transfer` to the other side.
    fn send(&self, message: Message, transfer: Vec<Buffer>) -> Result<(), ChannelError>;
}

/// Receiving side of a channel.
#[async_trait]
pub trait ChannelReceiver: Send {
    /// Next inbound event. Returns [`ChannelEvent::Closed`] once the channel
    /// is gone and keeps returning it afterwards.
    async fn recv(&mut self) -> ChannelEvent;
}
