//! In-memory channel adapter.
//!
//! Two connected ends over tokio unbounded channels. The structured pair
//! hands envelopes over as-is; the serialized pair pushes every envelope
//! through the JSON codec so the two sides share nothing.

use crate::codec;
use crate::domain::value::Buffer;
use crate::error::ChannelError;
use crate::ports::{ChannelEvent, ChannelReceiver, ChannelSender, Message};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

/// Factory for connected channel pairs.
pub struct MemoryChannel;

impl MemoryChannel {
    /// Connected pair handing envelopes over without encoding.
    pub fn pair() -> (ChannelEnd, ChannelEnd) {
        Self::connect(false)
    }

    /// Connected pair that encodes every envelope to JSON on send.
    pub fn serialized_pair() -> (ChannelEnd, ChannelEnd) {
        Self::connect(true)
    }

    fn connect(serialize: bool) -> (ChannelEnd, ChannelEnd) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            ChannelEnd::new(b_tx, a_rx, serialize),
            ChannelEnd::new(a_tx, b_rx, serialize),
        )
    }
}

/// One end of an in-memory channel.
pub struct ChannelEnd {
    sender: MemorySender,
    receiver: MemoryReceiver,
    faults: FaultInjector,
}

impl ChannelEnd {
    fn new(
        outbound: mpsc::UnboundedSender<Message>,
        inbound: mpsc::UnboundedReceiver<Message>,
        serialize: bool,
    ) -> Self {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Self {
            sender: MemorySender {
                outbound,
                serialize,
            },
            receiver: MemoryReceiver {
                inbound,
                faults: fault_rx,
                closed: false,
            },
            faults: FaultInjector { tx: fault_tx },
        }
    }

    /// Handle for reporting faults to this end's receiver.
    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    pub fn split(self) -> (MemorySender, MemoryReceiver) {
        (self.sender, self.receiver)
    }
}

/// Posting half of a [`ChannelEnd`].
#[derive(Clone, Debug)]
pub struct MemorySender {
    outbound: mpsc::UnboundedSender<Message>,
    serialize: bool,
}

impl ChannelSender for MemorySender {
    fn send(&self, message: Message, transfer: Vec<Buffer>) -> Result<(), ChannelError> {
        let message = match message {
            Message::Envelope(envelope) if self.serialize => Message::Raw(
                codec::encode_envelope(&envelope)
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))?,
            ),
            message => message,
        };

        // Transferred buffers already travel inside the envelope
        trace!(transferred = transfer.len(), "Posting message");
        self.outbound.send(message).map_err(|_| ChannelError::Closed)
    }
}

/// Receiving half of a [`ChannelEnd`].
#[derive(Debug)]
pub struct MemoryReceiver {
    inbound: mpsc::UnboundedReceiver<Message>,
    faults: mpsc::UnboundedReceiver<ChannelEvent>,
    closed: bool,
}

#[async_trait]
impl ChannelReceiver for MemoryReceiver {
    async fn recv(&mut self) -> ChannelEvent {
        if self.closed {
            return ChannelEvent::Closed;
        }

        let event = tokio::select! {
            biased;
            Some(fault) = self.faults.recv() => fault,
            message = self.inbound.recv() => match message {
                Some(message) => ChannelEvent::Message(message),
                None => ChannelEvent::Closed,
            },
        };

        if matches!(event, ChannelEvent::Closed) {
            self.closed = true;
        }
        event
    }
}

/// Reports transport faults to one channel end.
#[derive(Clone, Debug)]
pub struct FaultInjector {
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl FaultInjector {
    /// Report a recoverable transport error.
    pub fn inject_error(&self, reason: impl Into<String>) {
        let _ = self.tx.send(ChannelEvent::Error(reason.into()));
    }

    /// Report the channel as closed.
    pub fn inject_close(&self) {
        let _ = self.tx.send(ChannelEvent::Closed);
    }
}
