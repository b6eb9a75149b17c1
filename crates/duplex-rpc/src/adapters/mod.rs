//! Channel adapters.

pub mod memory;

pub use memory::{ChannelEnd, FaultInjector, MemoryChannel, MemoryReceiver, MemorySender};
