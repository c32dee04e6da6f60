//! # Transport Abstraction
//!
//! A minimal, async interface for moving wire packets between two endpoints.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about objects, opcodes or
//!   signatures. It moves opaque buffers plus the handle references that ride
//!   next to them.
//! - **Packet-Preserving**: One `send` is one flush of a connection. Whatever
//!   was batched into a packet arrives as one packet, message-complete.

use std::fmt;

use wirepack::Handle;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One flushed batch of frames and the handles referenced by them, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WirePacket {
    pub bytes: Vec<u8>,
    pub handles: Vec<Handle>,
}

impl WirePacket {
    pub fn new(bytes: Vec<u8>, handles: Vec<Handle>) -> Self {
        Self { bytes, handles }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, handles: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.handles.is_empty()
    }
}

/// A bidirectional, ordered packet pipe.
///
/// This trait is designed to be object-safe (`Box<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one packet.
    ///
    /// # invariants
    /// - Packets are delivered to the peer in send order.
    /// - Must not split or merge packets.
    async fn send(&self, packet: WirePacket) -> Result<()>;

    /// Receives the next packet, or `None` once the peer has hung up.
    async fn recv(&self) -> Result<Option<WirePacket>>;
}
