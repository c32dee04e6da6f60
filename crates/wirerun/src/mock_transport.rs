//! Mock transports for testing.
//!
//! These are used by the test suites and are not part of the supported API.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::transport::WirePacket;

/// A duplex channel transport using tokio mpsc channels.
///
/// Packets sent on one end appear on the peer's `recv()` and vice versa.
pub struct DuplexChannelTransport {
    tx: mpsc::UnboundedSender<WirePacket>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WirePacket>>>,
}

impl DuplexChannelTransport {
    /// Creates a transport from separate tx and rx channels.
    pub fn new(
        tx: mpsc::UnboundedSender<WirePacket>,
        rx: mpsc::UnboundedReceiver<WirePacket>,
    ) -> Self {
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Creates a pair of transports connected to each other.
    ///
    /// Packets sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self::new(tx_a, rx_b);
        let b = Self::new(tx_b, rx_a);

        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, packet: WirePacket) -> transport::Result<()> {
        self.tx
            .send(packet)
            .map_err(|_| TransportError::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<WirePacket>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
