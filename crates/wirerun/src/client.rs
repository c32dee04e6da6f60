//! # Client Session
//!
//! Drives a client `Connection` over a transport. Unlike the server, a
//! client is usually pumped by the caller: queue requests on the
//! connection, then `roundtrip` or `dispatch_next` to exchange packets.

use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::config::Side;
use crate::connection::Connection;
use crate::error::CloseReason;
use crate::error::Error;
use crate::error::Result;
use crate::protocol::display::DisplayProxy;
use crate::transport::Transport;
use crate::transport::WirePacket;

pub struct ClientSession {
    conn: Connection,
    transport: Box<dyn Transport>,
    outbox: mpsc::UnboundedReceiver<WirePacket>,
}

impl ClientSession {
    pub fn connect(config: Config, transport: Box<dyn Transport>) -> Self {
        let config = Config { side: Side::Client, ..config };
        let (outlet, outbox) = mpsc::unbounded_channel();
        info!("client session started");
        Self { conn: Connection::new(config, outlet), transport, outbox }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn display(&self) -> DisplayProxy {
        self.conn.display()
    }

    /// Flushes the connection and writes every queued packet.
    pub async fn send_pending(&mut self) -> Result<()> {
        self.conn.flush();
        while let Ok(packet) = self.outbox.try_recv() {
            if let Err(e) = self.transport.send(packet).await {
                warn!(error = %e, "send failed");
                self.conn.close_with(CloseReason::TransportClosed);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Sends what is pending, then waits for one packet and dispatches it.
    pub async fn dispatch_next(&mut self) -> Result<()> {
        self.send_pending().await?;
        if !self.conn.is_open() {
            return Err(Error::Closed);
        }
        match self.transport.recv().await {
            Ok(Some(packet)) => self.conn.dispatch(packet),
            Ok(None) => {
                self.conn.close_with(CloseReason::TransportClosed);
                Err(Error::Closed)
            }
            Err(e) => {
                warn!(error = %e, "transport failed");
                self.conn.close_with(CloseReason::TransportClosed);
                Err(e.into())
            }
        }
    }

    /// Sends a `sync` and dispatches until the server answers it.
    ///
    /// Everything the server sent before the answer has been dispatched
    /// when this returns.
    pub async fn roundtrip(&mut self) -> Result<u32> {
        // Removals announced before this point can no longer race a bind.
        self.conn.globals_mut().prune_removed();
        let mut done = self.conn.sync()?;
        loop {
            let step = self.dispatch_next().await;
            if let Some(result) = done.try_take() {
                debug!(?result, "roundtrip complete");
                return result;
            }
            step?;
        }
    }

    /// Dispatches until the connection closes.
    pub async fn run(mut self) -> CloseReason {
        while self.conn.is_open() {
            if let Err(e) = self.dispatch_next().await {
                debug!(error = %e, "client dispatch stopped");
            }
        }
        self.conn.close_reason().cloned().unwrap_or(CloseReason::Requested)
    }
}
