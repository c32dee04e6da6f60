//! # Bridge
//!
//! Couples a remote client to two servers at once: a local `Connection`
//! implementing some interfaces in-process, and a native compositor that
//! implements the rest. Requests are split per frame by an
//! `InterceptorChain`; native events are observed by the same chain on
//! their way back to the client.
//!
//! ```text
//!              +--> local Connection --+
//! client --> chain                     +--> client
//!              +--> NativeCompositor --+
//! ```

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use wirepack::FrameIter;
use wirepack::Handle;
use wirepack::ObjectId;

use crate::config::Config;
use crate::config::Side;
use crate::connection::Connection;
use crate::error::CloseReason;
use crate::error::Error;
use crate::error::Result;
use crate::interceptor::Destination;
use crate::interceptor::InterceptorChain;
use crate::transport::WirePacket;

/// Server ids requested from the native side at a time.
const SERVER_ID_BATCH: usize = 64;

/// The local connection asks for more ids below this many.
const SERVER_ID_LOW_WATER: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeDisplayId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeClientId(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeLifecycle {
    ClientCreated(NativeClientId),
    ClientDestroyed(NativeClientId),
    GlobalCreated { name: u32, interface: String, version: u32 },
    GlobalDestroyed { name: u32 },
}

/// An out-of-process or foreign compositor the bridge forwards to.
pub trait NativeCompositor: Send {
    fn create_display(&mut self) -> anyhow::Result<NativeDisplayId>;
    fn destroy_display(&mut self, display: NativeDisplayId);
    fn create_client(&mut self, display: NativeDisplayId) -> anyhow::Result<NativeClientId>;
    fn destroy_client(&mut self, client: NativeClientId);

    /// Number of handles a request frame on `object` with `opcode` carries.
    fn request_handles(&self, client: NativeClientId, object: ObjectId, opcode: u16) -> usize;

    /// Delivers one request frame and its handles.
    fn push_requests(&mut self, client: NativeClientId, bytes: &[u8], handles: Vec<Handle>) -> anyhow::Result<()>;

    /// Takes the next batch of events for `client`, if any.
    fn pull_events(&mut self, client: NativeClientId) -> anyhow::Result<Option<WirePacket>>;

    fn drain_lifecycle(&mut self) -> Vec<NativeLifecycle>;

    /// Reserves `count` server-allocated ids of `client` that the native
    /// side will never use itself.
    fn server_object_ids(&mut self, client: NativeClientId, count: usize) -> anyhow::Result<Vec<u32>>;
}

/// Somewhere a request frame can be delivered.
pub trait MessageSink {
    fn deliver(&mut self, frame: &[u8], handles: Vec<Handle>) -> Result<()>;
}

impl MessageSink for Connection {
    fn deliver(&mut self, frame: &[u8], handles: Vec<Handle>) -> Result<()> {
        self.dispatch(WirePacket::new(frame.to_vec(), handles))?;
        self.flush();
        Ok(())
    }
}

/// One native client viewed as a `MessageSink`.
pub struct NativeSink<'a, N: ?Sized> {
    native: &'a mut N,
    client: NativeClientId,
}

impl<'a, N: NativeCompositor + ?Sized> NativeSink<'a, N> {
    pub fn new(native: &'a mut N, client: NativeClientId) -> Self {
        Self { native, client }
    }
}

impl<N: NativeCompositor + ?Sized> MessageSink for NativeSink<'_, N> {
    fn deliver(&mut self, frame: &[u8], handles: Vec<Handle>) -> Result<()> {
        self.native.push_requests(self.client, frame, handles).map_err(Error::Native)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SinkOrder {
    #[default]
    NativeFirst,
    LocalFirst,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OnFailure {
    /// Stop at the first failing sink; the second sink never sees the frame.
    #[default]
    Abort,
    /// Deliver to both sinks regardless, then report the first failure.
    Continue,
}

/// How a frame routed to `Destination::Both` reaches the two sinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BothPolicy {
    pub order: SinkOrder,
    pub on_failure: OnFailure,
}

#[derive(Clone, Copy)]
enum Sink {
    Local,
    Native,
}

pub struct Bridge<N: NativeCompositor> {
    native: N,
    display: NativeDisplayId,
    client: NativeClientId,
    local: Connection,
    local_outbox: mpsc::UnboundedReceiver<WirePacket>,
    chain: InterceptorChain,
    to_client: mpsc::UnboundedSender<WirePacket>,
    policy: BothPolicy,
}

impl<N: NativeCompositor> Bridge<N> {
    /// Creates a native display and client for one remote client, and the
    /// local server connection that shares its object space.
    ///
    /// `to_client` receives every event for the client, local and native.
    pub fn new(
        mut native: N,
        config: Config,
        chain: InterceptorChain,
        to_client: mpsc::UnboundedSender<WirePacket>,
    ) -> Result<Self> {
        let native_display = native.create_display()?;
        let client = match native.create_client(native_display) {
            Ok(client) => client,
            Err(e) => {
                native.destroy_display(native_display);
                return Err(e.into());
            }
        };
        let config = Config { side: Side::Server, ..config };
        let policy = config.both_policy;
        let (outlet, local_outbox) = mpsc::unbounded_channel();
        let local = Connection::new(config, outlet);

        let mut bridge = Self {
            native,
            display: native_display,
            client,
            local,
            local_outbox,
            chain,
            to_client,
            policy,
        };
        if let Err(e) = bridge.reserve_server_ids() {
            bridge.native.destroy_client(client);
            bridge.native.destroy_display(native_display);
            return Err(e);
        }
        info!(native_display = native_display.0, client = client.0, "bridge created");
        Ok(bridge)
    }

    pub fn local(&self) -> &Connection {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut Connection {
        &mut self.local
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn chain_mut(&mut self) -> &mut InterceptorChain {
        &mut self.chain
    }

    pub fn client(&self) -> NativeClientId {
        self.client
    }

    /// Routes every request frame of a client packet, then forwards what the
    /// local connection sent in response.
    pub fn route_requests(&mut self, packet: WirePacket) -> Result<()> {
        let routed = self.route_frames(packet);
        let forwarded = self.forward_local();
        routed?;
        forwarded.map(|_| ())
    }

    fn route_frames(&mut self, packet: WirePacket) -> Result<()> {
        let WirePacket { bytes, handles } = packet;
        let mut handles: VecDeque<Handle> = handles.into();
        for frame in FrameIter::new(&bytes) {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "malformed request, closing bridge");
                    self.local.close_with(CloseReason::Malformed(e.to_string()));
                    return Err(e.into());
                }
            };
            let count = self.native.request_handles(self.client, frame.header.object_id, frame.header.opcode);
            let count = count.min(handles.len());
            let frame_handles: Vec<Handle> = handles.drain(..count).collect();

            let destination = self.chain.intercept_request(&frame);
            debug!(object = frame.header.object_id.0, opcode = frame.header.opcode, ?destination, "route request");
            if destination != Destination::ForwardOnly {
                self.reserve_server_ids()?;
            }
            match destination {
                Destination::LocalOnly => self.deliver(Sink::Local, frame.bytes, frame_handles)?,
                Destination::ForwardOnly => self.deliver(Sink::Native, frame.bytes, frame_handles)?,
                Destination::Both => self.deliver_both(frame.bytes, frame_handles)?,
            }
        }
        Ok(())
    }

    fn deliver(&mut self, sink: Sink, frame: &[u8], handles: Vec<Handle>) -> Result<()> {
        match sink {
            Sink::Local => self.local.deliver(frame, handles),
            Sink::Native => NativeSink::new(&mut self.native, self.client).deliver(frame, handles),
        }
    }

    /// Both sinks get the frame and a copy of every handle reference.
    fn deliver_both(&mut self, frame: &[u8], handles: Vec<Handle>) -> Result<()> {
        let order = match self.policy.order {
            SinkOrder::NativeFirst => [Sink::Native, Sink::Local],
            SinkOrder::LocalFirst => [Sink::Local, Sink::Native],
        };
        let mut first_error = None;
        for sink in order {
            if let Err(e) = self.deliver(sink, frame, handles.clone()) {
                match self.policy.on_failure {
                    OnFailure::Abort => return Err(e),
                    OnFailure::Continue => {
                        warn!(error = %e, "sink failed, continuing");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Tops up the ids the local connection may give to objects it creates.
    ///
    /// Both sinks create objects in the same server id range of one client,
    /// so the local side only uses ids the native side reserved for it.
    fn reserve_server_ids(&mut self) -> Result<()> {
        if self.local.objects().reserved_ids_left() >= SERVER_ID_LOW_WATER {
            return Ok(());
        }
        let ids = self.native.server_object_ids(self.client, SERVER_ID_BATCH)?;
        debug!(count = ids.len(), "reserved server ids");
        self.local.reserve_ids(ids);
        Ok(())
    }

    /// Forwards every pending native event packet to the client.
    ///
    /// Returns the number of packets forwarded.
    pub fn route_events(&mut self) -> Result<usize> {
        let mut forwarded = 0;
        while let Some(packet) = self.native.pull_events(self.client)? {
            self.forward(packet)?;
            forwarded += 1;
        }
        Ok(forwarded + self.forward_local()?)
    }

    /// Flushes the local connection and forwards its packets to the client.
    ///
    /// Call after using `local_mut` to send events directly.
    pub fn forward_local(&mut self) -> Result<usize> {
        self.local.flush();
        let mut forwarded = 0;
        while let Ok(packet) = self.local_outbox.try_recv() {
            self.forward(packet)?;
            forwarded += 1;
        }
        Ok(forwarded)
    }

    /// Lets the chain observe each event, then sends the packet on.
    fn forward(&mut self, packet: WirePacket) -> Result<()> {
        for frame in FrameIter::new(&packet.bytes) {
            self.chain.handle_event(&frame?);
        }
        self.to_client.send(packet).map_err(|_| Error::Closed)
    }

    /// Applies native lifecycle changes and hands them back to the caller.
    pub fn handle_lifecycle(&mut self) -> Vec<NativeLifecycle> {
        let changes = self.native.drain_lifecycle();
        for change in &changes {
            match change {
                NativeLifecycle::ClientDestroyed(client) if *client == self.client => {
                    info!(client = client.0, "native client destroyed");
                    self.local.close_with(CloseReason::TransportClosed);
                }
                other => debug!(?other, "native lifecycle"),
            }
        }
        changes
    }

    /// Tears down the native side and closes the local connection.
    pub fn close(mut self) -> N {
        self.native.destroy_client(self.client);
        self.native.destroy_display(self.display);
        self.local.close();
        self.native
    }
}
