//! Tests for connections, registries, interceptors and bridging, with two
//! connections wired back to back through their outlets.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use wirepack::Arg;
use wirepack::ArgKind;
use wirepack::FrameIter;
use wirepack::Handle;
use wirepack::HandleKind;
use wirepack::ObjectId;
use wirepack::RawFrame;
use wirepack::decode_args;
use wirepack::encode_message;

use crate::bridge::BothPolicy;
use crate::bridge::Bridge;
use crate::bridge::NativeClientId;
use crate::bridge::NativeCompositor;
use crate::bridge::NativeDisplayId;
use crate::bridge::NativeLifecycle;
use crate::bridge::OnFailure;
use crate::bridge::SinkOrder;
use crate::config::Config;
use crate::config::IdPolicy;
use crate::config::Side;
use crate::connection::Connection;
use crate::connection::State;
use crate::error::CloseReason;
use crate::error::Error;
use crate::error::Result;
use crate::global::Bind;
use crate::global::Global;
use crate::global::GlobalState;
use crate::global::GlobalTable;
use crate::global::Lookup;
use crate::handles::HandleDomain;
use crate::handles::HandleTable;
use crate::interceptor::Destination;
use crate::interceptor::Interceptor;
use crate::interceptor::InterceptorChain;
use crate::interceptor::NewInterceptors;
use crate::interceptor::RoutingTable;
use crate::interface::Dispatch;
use crate::interface::Inert;
use crate::interface::Interface;
use crate::interface::Message;
use crate::interface::MessageDesc;
use crate::objects::ObjectRegistry;
use crate::protocol::DISPLAY;
use crate::protocol::display;
use crate::protocol::registry;
use crate::mock_transport::DuplexChannelTransport;
use crate::proxy::Object;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::transport::WirePacket;

// ============================================================================
//  FIXTURES
// ============================================================================

const DESTROY: u16 = 0;
const PING: u16 = 1;
const ATTACH: u16 = 2;

const PONG: u16 = 0;
const BUFFER: u16 = 1;

static SURFACE: Interface = Interface {
    name: "test_surface",
    version: 2,
    requests: &[
        MessageDesc { name: "destroy", signature: &[], destructor: true },
        MessageDesc { name: "ping", signature: &[ArgKind::Uint], destructor: false },
        MessageDesc { name: "attach", signature: &[ArgKind::Handle, ArgKind::Uint], destructor: false },
    ],
    events: &[
        MessageDesc { name: "pong", signature: &[ArgKind::Uint], destructor: false },
        MessageDesc { name: "buffer", signature: &[ArgKind::Handle], destructor: false },
    ],
};

type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Answers every ping with a pong; a ping of zero is a protocol error.
struct SurfaceServer {
    pings: Log<u32>,
}

impl Dispatch for SurfaceServer {
    fn dispatch(&mut self, conn: &mut Connection, message: Message) -> Result<()> {
        let id = message.object;
        match message.opcode {
            DESTROY => Ok(()),
            PING => {
                let value = message.reader().uint()?;
                if value == 0 {
                    return Err(Error::application(id, 7, "ping of zero"));
                }
                self.pings.lock().unwrap().push(value);
                conn.marshal(id, PONG, &[Arg::Uint(value)])
            }
            ATTACH => {
                let mut args = message.reader();
                let handle = args.handle()?;
                let tag = args.uint()?;
                self.pings.lock().unwrap().push(handle.id * 100 + tag);
                Ok(())
            }
            opcode => Err(Error::UnknownOpcode { object: id, interface: SURFACE.name, opcode }),
        }
    }
}

struct SurfaceGlobal {
    pings: Log<u32>,
}

impl Bind for SurfaceGlobal {
    fn bind(&self, _conn: &mut Connection, _id: ObjectId, _version: u32) -> Result<Box<dyn Dispatch>> {
        Ok(Box::new(SurfaceServer { pings: self.pings.clone() }))
    }
}

/// Records pongs and the ids of buffer handles.
struct SurfaceClient {
    events: Log<u32>,
}

impl Dispatch for SurfaceClient {
    fn dispatch(&mut self, _conn: &mut Connection, message: Message) -> Result<()> {
        match message.opcode {
            PONG => {
                let value = message.reader().uint()?;
                self.events.lock().unwrap().push(value);
            }
            BUFFER => {
                let handle = message.reader().handle()?;
                self.events.lock().unwrap().push(handle.id);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Logs its own destruction.
struct Tracked {
    label: &'static str,
    log: Log<&'static str>,
}

impl Dispatch for Tracked {
    fn dispatch(&mut self, _conn: &mut Connection, _message: Message) -> Result<()> {
        Ok(())
    }

    fn destroyed(&mut self, _id: ObjectId) {
        self.log.lock().unwrap().push(self.label);
    }
}

/// One end of an in-memory connection.
struct Peer {
    conn: Connection,
    outbox: mpsc::UnboundedReceiver<WirePacket>,
}

impl Peer {
    fn new(config: Config) -> Self {
        let (outlet, outbox) = mpsc::unbounded_channel();
        Self { conn: Connection::new(config, outlet), outbox }
    }

    fn client() -> Self {
        Self::new(Config::client())
    }

    fn server() -> Self {
        Self::new(Config::server())
    }

    /// Flushes, then drains everything that left the connection.
    fn sent(&mut self) -> Vec<WirePacket> {
        self.conn.flush();
        let mut packets = Vec::new();
        while let Ok(packet) = self.outbox.try_recv() {
            packets.push(packet);
        }
        packets
    }
}

fn pump(from: &mut Peer, to: &mut Peer) -> Result<()> {
    for packet in from.sent() {
        to.conn.dispatch(packet)?;
    }
    Ok(())
}

fn server_with_surface_global(pings: &Log<u32>) -> Peer {
    let mut server = Peer::server();
    let binder = Arc::new(SurfaceGlobal { pings: pings.clone() });
    server.conn.announce_global(Global::implemented(1, &SURFACE, 2, binder)).unwrap();
    server
}

fn frame(object: u32, opcode: u16, args: &[Arg]) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_message(&mut buf, ObjectId(object), opcode, args, &mut Vec::new()).unwrap();
    buf
}

fn first_frame(buf: &[u8]) -> RawFrame<'_> {
    FrameIter::new(buf).next().unwrap().unwrap()
}

/// Finds a `display.error` event among sent packets.
fn display_error(packets: &[WirePacket]) -> Option<(ObjectId, u32, String)> {
    for packet in packets {
        for frame in FrameIter::new(&packet.bytes) {
            let frame = frame.ok()?;
            if frame.header.object_id != ObjectId::DISPLAY || frame.header.opcode != display::ERROR {
                continue;
            }
            let signature = DISPLAY.events[display::ERROR as usize].signature;
            let args = decode_args(&mut frame.cursor(), signature, &mut VecDeque::new()).ok()?;
            return Some((args[0].as_object()?, args[1].as_uint()?, args[2].as_str()?.to_string()));
        }
    }
    None
}

// ============================================================================
//  MARSHALLING
// ============================================================================

#[test]
fn test_display_is_object_one() {
    let client = Peer::client();
    assert!(client.conn.is_alive(ObjectId::DISPLAY));
    assert_eq!(client.conn.interface_of(ObjectId::DISPLAY), Some(&DISPLAY));
}

#[test]
fn test_marshal_waits_for_flush() -> Result<()> {
    let mut client = Peer::client();
    let registry = client.conn.display().get_registry(&mut client.conn, ())?;
    assert_eq!(registry.proxy().id(), ObjectId(2));
    assert_eq!(client.conn.pending_bytes(), 12);
    assert!(client.outbox.try_recv().is_err());

    let packets = client.sent();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].bytes, vec![1, 0, 0, 0, 1, 0, 12, 0, 2, 0, 0, 0]);
    assert_eq!(client.conn.pending_bytes(), 0);
    Ok(())
}

#[test]
fn test_marshal_checks_signature() {
    let mut client = Peer::client();
    let err = client.conn.marshal(ObjectId::DISPLAY, display::SYNC, &[Arg::Uint(3)]).unwrap_err();
    assert!(matches!(
        err,
        Error::Wire(wirepack::Error::ArgumentMismatch { index: 0, expected: ArgKind::NewId, found: ArgKind::Uint })
    ));

    let err = client.conn.marshal(ObjectId::DISPLAY, 9, &[]).unwrap_err();
    assert!(matches!(err, Error::UnknownOpcode { opcode: 9, .. }));

    let err = client.conn.marshal(ObjectId(40), 0, &[]).unwrap_err();
    assert!(matches!(err, Error::UnknownObject(ObjectId(40))));
    assert_eq!(client.conn.pending_bytes(), 0);
}

#[test]
fn test_message_too_large() -> Result<()> {
    let config = Config::builder(Side::Client).max_frame_size(64).build();
    let mut client = Peer::new(config);
    let registry = client.conn.display().get_registry(&mut client.conn, ())?;

    let args = [Arg::Uint(1), Arg::String("x".repeat(64)), Arg::Uint(1), Arg::NewId(9)];
    let err = registry.proxy().marshal(&mut client.conn, registry::BIND, &args).unwrap_err();
    assert!(matches!(err, Error::MessageTooLarge(92)));
    assert_eq!(client.conn.pending_bytes(), 12);
    Ok(())
}

#[test]
fn test_constructor_requires_placeholder() {
    let mut client = Peer::client();
    let err = client
        .conn
        .marshal_constructor(ObjectId::DISPLAY, display::SYNC, vec![Arg::NewId(5)], &SURFACE, 1, Box::new(Inert))
        .unwrap_err();
    assert!(matches!(err, Error::Wire(_)));
    assert!(!client.conn.is_alive(ObjectId(2)));
}

// ============================================================================
//  SYNC
// ============================================================================

#[test]
fn test_sync_roundtrip() -> Result<()> {
    let mut client = Peer::client();
    let mut server = Peer::server();

    let mut done = client.conn.sync()?;
    assert!(done.try_take().is_none());
    assert!(client.conn.is_alive(ObjectId(2)));

    pump(&mut client, &mut server)?;
    pump(&mut server, &mut client)?;

    assert_eq!(done.try_take().unwrap()?, 1);
    assert!(!client.conn.is_alive(ObjectId(2)));
    assert!(!client.conn.is_zombie(ObjectId(2)));
    assert!(!server.conn.is_alive(ObjectId(2)));
    Ok(())
}

#[test]
fn test_syncs_resolve_in_order() -> Result<()> {
    let mut client = Peer::client();
    let mut server = Peer::server();

    let mut first = client.conn.sync()?;
    let mut second = client.conn.sync()?;
    pump(&mut client, &mut server)?;
    pump(&mut server, &mut client)?;

    assert_eq!(first.try_take().unwrap()?, 1);
    assert_eq!(second.try_take().unwrap()?, 2);
    Ok(())
}

#[test]
fn test_answered_syncs_leave_no_server_zombies() -> Result<()> {
    let mut client = Peer::client();
    let mut server = Peer::server();

    for _ in 0..100 {
        client.conn.sync()?;
        pump(&mut client, &mut server)?;
        pump(&mut server, &mut client)?;
    }
    assert_eq!(server.conn.objects().zombie_count(), 0);
    assert_eq!(client.conn.objects().zombie_count(), 0);
    assert_eq!(server.conn.objects().live_ids(), vec![ObjectId::DISPLAY]);
    Ok(())
}

#[test]
fn test_close_cancels_sync() -> Result<()> {
    let mut client = Peer::client();
    let mut done = client.conn.sync()?;
    client.conn.close();
    assert!(matches!(done.try_take(), Some(Err(Error::Cancelled))));
    assert!(matches!(client.conn.sync(), Err(Error::Closed)));
    Ok(())
}

#[test]
fn test_recycled_ids_wait_for_delete_id() -> Result<()> {
    let config = Config::builder(Side::Client).id_policy(IdPolicy::Recycle).build();
    let mut client = Peer::new(config);
    let mut server = Peer::server();

    client.conn.sync()?;
    pump(&mut client, &mut server)?;
    // Server answered but the client has not seen delete_id yet.
    client.conn.sync()?;
    assert!(client.conn.is_alive(ObjectId(3)));

    pump(&mut server, &mut client)?;
    client.conn.sync()?;
    assert!(client.conn.is_alive(ObjectId(2)));
    Ok(())
}

// ============================================================================
//  DESTROY & CLOSE
// ============================================================================

#[test]
fn test_destroy_notifies_once_in_order() -> Result<()> {
    let mut client = Peer::client();
    let order = log();
    let tracked = Tracked { label: "hook", log: order.clone() };
    client.conn.register(ObjectId(5), &SURFACE, 1, Box::new(tracked))?;
    let proxy = client.conn.proxy(ObjectId(5)).unwrap();

    for label in ["first", "second"] {
        let order = order.clone();
        proxy.add_destroy_listener(&mut client.conn, move |_| order.lock().unwrap().push(label));
    }
    let mut rx = proxy.on_destroy(&mut client.conn);
    let third = order.clone();
    client.conn.add_destroy_listener(ObjectId(5), move |_| third.lock().unwrap().push("third"));

    proxy.destroy(&mut client.conn);
    proxy.destroy(&mut client.conn);

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third", "hook"]);
    assert_eq!(rx.try_recv().unwrap(), ObjectId(5));
    assert!(!proxy.is_alive(&client.conn));

    let late = Arc::new(AtomicBool::new(false));
    let flag = late.clone();
    proxy.add_destroy_listener(&mut client.conn, move |_| flag.store(true, Ordering::SeqCst));
    assert!(late.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_close_destroys_everything_in_order() -> Result<()> {
    let mut client = Peer::client();
    let order = log();
    client.conn.register(ObjectId(7), &SURFACE, 1, Box::new(Tracked { label: "7", log: order.clone() }))?;
    client.conn.register(ObjectId(3), &SURFACE, 1, Box::new(Tracked { label: "3", log: order.clone() }))?;

    let mut before = client.conn.on_close();
    client.conn.close();
    client.conn.close();
    let mut after = client.conn.on_close();

    assert_eq!(*order.lock().unwrap(), vec!["3", "7"]);
    assert_eq!(client.conn.state(), State::Closed);
    assert!(!client.conn.is_alive(ObjectId::DISPLAY));
    assert_eq!(before.try_recv().unwrap(), CloseReason::Requested);
    assert_eq!(after.try_recv().unwrap(), CloseReason::Requested);

    // Marshalling on a closed connection is silently dropped.
    client.conn.marshal(ObjectId(3), PING, &[Arg::Uint(1)])?;
    assert_eq!(client.conn.pending_bytes(), 0);
    assert!(client.sent().is_empty());
    Ok(())
}

#[test]
fn test_server_destroy_sends_delete_id() -> Result<()> {
    let mut server = Peer::server();
    let pings = log();
    server.conn.register(ObjectId(4), &SURFACE, 1, Box::new(SurfaceServer { pings }))?;
    server.conn.resource(ObjectId(4)).unwrap().destroy(&mut server.conn);

    assert!(server.conn.is_zombie(ObjectId(4)));
    let packets = server.sent();
    assert_eq!(packets[0].bytes, frame(1, display::DELETE_ID, &[Arg::Uint(4)]));
    Ok(())
}

#[test]
fn test_client_destroy_request_leaves_no_server_zombie() -> Result<()> {
    let pings = log();
    let mut server = server_with_surface_global(&pings);
    let mut client = Peer::client();

    let registry = client.conn.display().get_registry(&mut client.conn, ())?;
    let surface = registry.bind(&mut client.conn, 1, &SURFACE, 1, Box::new(Inert))?;
    pump(&mut client, &mut server)?;
    assert!(server.conn.is_alive(ObjectId(3)));

    surface.marshal(&mut client.conn, DESTROY, &[])?;
    assert!(client.conn.is_zombie(ObjectId(3)));
    pump(&mut client, &mut server)?;
    assert!(!server.conn.is_alive(ObjectId(3)));
    assert!(!server.conn.is_zombie(ObjectId(3)));
    assert_eq!(server.conn.objects().zombie_count(), 0);

    pump(&mut server, &mut client)?;
    assert!(!client.conn.is_zombie(ObjectId(3)));
    Ok(())
}

// ============================================================================
//  PROTOCOL ERRORS
// ============================================================================

#[test]
fn test_unknown_object_is_protocol_error() {
    let mut client = Peer::client();
    let mut server = Peer::server();

    let err = server.conn.dispatch(WirePacket::from_bytes(frame(7, 0, &[]))).unwrap_err();
    assert!(matches!(err, Error::UnknownObject(ObjectId(7))));
    assert!(server.conn.is_closed());

    let packets = server.sent();
    let (object, code, _) = display_error(&packets).unwrap();
    assert_eq!((object, code), (ObjectId::DISPLAY, display::INVALID_OBJECT));

    let mut closed = client.conn.on_close();
    for packet in packets {
        let _ = client.conn.dispatch(packet);
    }
    match closed.try_recv().unwrap() {
        CloseReason::Protocol { object, code, .. } => {
            assert_eq!((object, code), (ObjectId::DISPLAY, display::INVALID_OBJECT));
        }
        other => panic!("unexpected close reason {:?}", other),
    }
}

#[test]
fn test_unknown_opcode_is_protocol_error() {
    let mut server = Peer::server();
    let err = server.conn.dispatch(WirePacket::from_bytes(frame(1, 9, &[]))).unwrap_err();
    assert!(matches!(err, Error::UnknownOpcode { opcode: 9, .. }));
    let (object, code, _) = display_error(&server.sent()).unwrap();
    assert_eq!((object, code), (ObjectId::DISPLAY, display::INVALID_METHOD));
}

#[test]
fn test_application_error_is_posted_on_object() -> Result<()> {
    let mut server = Peer::server();
    let pings = log();
    server.conn.register(ObjectId(3), &SURFACE, 1, Box::new(SurfaceServer { pings }))?;

    let err = server.conn.dispatch(WirePacket::from_bytes(frame(3, PING, &[Arg::Uint(0)]))).unwrap_err();
    assert!(matches!(err, Error::Application { code: 7, .. }));
    let (object, code, message) = display_error(&server.sent()).unwrap();
    assert_eq!((object, code, message.as_str()), (ObjectId(3), 7, "ping of zero"));
    assert!(matches!(server.conn.close_reason(), Some(CloseReason::Protocol { code: 7, .. })));
    Ok(())
}

#[test]
fn test_new_id_outside_client_range() {
    let mut server = Peer::server();
    let bytes = frame(1, display::GET_REGISTRY, &[Arg::NewId(0xff00_0005)]);
    assert!(server.conn.dispatch(WirePacket::from_bytes(bytes)).is_err());
    let (_, code, message) = display_error(&server.sent()).unwrap();
    assert_eq!(code, display::INVALID_OBJECT);
    assert!(message.contains("invalid new id"));
}

#[test]
fn test_new_id_in_use() {
    let mut server = Peer::server();
    let mut bytes = frame(1, display::GET_REGISTRY, &[Arg::NewId(2)]);
    bytes.extend(frame(1, display::GET_REGISTRY, &[Arg::NewId(2)]));
    assert!(server.conn.dispatch(WirePacket::from_bytes(bytes)).is_err());
    let (_, code, message) = display_error(&server.sent()).unwrap();
    assert_eq!(code, display::INVALID_OBJECT);
    assert_eq!(message, "invalid new id 2");
}

#[test]
fn test_malformed_frame_stops_dispatch() -> Result<()> {
    let mut server = Peer::server();
    let pings = log();
    server.conn.register(ObjectId(3), &SURFACE, 1, Box::new(SurfaceServer { pings: pings.clone() }))?;

    let mut bytes = frame(3, PING, &[Arg::Uint(1)]);
    // Declared size of 4 is smaller than a header.
    bytes.extend_from_slice(&[3, 0, 0, 0, 1, 0, 4, 0]);
    bytes.extend(frame(3, PING, &[Arg::Uint(2)]));

    let err = server.conn.dispatch(WirePacket::from_bytes(bytes)).unwrap_err();
    assert!(err.is_malformed());
    assert_eq!(*pings.lock().unwrap(), vec![1]);
    assert!(matches!(server.conn.close_reason(), Some(CloseReason::Malformed(_))));
    assert!(display_error(&server.sent()).is_none());
    Ok(())
}

#[test]
fn test_short_arguments_are_malformed() -> Result<()> {
    let mut server = Peer::server();
    let pings = log();
    server.conn.register(ObjectId(3), &SURFACE, 1, Box::new(SurfaceServer { pings: pings.clone() }))?;

    let err = server.conn.dispatch(WirePacket::from_bytes(frame(3, PING, &[]))).unwrap_err();
    assert!(err.is_malformed());
    assert!(pings.lock().unwrap().is_empty());
    assert!(server.conn.is_closed());
    Ok(())
}

#[test]
fn test_handles_travel_with_frames() -> Result<()> {
    let mut server = Peer::server();
    let pings = log();
    server.conn.register(ObjectId(3), &SURFACE, 1, Box::new(SurfaceServer { pings: pings.clone() }))?;

    let shm = Handle::new(4, HandleKind::SharedMemory, "client");
    let mut handles = Vec::new();
    let mut bytes = Vec::new();
    encode_message(&mut bytes, ObjectId(3), ATTACH, &[Arg::Handle(shm), Arg::Uint(2)], &mut handles)?;
    assert_eq!(bytes.len(), 12);

    server.conn.dispatch(WirePacket::new(bytes, handles))?;
    assert_eq!(*pings.lock().unwrap(), vec![402]);
    Ok(())
}

// ============================================================================
//  ZOMBIES
// ============================================================================

#[test]
fn test_client_zombie_drops_events_and_handles() -> Result<()> {
    let mut client = Peer::client();
    let events = log();
    client.conn.register(ObjectId(3), &SURFACE, 1, Box::new(SurfaceClient { events: events.clone() }))?;
    client.conn.register(ObjectId(4), &SURFACE, 1, Box::new(SurfaceClient { events: events.clone() }))?;

    let surface = client.conn.proxy(ObjectId(3)).unwrap();
    surface.marshal(&mut client.conn, DESTROY, &[])?;
    assert!(client.conn.is_zombie(ObjectId(3)));

    let mut handles = Vec::new();
    let mut bytes = Vec::new();
    let stale = Handle::new(1, HandleKind::ArrayBuffer, "server");
    let fresh = Handle::new(2, HandleKind::ArrayBuffer, "server");
    encode_message(&mut bytes, ObjectId(3), PONG, &[Arg::Uint(9)], &mut handles)?;
    encode_message(&mut bytes, ObjectId(3), BUFFER, &[Arg::Handle(stale)], &mut handles)?;
    encode_message(&mut bytes, ObjectId(4), BUFFER, &[Arg::Handle(fresh)], &mut handles)?;
    client.conn.dispatch(WirePacket::new(bytes, handles))?;

    assert_eq!(*events.lock().unwrap(), vec![2]);
    assert!(client.conn.is_zombie(ObjectId(3)));

    client.conn.dispatch(WirePacket::from_bytes(frame(1, display::DELETE_ID, &[Arg::Uint(3)])))?;
    assert!(!client.conn.is_zombie(ObjectId(3)));
    Ok(())
}

// ============================================================================
//  REGISTRY
// ============================================================================

#[test]
fn test_global_table_lifecycle() {
    let mut table = GlobalTable::new();
    assert!(matches!(table.lookup(1), Lookup::Unknown));

    assert!(table.announce(Global::announced(1, "test_surface", 2)));
    assert!(!table.announce(Global::announced(1, "other", 1)));
    assert_eq!(table.state(1), Some(GlobalState::Announced));
    assert!(matches!(table.lookup(1), Lookup::Live(g) if g.interface == "test_surface"));

    table.mark_bound(1);
    assert_eq!(table.state(1), Some(GlobalState::Bound));

    assert!(table.remove(1));
    assert!(!table.remove(1));
    assert!(!table.remove(99));
    assert!(matches!(table.lookup(1), Lookup::Removed(_)));
    assert_eq!(table.live().count(), 0);

    // Removed stays removed; a bind can never revive it.
    table.mark_bound(1);
    assert_eq!(table.state(1), Some(GlobalState::Removed));

    table.announce(Global::announced(2, "test_surface", 1));
    assert!(!table.forget(2));
    assert_eq!(table.prune_removed(), 1);
    assert_eq!(table.state(1), None);
    assert_eq!(table.state(2), Some(GlobalState::Announced));
}

#[test]
fn test_removed_globals_are_pruned_after_two_syncs() -> Result<()> {
    let mut server = Peer::server();
    let mut client = Peer::client();
    client.conn.display().get_registry(&mut client.conn, ())?;
    pump(&mut client, &mut server)?;

    let binder = Arc::new(SurfaceGlobal { pings: log() });
    server.conn.announce_global(Global::implemented(6, &SURFACE, 1, binder))?;
    server.conn.remove_global(6)?;

    client.conn.sync()?;
    pump(&mut client, &mut server)?;
    // A bind sent before the first answer may still be on its way.
    assert_eq!(server.conn.globals().state(6), Some(GlobalState::Removed));

    client.conn.sync()?;
    pump(&mut client, &mut server)?;
    assert_eq!(server.conn.globals().state(6), None);
    Ok(())
}

#[test]
fn test_registry_bind_and_ping() -> Result<()> {
    let pings = log();
    let pongs = log();
    let mut server = server_with_surface_global(&pings);
    let mut client = Peer::client();

    let registry = client.conn.display().get_registry(&mut client.conn, ())?;
    let surface = registry.bind(&mut client.conn, 1, &SURFACE, 1, Box::new(SurfaceClient { events: pongs.clone() }))?;
    assert_eq!(surface.id(), ObjectId(3));
    surface.marshal(&mut client.conn, PING, &[Arg::Uint(5)])?;

    pump(&mut client, &mut server)?;
    pump(&mut server, &mut client)?;

    assert_eq!(*pings.lock().unwrap(), vec![5]);
    assert_eq!(*pongs.lock().unwrap(), vec![5]);
    assert_eq!(server.conn.globals().state(1), Some(GlobalState::Bound));
    assert_eq!(client.conn.globals().find("test_surface").map(|g| g.version), Some(2));
    assert_eq!(server.conn.resource(ObjectId(3)).map(|r| r.version()), Some(1));
    Ok(())
}

#[test]
fn test_global_changes_reach_registries() -> Result<()> {
    let mut server = Peer::server();
    let mut client = Peer::client();
    client.conn.display().get_registry(&mut client.conn, ())?;
    pump(&mut client, &mut server)?;

    let pings = log();
    let binder = Arc::new(SurfaceGlobal { pings });
    server.conn.announce_global(Global::implemented(4, &SURFACE, 1, binder))?;
    pump(&mut server, &mut client)?;
    assert_eq!(client.conn.globals().state(4), Some(GlobalState::Announced));

    server.conn.remove_global(4)?;
    pump(&mut server, &mut client)?;
    assert_eq!(client.conn.globals().state(4), Some(GlobalState::Removed));
    Ok(())
}

#[test]
fn test_bind_removed_global_is_inert() -> Result<()> {
    let pings = log();
    let mut server = server_with_surface_global(&pings);
    let mut client = Peer::client();

    let registry = client.conn.display().get_registry(&mut client.conn, ())?;
    let surface = registry.bind(&mut client.conn, 1, &SURFACE, 1, Box::new(SurfaceClient { events: log() }))?;
    surface.marshal(&mut client.conn, PING, &[Arg::Uint(5)])?;
    server.conn.remove_global(1)?;

    pump(&mut client, &mut server)?;
    assert!(server.conn.is_open());
    assert!(server.conn.is_alive(ObjectId(3)));
    assert!(pings.lock().unwrap().is_empty());

    surface.marshal(&mut client.conn, DESTROY, &[])?;
    pump(&mut client, &mut server)?;
    assert!(!server.conn.is_alive(ObjectId(3)));

    pump(&mut server, &mut client)?;
    assert!(!client.conn.is_zombie(ObjectId(3)));
    Ok(())
}

#[test]
fn test_bind_unknown_global_is_error() -> Result<()> {
    let pings = log();
    let mut server = server_with_surface_global(&pings);
    let mut client = Peer::client();

    let registry = client.conn.display().get_registry(&mut client.conn, ())?;
    registry.bind(&mut client.conn, 42, &SURFACE, 1, Box::new(Inert))?;
    assert!(pump(&mut client, &mut server).is_err());

    let _ = pump(&mut server, &mut client);
    match client.conn.close_reason() {
        Some(CloseReason::Protocol { object, code, message }) => {
            assert_eq!((*object, *code), (ObjectId(2), display::INVALID_OBJECT));
            assert_eq!(message, "invalid global 42");
        }
        other => panic!("unexpected close reason {:?}", other),
    }
    Ok(())
}

#[test]
fn test_bind_version_and_interface_are_checked() -> Result<()> {
    let pings = log();

    let mut server = server_with_surface_global(&pings);
    let mut client = Peer::client();
    let registry = client.conn.display().get_registry(&mut client.conn, ())?;
    registry.bind(&mut client.conn, 1, &SURFACE, 3, Box::new(Inert))?;
    assert!(pump(&mut client, &mut server).is_err());
    let (_, code, message) = display_error(&server.sent()).unwrap();
    assert_eq!(code, display::INVALID_OBJECT);
    assert!(message.starts_with("invalid version"));

    let mut server = server_with_surface_global(&pings);
    let mut client = Peer::client();
    let registry = client.conn.display().get_registry(&mut client.conn, ())?;
    registry.bind(&mut client.conn, 1, &crate::protocol::CALLBACK, 1, Box::new(Inert))?;
    assert!(pump(&mut client, &mut server).is_err());
    let (_, _, message) = display_error(&server.sent()).unwrap();
    assert!(message.starts_with("invalid interface"));
    Ok(())
}

// ============================================================================
//  ID ALLOCATION
// ============================================================================

#[test]
fn test_id_ranges() -> Result<()> {
    let mut client = ObjectRegistry::new(Side::Client, IdPolicy::Monotonic);
    let mut server = ObjectRegistry::new(Side::Server, IdPolicy::Monotonic);
    assert_eq!(client.allocate_next_local_id()?, ObjectId(2));
    assert_eq!(client.allocate_next_local_id()?, ObjectId(3));
    assert_eq!(server.allocate_next_local_id()?, ObjectId(0xff00_0000));
    Ok(())
}

#[test]
fn test_register_rejects_live_id() -> Result<()> {
    let mut objects = ObjectRegistry::new(Side::Server, IdPolicy::Monotonic);
    objects.register(ObjectId(2), &SURFACE, 1, Box::new(Inert))?;
    assert!(matches!(objects.register(ObjectId(2), &SURFACE, 1, Box::new(Inert)), Err(Error::IdInUse(_))));

    // A zombie is replaced by the next object the peer creates under its id.
    objects.unregister(ObjectId(2));
    objects.unregister(ObjectId(2));
    objects.bury(ObjectId(2), &SURFACE);
    objects.register(ObjectId(2), &SURFACE, 1, Box::new(Inert))?;
    assert!(objects.zombie(ObjectId(2)).is_none());
    Ok(())
}

#[test]
fn test_ids_unique_under_random_churn() -> Result<()> {
    for policy in [IdPolicy::Monotonic, IdPolicy::Recycle] {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut objects = ObjectRegistry::new(Side::Client, policy);
        let mut live = Vec::new();
        let mut zombies = Vec::new();
        let mut highest = 0;
        let mut reused = false;

        for _ in 0..5000 {
            match rng.gen_range(0..3) {
                0 => {
                    let id = objects.allocate_next_local_id()?;
                    assert!(!objects.is_live(id), "{:?} handed out live id {}", policy, id);
                    assert!(objects.zombie(id).is_none(), "{:?} handed out zombie id {}", policy, id);
                    if id.0 <= highest {
                        assert_eq!(policy, IdPolicy::Recycle);
                        reused = true;
                    }
                    highest = highest.max(id.0);
                    objects.register(id, &SURFACE, 1, Box::new(Inert))?;
                    live.push(id);
                }
                1 if !live.is_empty() => {
                    let id = live.swap_remove(rng.gen_range(0..live.len()));
                    objects.unregister(id);
                    objects.bury(id, &SURFACE);
                    zombies.push(id);
                }
                2 if !zombies.is_empty() => {
                    let id = zombies.swap_remove(rng.gen_range(0..zombies.len()));
                    assert!(objects.release(id));
                }
                _ => {}
            }
        }
        assert_eq!(reused, policy == IdPolicy::Recycle);
    }
    Ok(())
}

#[test]
fn test_reserved_ids_replace_local_allocation() -> Result<()> {
    let mut objects = ObjectRegistry::new(Side::Server, IdPolicy::Monotonic);
    assert_eq!(objects.reserved_ids_left(), 0);

    // Client-range ids are not ours to hand out.
    objects.reserve_ids([5, 0xff00_0010, 0xff00_0011, 0xff00_0012]);
    assert_eq!(objects.reserved_ids_left(), 3);
    objects.register(ObjectId(0xff00_0011), &SURFACE, 1, Box::new(Inert))?;

    assert_eq!(objects.allocate_next_local_id()?, ObjectId(0xff00_0010));
    assert_eq!(objects.allocate_next_local_id()?, ObjectId(0xff00_0012));
    assert!(matches!(objects.allocate_next_local_id(), Err(Error::IdsExhausted)));
    Ok(())
}

// ============================================================================
//  INTERCEPTORS
// ============================================================================

struct Silent;

impl Interceptor for Silent {}

/// Installs a both-routed interceptor for the id each request creates.
struct Spawner;

impl Interceptor for Spawner {
    fn request(&mut self, frame: &RawFrame<'_>, created: &mut NewInterceptors) -> Option<Destination> {
        if let Ok(id) = frame.cursor().read_u32() {
            created.add(ObjectId(id), Box::new(RoutingTable::new().fallback(Destination::Both)));
        }
        Some(Destination::ForwardOnly)
    }
}

struct Watcher {
    events: Log<u16>,
    removed: Arc<AtomicBool>,
}

impl Interceptor for Watcher {
    fn event(&mut self, frame: &RawFrame<'_>) {
        self.events.lock().unwrap().push(frame.header.opcode);
    }

    fn removed(&mut self, _id: ObjectId) {
        self.removed.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_chain_default_routes() {
    let mut chain = InterceptorChain::new();
    let buf = frame(3, 0, &[]);
    assert_eq!(chain.intercept_request(&first_frame(&buf)), Destination::ForwardOnly);

    chain.insert(ObjectId(3), Box::new(Silent));
    assert_eq!(chain.intercept_request(&first_frame(&buf)), Destination::LocalOnly);
}

#[test]
fn test_routing_table() {
    let mut chain = InterceptorChain::new();
    let table = RoutingTable::new().route(1, Destination::Both).route(2, Destination::ForwardOnly);
    chain.insert(ObjectId(3), Box::new(table));

    let route = |chain: &mut InterceptorChain, opcode| {
        let buf = frame(3, opcode, &[]);
        chain.intercept_request(&first_frame(&buf))
    };
    assert_eq!(route(&mut chain, 0), Destination::LocalOnly);
    assert_eq!(route(&mut chain, 1), Destination::Both);
    assert_eq!(route(&mut chain, 2), Destination::ForwardOnly);

    chain.insert(ObjectId(3), Box::new(RoutingTable::new().fallback(Destination::ForwardOnly)));
    assert_eq!(route(&mut chain, 0), Destination::ForwardOnly);
}

#[test]
fn test_interceptors_created_by_requests() {
    let mut chain = InterceptorChain::new();
    chain.insert(ObjectId::DISPLAY, Box::new(Spawner));

    let buf = frame(1, display::GET_REGISTRY, &[Arg::NewId(2)]);
    assert_eq!(chain.intercept_request(&first_frame(&buf)), Destination::ForwardOnly);
    assert!(chain.contains(ObjectId(2)));

    let buf = frame(2, registry::BIND, &[]);
    assert_eq!(chain.intercept_request(&first_frame(&buf)), Destination::Both);
}

#[test]
fn test_delete_id_retires_interceptor() {
    let mut chain = InterceptorChain::new();
    let events = log();
    let removed = Arc::new(AtomicBool::new(false));
    chain.insert(ObjectId(5), Box::new(Watcher { events: events.clone(), removed: removed.clone() }));

    let buf = frame(5, PONG, &[Arg::Uint(1)]);
    chain.handle_event(&first_frame(&buf));
    assert_eq!(*events.lock().unwrap(), vec![PONG]);

    let buf = frame(1, display::DELETE_ID, &[Arg::Uint(5)]);
    chain.handle_event(&first_frame(&buf));
    assert!(!chain.contains(ObjectId(5)));
    assert!(removed.load(Ordering::SeqCst));
    assert!(chain.is_empty());
}

// ============================================================================
//  TRANSPORT
// ============================================================================

#[tokio::test]
async fn test_send_to_dropped_peer_is_connection_lost() {
    let (near, far) = DuplexChannelTransport::pair();
    drop(far);

    let err = near.send(WirePacket::from_bytes(frame(1, 0, &[Arg::NewId(2)]))).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectionLost(_)));
    assert!(matches!(Error::from(err), Error::Transport(TransportError::ConnectionLost(_))));
    assert!(matches!(near.recv().await, Ok(None)));
}

// ============================================================================
//  HANDLES
// ============================================================================

#[tokio::test]
async fn test_handle_transfer_between_domains() -> Result<()> {
    let native: HandleTable<Vec<u8>> = HandleTable::new("native");
    let browser: HandleTable<Vec<u8>> = HandleTable::new("browser");

    let handle = native.create_handle(vec![1, 2, 3], HandleKind::SharedMemory).await?;
    assert_eq!(handle.domain, "native");
    assert_eq!(native.get_transferable(&handle).await?, vec![1, 2, 3]);

    let moved = native.transfer(&handle, &browser)?;
    assert_eq!(moved.domain, "browser");
    assert_eq!(moved.kind, HandleKind::SharedMemory);
    assert!(native.is_empty());
    assert!(matches!(native.get_transferable(&handle).await, Err(Error::UnknownHandle(_))));
    assert_eq!(browser.get_transferable(&moved).await?, vec![1, 2, 3]);

    browser.close_handle(&moved).await?;
    assert!(matches!(browser.close_handle(&moved).await, Err(Error::UnknownHandle(_))));
    Ok(())
}

#[tokio::test]
async fn test_handle_domain_mismatch() -> Result<()> {
    let native: HandleTable<u64> = HandleTable::new("native");
    let browser: HandleTable<u64> = HandleTable::new("browser");

    let handle = native.create_handle(7, HandleKind::MessagePort).await?;
    let err = browser.get_transferable(&handle).await.unwrap_err();
    assert!(matches!(err, Error::HandleDomainMismatch { ref domain, .. } if domain == "browser"));
    assert!(matches!(browser.close_handle(&handle).await, Err(Error::HandleDomainMismatch { .. })));
    assert!(matches!(browser.transfer(&handle, &native), Err(Error::HandleDomainMismatch { .. })));
    assert!(native.contains(&handle));
    Ok(())
}

// ============================================================================
//  BRIDGE
// ============================================================================

#[derive(Default)]
struct MockNative {
    log: Log<String>,
    fail_push: bool,
    handles_per_frame: usize,
    received_handles: Vec<Handle>,
    events: VecDeque<WirePacket>,
    lifecycle: Vec<NativeLifecycle>,
    /// Server ids handed to the local side so far.
    reserved: u32,
}

impl NativeCompositor for MockNative {
    fn create_display(&mut self) -> anyhow::Result<NativeDisplayId> {
        Ok(NativeDisplayId(1))
    }

    fn destroy_display(&mut self, _display: NativeDisplayId) {
        self.log.lock().unwrap().push("destroy display".into());
    }

    fn create_client(&mut self, _display: NativeDisplayId) -> anyhow::Result<NativeClientId> {
        Ok(NativeClientId(1))
    }

    fn destroy_client(&mut self, _client: NativeClientId) {
        self.log.lock().unwrap().push("destroy client".into());
    }

    fn request_handles(&self, _client: NativeClientId, _object: ObjectId, _opcode: u16) -> usize {
        self.handles_per_frame
    }

    fn push_requests(&mut self, _client: NativeClientId, _bytes: &[u8], handles: Vec<Handle>) -> anyhow::Result<()> {
        if self.fail_push {
            self.log.lock().unwrap().push("native failed".into());
            anyhow::bail!("native rejected frame");
        }
        self.log.lock().unwrap().push("native".into());
        self.received_handles.extend(handles);
        Ok(())
    }

    fn pull_events(&mut self, _client: NativeClientId) -> anyhow::Result<Option<WirePacket>> {
        Ok(self.events.pop_front())
    }

    fn drain_lifecycle(&mut self) -> Vec<NativeLifecycle> {
        std::mem::take(&mut self.lifecycle)
    }

    fn server_object_ids(&mut self, _client: NativeClientId, count: usize) -> anyhow::Result<Vec<u32>> {
        // The native side keeps 0xff000000..0xff000100 for itself.
        let first = 0xff00_0100 + self.reserved;
        self.reserved += count as u32;
        Ok((first..first + count as u32).collect())
    }
}

/// Local implementation that logs into the same log as the native mock.
struct LocalSurface {
    log: Log<String>,
}

impl Dispatch for LocalSurface {
    fn dispatch(&mut self, _conn: &mut Connection, message: Message) -> Result<()> {
        let handles = message.args.iter().filter(|a| matches!(a, Arg::Handle(_))).count();
        let entry = if handles > 0 { format!("local with {} handle", handles) } else { "local".to_string() };
        self.log.lock().unwrap().push(entry);
        Ok(())
    }
}

fn bridged(native: MockNative, policy: BothPolicy) -> (Bridge<MockNative>, mpsc::UnboundedReceiver<WirePacket>) {
    let (to_client, outbox) = mpsc::unbounded_channel();
    let config = Config::builder(Side::Server).both_policy(policy).build();
    let local_log = native.log.clone();

    let mut chain = InterceptorChain::new();
    let table = RoutingTable::new()
        .route(DESTROY, Destination::Both)
        .route(PING, Destination::Both)
        .route(ATTACH, Destination::Both);
    chain.insert(ObjectId(3), Box::new(table));

    let mut bridge = Bridge::new(native, config, chain, to_client).unwrap();
    bridge.local_mut().register(ObjectId(3), &SURFACE, 1, Box::new(LocalSurface { log: local_log })).unwrap();
    (bridge, outbox)
}

fn entries(log: &Log<String>) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn test_bridge_both_native_first() -> Result<()> {
    let native = MockNative::default();
    let log = native.log.clone();
    let (mut bridge, _outbox) = bridged(native, BothPolicy::default());

    bridge.route_requests(WirePacket::from_bytes(frame(3, PING, &[Arg::Uint(1)])))?;
    assert_eq!(entries(&log), vec!["native", "local"]);
    Ok(())
}

#[test]
fn test_bridge_both_local_first() -> Result<()> {
    let native = MockNative::default();
    let log = native.log.clone();
    let policy = BothPolicy { order: SinkOrder::LocalFirst, on_failure: OnFailure::Abort };
    let (mut bridge, _outbox) = bridged(native, policy);

    bridge.route_requests(WirePacket::from_bytes(frame(3, PING, &[Arg::Uint(1)])))?;
    assert_eq!(entries(&log), vec!["local", "native"]);
    Ok(())
}

#[test]
fn test_bridge_both_failure_policies() {
    let native = MockNative { fail_push: true, ..Default::default() };
    let log = native.log.clone();
    let (mut bridge, _outbox) = bridged(native, BothPolicy::default());
    let err = bridge.route_requests(WirePacket::from_bytes(frame(3, PING, &[Arg::Uint(1)]))).unwrap_err();
    assert!(matches!(err, Error::Native(_)));
    assert_eq!(entries(&log), vec!["native failed"]);

    let native = MockNative { fail_push: true, ..Default::default() };
    let log = native.log.clone();
    let policy = BothPolicy { order: SinkOrder::NativeFirst, on_failure: OnFailure::Continue };
    let (mut bridge, _outbox) = bridged(native, policy);
    let err = bridge.route_requests(WirePacket::from_bytes(frame(3, PING, &[Arg::Uint(1)]))).unwrap_err();
    assert!(matches!(err, Error::Native(_)));
    assert_eq!(entries(&log), vec!["native failed", "local"]);
}

#[test]
fn test_bridge_both_duplicates_handles() -> Result<()> {
    let native = MockNative { handles_per_frame: 1, ..Default::default() };
    let log = native.log.clone();
    let (mut bridge, _outbox) = bridged(native, BothPolicy::default());

    let mut handles = Vec::new();
    let mut bytes = Vec::new();
    let canvas = Handle::new(9, HandleKind::OffscreenCanvas, "browser");
    encode_message(&mut bytes, ObjectId(3), ATTACH, &[Arg::Handle(canvas.clone()), Arg::Uint(1)], &mut handles)?;
    bridge.route_requests(WirePacket::new(bytes, handles))?;

    assert_eq!(entries(&log), vec!["native", "local with 1 handle"]);
    assert_eq!(bridge.native().received_handles, vec![canvas]);
    Ok(())
}

#[test]
fn test_bridge_forwards_unintercepted_objects() -> Result<()> {
    let native = MockNative::default();
    let log = native.log.clone();
    let (mut bridge, _outbox) = bridged(native, BothPolicy::default());

    bridge.route_requests(WirePacket::from_bytes(frame(9, 0, &[Arg::Uint(1)])))?;
    assert_eq!(entries(&log), vec!["native"]);
    assert!(bridge.local().is_open());
    Ok(())
}

#[test]
fn test_bridge_routes_events_through_chain() -> Result<()> {
    let mut native = MockNative::default();
    let mut bytes = frame(3, PONG, &[Arg::Uint(1)]);
    bytes.extend(frame(1, display::DELETE_ID, &[Arg::Uint(3)]));
    native.events.push_back(WirePacket::from_bytes(bytes.clone()));
    let (mut bridge, mut outbox) = bridged(native, BothPolicy::default());

    assert_eq!(bridge.route_events()?, 1);
    assert!(!bridge.chain_mut().contains(ObjectId(3)));
    assert_eq!(outbox.try_recv().unwrap().bytes, bytes);
    assert_eq!(bridge.route_events()?, 0);
    Ok(())
}

#[test]
fn test_bridge_lifecycle_and_close() {
    let mut native = MockNative::default();
    native.lifecycle.push(NativeLifecycle::GlobalCreated { name: 1, interface: "wl_seat".into(), version: 7 });
    native.lifecycle.push(NativeLifecycle::ClientDestroyed(NativeClientId(1)));
    let log = native.log.clone();
    let (mut bridge, _outbox) = bridged(native, BothPolicy::default());

    assert_eq!(bridge.handle_lifecycle().len(), 2);
    assert_eq!(bridge.local().close_reason(), Some(&CloseReason::TransportClosed));
    assert!(bridge.handle_lifecycle().is_empty());

    bridge.close();
    assert_eq!(entries(&log), vec!["destroy client", "destroy display"]);
}

#[test]
fn test_bridge_local_events_retire_interceptors() -> Result<()> {
    let native = MockNative::default();
    let log = native.log.clone();
    let (mut bridge, mut outbox) = bridged(native, BothPolicy::default());

    // The local side destroys object 3 on its own, outside any request.
    bridge.local_mut().destroy(ObjectId(3));
    assert_eq!(bridge.forward_local()?, 1);
    assert!(!bridge.chain_mut().contains(ObjectId(3)));
    assert_eq!(outbox.try_recv().unwrap().bytes, frame(1, display::DELETE_ID, &[Arg::Uint(3)]));

    // The client reuses id 3 for an object only the native side knows.
    bridge.route_requests(WirePacket::from_bytes(frame(3, PING, &[Arg::Uint(1)])))?;
    assert_eq!(entries(&log), vec!["native"]);
    assert!(bridge.local().is_open());
    Ok(())
}

#[test]
fn test_bridge_destroy_request_retires_interceptor() -> Result<()> {
    let native = MockNative::default();
    let log = native.log.clone();
    let (mut bridge, mut outbox) = bridged(native, BothPolicy::default());

    bridge.route_requests(WirePacket::from_bytes(frame(3, DESTROY, &[])))?;
    assert_eq!(entries(&log), vec!["native", "local"]);
    assert!(!bridge.local().is_alive(ObjectId(3)));
    assert!(!bridge.chain_mut().contains(ObjectId(3)));
    assert_eq!(outbox.try_recv().unwrap().bytes, frame(1, display::DELETE_ID, &[Arg::Uint(3)]));
    Ok(())
}

static SEAT: Interface = Interface {
    name: "test_seat",
    version: 1,
    requests: &[],
    events: &[MessageDesc { name: "offer", signature: &[ArgKind::NewId], destructor: false }],
};

#[test]
fn test_bridge_local_objects_use_reserved_ids() -> Result<()> {
    let native = MockNative::default();
    let (mut bridge, _outbox) = bridged(native, BothPolicy::default());
    assert_eq!(bridge.native().reserved, 64);

    let local = bridge.local_mut();
    local.register(ObjectId(4), &SEAT, 1, Box::new(Inert))?;
    let offer = local.marshal_constructor(ObjectId(4), 0, vec![Arg::NewId(0)], &SURFACE, 1, Box::new(Inert))?;
    // Never one of the ids the native side allocates from.
    assert_eq!(offer, ObjectId(0xff00_0100));

    for _ in 0..56 {
        local.marshal_constructor(ObjectId(4), 0, vec![Arg::NewId(0)], &SURFACE, 1, Box::new(Inert))?;
    }
    assert_eq!(local.objects().reserved_ids_left(), 7);

    // Routing to the local side tops the reservation back up.
    bridge.route_requests(WirePacket::from_bytes(frame(3, PING, &[Arg::Uint(1)])))?;
    assert_eq!(bridge.native().reserved, 128);
    assert_eq!(bridge.local().objects().reserved_ids_left(), 71);
    Ok(())
}
