//! # Connection
//!
//! One end of a protocol session: the object table, the outbound buffer and
//! the dispatch loop over incoming frames.
//!
//! ## Philosophy
//!
//! - **Single Owner**: A connection is driven by exactly one task. Every
//!   method is synchronous and takes `&mut self`; handlers receive the same
//!   `&mut Connection` and run to completion, one frame at a time.
//! - **Explicit Flush**: `marshal` only appends to the outbound buffer.
//!   Nothing leaves until `flush` hands the whole batch to the outlet.
//! - **Fail Closed**: Malformed input closes the connection immediately.
//!   Protocol errors are reported to the client first, then close.
//!
//! ## Lifecycle
//!
//! ```text
//! Open --close--> Closing (destroy all objects) --> Closed
//! ```

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;
use wirepack::Arg;
use wirepack::FrameIter;
use wirepack::Handle;
use wirepack::HEADER_SIZE;
use wirepack::ObjectId;
use wirepack::RawFrame;
use wirepack::decode_args;
use wirepack::encode_message;

use crate::config::Config;
use crate::config::Side;
use crate::error::CloseReason;
use crate::error::Error;
use crate::error::Result;
use crate::global::Global;
use crate::global::GlobalTable;
use crate::interface::Dispatch;
use crate::interface::Interface;
use crate::interface::Message;
use crate::interface::MessageDesc;
use crate::objects::DestroyWaiter;
use crate::objects::ObjectRegistry;
use crate::protocol::callback;
use crate::protocol::callback::CALLBACK;
use crate::protocol::callback::SyncCallback;
use crate::protocol::callback::SyncCompletion;
use crate::protocol::display;
use crate::protocol::display::ClientDisplay;
use crate::protocol::display::DISPLAY;
use crate::protocol::display::DisplayProxy;
use crate::protocol::display::ServerDisplay;
use crate::protocol::registry;
use crate::proxy::Proxy;
use crate::resource::Resource;
use crate::transport::WirePacket;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Open,
    Closing,
    Closed,
}

pub struct Connection {
    config: Config,
    state: State,
    objects: ObjectRegistry,
    out_bytes: Vec<u8>,
    out_handles: Vec<Handle>,
    outlet: Option<mpsc::UnboundedSender<WirePacket>>,
    close_waiters: Vec<oneshot::Sender<CloseReason>>,
    close_reason: Option<CloseReason>,
    globals: GlobalTable,
    registries: Vec<ObjectId>,
    /// Globals removed on the server side, with the serial current at removal.
    removed_globals: Vec<(u32, u32)>,
    serial: u32,
}

impl Connection {
    /// Creates an open connection whose flushed packets go to `outlet`.
    ///
    /// The display root is registered as object 1 with the implementation
    /// for `config.side`.
    pub fn new(config: Config, outlet: mpsc::UnboundedSender<WirePacket>) -> Self {
        let mut conn = Self {
            objects: ObjectRegistry::new(config.side, config.id_policy),
            config,
            state: State::Open,
            out_bytes: Vec::new(),
            out_handles: Vec::new(),
            outlet: Some(outlet),
            close_waiters: Vec::new(),
            close_reason: None,
            globals: GlobalTable::new(),
            registries: Vec::new(),
            removed_globals: Vec::new(),
            serial: 0,
        };
        let display: Box<dyn Dispatch> = match conn.config.side {
            Side::Server => Box::new(display::Requests(ServerDisplay)),
            Side::Client => Box::new(display::Events(ClientDisplay)),
        };
        // Object 1 is always free on a fresh registry.
        let _ = conn.objects.register(ObjectId::DISPLAY, &DISPLAY, 1, display);
        conn
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn side(&self) -> Side {
        self.config.side
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn display(&self) -> DisplayProxy {
        DisplayProxy(Proxy::new(ObjectId::DISPLAY, &DISPLAY, 1))
    }

    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.objects.is_live(id)
    }

    pub fn is_zombie(&self, id: ObjectId) -> bool {
        self.objects.zombie(id).is_some()
    }

    pub fn interface_of(&self, id: ObjectId) -> Option<&'static Interface> {
        self.objects.resolve(id).map(|entry| entry.interface)
    }

    pub fn proxy(&self, id: ObjectId) -> Option<Proxy> {
        self.objects.resolve(id).map(|e| Proxy::new(id, e.interface, e.version))
    }

    pub fn resource(&self, id: ObjectId) -> Option<Resource> {
        self.objects.resolve(id).map(|e| Resource::new(id, e.interface, e.version))
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalTable {
        &mut self.globals
    }

    /// Restricts the ids this side gives new objects to `ids`.
    /// See `ObjectRegistry::reserve_ids`.
    pub fn reserve_ids(&mut self, ids: impl IntoIterator<Item = u32>) {
        self.objects.reserve_ids(ids);
    }

    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    /// Bytes waiting for the next flush.
    pub fn pending_bytes(&self) -> usize {
        self.out_bytes.len()
    }

    // ------------------------------------------------------------------------
    //  OBJECTS
    // ------------------------------------------------------------------------

    /// Registers an object created by the peer, or by a local handler on
    /// the peer's behalf.
    pub fn register(
        &mut self,
        id: ObjectId,
        interface: &'static Interface,
        version: u32,
        handler: Box<dyn Dispatch>,
    ) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::Closed);
        }
        self.objects.register(id, interface, version, handler)?;
        debug!(id = id.0, interface = interface.name, version, "registered");
        Ok(())
    }

    /// Destroys a live object.
    ///
    /// Waiters are notified once, in registration order, then the handler's
    /// `destroyed` hook runs. A server destroying a client-allocated id tells
    /// the client with `delete_id`; the id stays a zombie on the destroying
    /// side until the peer is known to have stopped using it.
    pub fn destroy(&mut self, id: ObjectId) {
        self.destroy_object(id, false);
    }

    /// `released_by_peer` is set when the peer's own destructor request
    /// ended the object, so no further requests can follow on the id.
    fn destroy_object(&mut self, id: ObjectId, released_by_peer: bool) {
        if id == ObjectId::DISPLAY && self.state == State::Open {
            return;
        }
        let Some(entry) = self.objects.unregister(id) else {
            return;
        };
        debug!(id = id.0, interface = entry.interface.name, "destroy");
        for waiter in entry.waiters {
            waiter.notify(id);
        }
        if let Some(mut handler) = entry.handler {
            handler.destroyed(id);
        }
        self.registries.retain(|r| *r != id);

        if self.state != State::Open {
            return;
        }
        match self.config.side {
            Side::Server if Side::Client.owns(id.0) => {
                // The server never learns when the client has seen delete_id,
                // so only ids the client may still send on become zombies.
                if !released_by_peer && !entry.interface.requests.is_empty() {
                    self.objects.bury(id, entry.interface);
                }
                // The display is live while open, so this cannot fail.
                let _ = self.marshal(ObjectId::DISPLAY, display::DELETE_ID, &[Arg::Uint(id.0)]);
            }
            Side::Server => {}
            Side::Client => self.objects.bury(id, entry.interface),
        }
    }

    /// Handles `delete_id` from the server: the id is free again.
    pub fn acknowledge_delete(&mut self, id: ObjectId) {
        if !self.objects.release(id) && self.objects.is_live(id) {
            // Server deleted an object we still consider live.
            self.destroy(id);
            self.objects.release(id);
        }
    }

    /// Runs `listener` once `id` is destroyed, immediately if it is not live.
    pub fn add_destroy_listener<F>(&mut self, id: ObjectId, listener: F)
    where
        F: FnOnce(ObjectId) + Send + 'static,
    {
        self.add_waiter(id, DestroyWaiter::Callback(Box::new(listener)));
    }

    /// Resolves once `id` is destroyed, immediately if it is not live.
    pub fn on_destroy(&mut self, id: ObjectId) -> oneshot::Receiver<ObjectId> {
        let (tx, rx) = oneshot::channel();
        self.add_waiter(id, DestroyWaiter::Channel(tx));
        rx
    }

    fn add_waiter(&mut self, id: ObjectId, waiter: DestroyWaiter) {
        match self.objects.resolve_mut(id) {
            Some(entry) => entry.waiters.push(waiter),
            None => waiter.notify(id),
        }
    }

    // ------------------------------------------------------------------------
    //  OUTBOUND
    // ------------------------------------------------------------------------

    /// Appends one frame to the outbound buffer.
    ///
    /// A no-op once the connection is closing. Marshalling a destructor
    /// message destroys the object afterwards.
    pub fn marshal(&mut self, object: ObjectId, opcode: u16, args: &[Arg]) -> Result<()> {
        if self.state != State::Open {
            return Ok(());
        }
        let interface = self.objects.resolve(object).map(|e| e.interface).ok_or(Error::UnknownObject(object))?;
        let desc = self.outgoing(interface, object, opcode)?;
        check_signature(desc, args)?;

        let size = HEADER_SIZE + args.iter().map(Arg::wire_size).sum::<usize>();
        if size > self.config.max_frame_size {
            return Err(Error::MessageTooLarge(size));
        }
        encode_message(&mut self.out_bytes, object, opcode, args, &mut self.out_handles)?;
        debug!(object = object.0, interface = interface.name, message = desc.name, size, "marshal");

        if desc.destructor {
            self.destroy(object);
        }
        Ok(())
    }

    /// Allocates a new id, registers `handler` under it, substitutes the id
    /// into the `NewId(0)` placeholder and marshals, in that order.
    pub fn marshal_constructor(
        &mut self,
        object: ObjectId,
        opcode: u16,
        mut args: Vec<Arg>,
        interface: &'static Interface,
        version: u32,
        handler: Box<dyn Dispatch>,
    ) -> Result<ObjectId> {
        if self.state != State::Open {
            return Err(Error::Closed);
        }
        let Some(slot) = args.iter_mut().find(|a| matches!(a, Arg::NewId(0))) else {
            return Err(Error::Wire(wirepack::Error::Malformed("constructor without new_id placeholder".into())));
        };
        let id = self.objects.allocate_next_local_id()?;
        *slot = Arg::NewId(id.0);
        self.objects.register(id, interface, version, handler)?;

        if let Err(e) = self.marshal(object, opcode, &args) {
            self.objects.unregister(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Hands everything marshalled so far to the outlet as one packet.
    pub fn flush(&mut self) {
        if self.state != State::Open || (self.out_bytes.is_empty() && self.out_handles.is_empty()) {
            return;
        }
        let packet = WirePacket::new(std::mem::take(&mut self.out_bytes), std::mem::take(&mut self.out_handles));
        debug!(bytes = packet.bytes.len(), handles = packet.handles.len(), "flush");
        if let Some(outlet) = &self.outlet {
            if outlet.send(packet).is_err() {
                debug!("flush after outlet closed");
            }
        }
    }

    /// Asks the server to answer once it has processed everything sent so far.
    pub fn sync(&mut self) -> Result<SyncCompletion> {
        let (callback, completion) = SyncCallback::new();
        let handler = Box::new(callback::Events(callback));
        self.marshal_constructor(ObjectId::DISPLAY, display::SYNC, vec![Arg::NewId(0)], &CALLBACK, 1, handler)?;
        Ok(completion)
    }

    // ------------------------------------------------------------------------
    //  ERRORS & CLOSE
    // ------------------------------------------------------------------------

    /// Sends `display.error` about `object`, flushes, then closes.
    ///
    /// Only meaningful on a server; a client just closes.
    pub fn post_error(&mut self, object: ObjectId, code: u32, message: impl Into<String>) {
        let message = message.into();
        warn!(object = object.0, code, %message, "posting protocol error");
        if self.config.side == Side::Server && self.state == State::Open {
            let args = [Arg::Object(object), Arg::Uint(code), Arg::String(message.clone())];
            if let Err(e) = self.marshal(ObjectId::DISPLAY, display::ERROR, &args) {
                warn!(error = %e, "could not marshal display error");
            }
            self.flush();
        }
        self.close_with(CloseReason::Protocol { object, code, message });
    }

    pub fn close(&mut self) {
        self.close_with(CloseReason::Requested)
    }

    /// Closes the connection. Only the first call has any effect.
    ///
    /// Every live object is destroyed in ascending id order, which cancels
    /// pending syncs, before close observers are told why.
    pub fn close_with(&mut self, reason: CloseReason) {
        if self.state != State::Open {
            return;
        }
        info!(side = ?self.config.side, %reason, "closing connection");
        self.state = State::Closing;
        for id in self.objects.live_ids() {
            self.destroy(id);
        }
        self.out_bytes = Vec::new();
        self.out_handles = Vec::new();
        self.outlet = None;
        self.registries.clear();
        self.state = State::Closed;
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(reason.clone());
        }
        self.close_reason = Some(reason);
    }

    /// Resolves with the close reason, immediately if already closed.
    pub fn on_close(&mut self) -> oneshot::Receiver<CloseReason> {
        let (tx, rx) = oneshot::channel();
        match &self.close_reason {
            Some(reason) => {
                let _ = tx.send(reason.clone());
            }
            None => self.close_waiters.push(tx),
        }
        rx
    }

    // ------------------------------------------------------------------------
    //  GLOBALS
    // ------------------------------------------------------------------------

    /// Adds a global and advertises it on every registry of this connection.
    pub fn announce_global(&mut self, global: Global) -> Result<()> {
        let (name, interface, version) = (global.name, global.interface.clone(), global.version);
        if !self.globals.announce(global) {
            return Ok(());
        }
        for registry in self.registries.clone() {
            let args = [Arg::Uint(name), Arg::String(interface.clone()), Arg::Uint(version)];
            self.marshal(registry, registry::GLOBAL, &args)?;
        }
        Ok(())
    }

    /// Removes a global and tells every registry of this connection.
    pub fn remove_global(&mut self, name: u32) -> Result<()> {
        if !self.globals.remove(name) {
            return Ok(());
        }
        if self.config.side == Side::Server {
            self.removed_globals.push((name, self.serial));
        }
        for registry in self.registries.clone() {
            self.marshal(registry, registry::GLOBAL_REMOVE, &[Arg::Uint(name)])?;
        }
        Ok(())
    }

    /// Forgets removed globals once two syncs have completed since their
    /// removal. By then the client has seen `global_remove` and any bind it
    /// raced with it.
    pub(crate) fn prune_removed_globals(&mut self) {
        let serial = self.serial;
        let globals = &mut self.globals;
        self.removed_globals.retain(|&(name, removed_at)| {
            if serial.wrapping_sub(removed_at) >= 2 {
                globals.forget(name);
                false
            } else {
                true
            }
        });
    }

    /// Replays live globals to a new registry and subscribes it to changes.
    pub fn publish_globals(&mut self, registry: ObjectId) -> Result<()> {
        let announced: Vec<(u32, String, u32)> =
            self.globals.live().map(|g| (g.name, g.interface.clone(), g.version)).collect();
        for (name, interface, version) in announced {
            self.marshal(registry, registry::GLOBAL, &[Arg::Uint(name), Arg::String(interface), Arg::Uint(version)])?;
        }
        self.registries.push(registry);
        Ok(())
    }

    // ------------------------------------------------------------------------
    //  INBOUND
    // ------------------------------------------------------------------------

    /// Dispatches every frame of `packet` in order.
    ///
    /// Returns the error that closed the connection, if any. No frame after
    /// a fatal one is dispatched.
    pub fn dispatch(&mut self, packet: WirePacket) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::Closed);
        }
        let WirePacket { bytes, handles } = packet;
        let mut handles: VecDeque<Handle> = handles.into();
        for frame in FrameIter::new(&bytes) {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => return Err(self.fail_malformed(e.into())),
            };
            self.dispatch_frame(&frame, &mut handles)?;
            if self.state != State::Open {
                return Err(Error::Closed);
            }
        }
        if !handles.is_empty() {
            debug!(count = handles.len(), "unclaimed handles in packet");
        }
        Ok(())
    }

    fn dispatch_frame(&mut self, frame: &RawFrame<'_>, handles: &mut VecDeque<Handle>) -> Result<()> {
        let id = frame.header.object_id;
        let opcode = frame.header.opcode;

        let interface = match self.objects.resolve(id) {
            Some(entry) => entry.interface,
            None => {
                if let Some(interface) = self.objects.zombie(id) {
                    let count = interface.incoming(self.config.side).get(opcode as usize).map_or(0, |d| d.handle_count());
                    let count = count.min(handles.len());
                    handles.drain(..count);
                    debug!(id = id.0, opcode, "dropping frame for zombie");
                    return Ok(());
                }
                return Err(self.protocol_failure(Error::UnknownObject(id)));
            }
        };

        let Some(desc) = interface.incoming(self.config.side).get(opcode as usize) else {
            return Err(self.protocol_failure(Error::UnknownOpcode { object: id, interface: interface.name, opcode }));
        };

        let args = match decode_args(&mut frame.cursor(), desc.signature, handles) {
            Ok(args) => args,
            Err(e) => return Err(self.fail_malformed(e.into())),
        };
        debug!(object = id.0, interface = interface.name, message = desc.name, "dispatch");

        if self.config.side == Side::Server {
            if let Some(bad) = args.iter().filter_map(Arg::as_new_id).find(|n| !Side::Client.owns(n.0)) {
                let message = format!("invalid new id {}", bad);
                return Err(self.handler_failure(Error::application(ObjectId::DISPLAY, display::INVALID_OBJECT, message)));
            }
        }

        self.invoke(Message::new(id, opcode, args), desc)
    }

    fn invoke(&mut self, message: Message, desc: &'static MessageDesc) -> Result<()> {
        let id = message.object;
        let Some(mut handler) = self.objects.take_handler(id) else {
            return Ok(());
        };
        let result = handler.dispatch(self, message);
        if let Err(mut orphan) = self.objects.restore_handler(id, handler) {
            orphan.destroyed(id);
        }
        match result {
            Ok(()) => {
                if desc.destructor && self.objects.is_live(id) {
                    self.destroy_object(id, true);
                }
                Ok(())
            }
            Err(e) => Err(self.handler_failure(e)),
        }
    }

    fn outgoing(&self, interface: &'static Interface, object: ObjectId, opcode: u16) -> Result<&'static MessageDesc> {
        interface
            .outgoing(self.config.side)
            .get(opcode as usize)
            .ok_or(Error::UnknownOpcode { object, interface: interface.name, opcode })
    }

    fn fail_malformed(&mut self, error: Error) -> Error {
        warn!(error = %error, "malformed message, closing");
        self.close_with(CloseReason::Malformed(error.to_string()));
        error
    }

    /// Maps addressing errors onto `display.error`.
    fn protocol_failure(&mut self, error: Error) -> Error {
        let (object, code) = match &error {
            Error::UnknownObject(_) => (ObjectId::DISPLAY, display::INVALID_OBJECT),
            Error::UnknownOpcode { object, .. } => (*object, display::INVALID_METHOD),
            _ => (ObjectId::DISPLAY, display::IMPLEMENTATION),
        };
        self.report(object, code, error.to_string());
        error
    }

    fn handler_failure(&mut self, error: Error) -> Error {
        if self.state != State::Open {
            return error;
        }
        let outcome = match &error {
            Error::Application { object, code, message } => Ok((*object, *code, message.clone())),
            Error::UnknownObject(_) => Ok((ObjectId::DISPLAY, display::INVALID_OBJECT, error.to_string())),
            Error::UnknownOpcode { object, .. } => Ok((*object, display::INVALID_METHOD, error.to_string())),
            Error::IdInUse(id) => Ok((ObjectId::DISPLAY, display::INVALID_OBJECT, format!("invalid new id {}", id))),
            Error::Wire(e) => Err(CloseReason::Malformed(e.to_string())),
            other if self.config.side == Side::Client => Err(CloseReason::Failed(other.to_string())),
            other => Ok((ObjectId::DISPLAY, display::IMPLEMENTATION, other.to_string())),
        };
        match outcome {
            Ok((object, code, message)) => self.report(object, code, message),
            Err(reason) => {
                warn!(%reason, "handler failed, closing");
                self.close_with(reason);
            }
        }
        error
    }

    /// Server: post the error. Client: a peer we cannot talk to is fatal.
    fn report(&mut self, object: ObjectId, code: u32, message: String) {
        match self.config.side {
            Side::Server => self.post_error(object, code, message),
            Side::Client => {
                warn!(object = object.0, code, %message, "protocol violation from server");
                self.close_with(CloseReason::Protocol { object, code, message });
            }
        }
    }
}

fn check_signature(desc: &MessageDesc, args: &[Arg]) -> Result<()> {
    if desc.signature.len() != args.len() {
        return Err(Error::Wire(wirepack::Error::Malformed(format!(
            "{} expects {} arguments, got {}",
            desc.name,
            desc.signature.len(),
            args.len()
        ))));
    }
    for (index, (expected, arg)) in desc.signature.iter().zip(args).enumerate() {
        if arg.kind() != *expected {
            let found = arg.kind();
            return Err(Error::Wire(wirepack::Error::ArgumentMismatch { index, expected: *expected, found }));
        }
    }
    Ok(())
}
