//! The display root, object 1 on every connection.

use tracing::debug;
use tracing::warn;
use wirepack::Arg;
use wirepack::ArgKind;
use wirepack::ObjectId;

use crate::connection::Connection;
use crate::error::CloseReason;
use crate::error::Result;
use crate::interface::Dispatch;
use crate::interface::Inert;
use crate::interface::Interface;
use crate::interface::Message;
use crate::interface::MessageDesc;
use crate::protocol::callback;
use crate::protocol::callback::CALLBACK;
use crate::protocol::callback::SyncCompletion;
use crate::protocol::registry;
use crate::protocol::registry::ClientRegistry;
use crate::protocol::registry::RegistryEvents;
use crate::protocol::registry::RegistryProxy;
use crate::protocol::registry::REGISTRY;
use crate::protocol::registry::ServerRegistry;
use crate::proxy::Proxy;

// requests
pub const SYNC: u16 = 0;
pub const GET_REGISTRY: u16 = 1;

// events
pub const ERROR: u16 = 0;
pub const DELETE_ID: u16 = 1;

// error codes
pub const INVALID_OBJECT: u32 = 0;
pub const INVALID_METHOD: u32 = 1;
pub const NO_MEMORY: u32 = 2;
pub const IMPLEMENTATION: u32 = 3;

pub static DISPLAY: Interface = Interface {
    name: "wl_display",
    version: 1,
    requests: &[
        MessageDesc { name: "sync", signature: &[ArgKind::NewId], destructor: false },
        MessageDesc { name: "get_registry", signature: &[ArgKind::NewId], destructor: false },
    ],
    events: &[
        MessageDesc {
            name: "error",
            signature: &[ArgKind::Object, ArgKind::Uint, ArgKind::String],
            destructor: false,
        },
        MessageDesc { name: "delete_id", signature: &[ArgKind::Uint], destructor: false },
    ],
};

pub trait DisplayRequests: Send {
    fn sync(&mut self, conn: &mut Connection, display: ObjectId, callback: ObjectId) -> Result<()>;
    fn get_registry(&mut self, conn: &mut Connection, display: ObjectId, registry: ObjectId) -> Result<()>;
}

pub trait DisplayEvents: Send {
    fn error(
        &mut self,
        conn: &mut Connection,
        display: ObjectId,
        object: ObjectId,
        code: u32,
        message: String,
    ) -> Result<()>;
    fn delete_id(&mut self, conn: &mut Connection, display: ObjectId, id: u32) -> Result<()>;
}

pub struct Requests<T>(pub T);

impl<T: DisplayRequests> Dispatch for Requests<T> {
    fn dispatch(&mut self, conn: &mut Connection, message: Message) -> Result<()> {
        let display = message.object;
        match message.opcode {
            SYNC => {
                let callback = message.reader().new_id()?;
                self.0.sync(conn, display, callback)
            }
            GET_REGISTRY => {
                let registry = message.reader().new_id()?;
                self.0.get_registry(conn, display, registry)
            }
            _ => Err(super::unknown_opcode(&DISPLAY, &message)),
        }
    }
}

pub struct Events<T>(pub T);

impl<T: DisplayEvents> Dispatch for Events<T> {
    fn dispatch(&mut self, conn: &mut Connection, message: Message) -> Result<()> {
        let display = message.object;
        match message.opcode {
            ERROR => {
                let mut args = message.reader();
                let object = args.object()?;
                let code = args.uint()?;
                let text = args.string()?;
                self.0.error(conn, display, object, code, text)
            }
            DELETE_ID => {
                let id = message.reader().uint()?;
                self.0.delete_id(conn, display, id)
            }
            _ => Err(super::unknown_opcode(&DISPLAY, &message)),
        }
    }
}

/// The display implementation installed on every server connection.
pub struct ServerDisplay;

impl DisplayRequests for ServerDisplay {
    fn sync(&mut self, conn: &mut Connection, _display: ObjectId, callback: ObjectId) -> Result<()> {
        conn.register(callback, &CALLBACK, 1, Box::new(Inert))?;
        let serial = conn.next_serial();
        conn.prune_removed_globals();
        // `done` is a destructor; marshalling it also emits delete_id.
        conn.marshal(callback, callback::DONE, &[Arg::Uint(serial)])
    }

    fn get_registry(&mut self, conn: &mut Connection, _display: ObjectId, registry: ObjectId) -> Result<()> {
        conn.register(registry, &REGISTRY, 1, Box::new(registry::Requests(ServerRegistry)))?;
        conn.publish_globals(registry)
    }
}

/// The display implementation installed on every client connection.
pub struct ClientDisplay;

impl DisplayEvents for ClientDisplay {
    fn error(
        &mut self,
        conn: &mut Connection,
        _display: ObjectId,
        object: ObjectId,
        code: u32,
        message: String,
    ) -> Result<()> {
        warn!(object = object.0, code, %message, "protocol error from server");
        conn.close_with(CloseReason::Protocol { object, code, message });
        Ok(())
    }

    fn delete_id(&mut self, conn: &mut Connection, _display: ObjectId, id: u32) -> Result<()> {
        debug!(id, "delete_id");
        conn.acknowledge_delete(ObjectId(id));
        Ok(())
    }
}

/// Typed requests on the client's display.
#[derive(Clone, Copy, Debug)]
pub struct DisplayProxy(pub Proxy);

impl DisplayProxy {
    pub fn sync(&self, conn: &mut Connection) -> Result<SyncCompletion> {
        conn.sync()
    }

    pub fn get_registry<L>(&self, conn: &mut Connection, listener: L) -> Result<RegistryProxy>
    where
        L: RegistryEvents + 'static,
    {
        let handler = Box::new(registry::Events(ClientRegistry::new(listener)));
        let proxy = self.0.marshal_constructor(conn, GET_REGISTRY, vec![Arg::NewId(0)], &REGISTRY, 1, handler)?;
        Ok(RegistryProxy(proxy))
    }
}
