//! The registry: advertises globals and binds them to new objects.

use tracing::debug;
use tracing::warn;
use wirepack::Arg;
use wirepack::ArgKind;
use wirepack::ObjectId;

use crate::connection::Connection;
use crate::error::Error;
use crate::error::Result;
use crate::global::Global;
use crate::global::Lookup;
use crate::interface::Dispatch;
use crate::interface::Inert;
use crate::interface::Interface;
use crate::interface::Message;
use crate::interface::MessageDesc;
use crate::protocol::display::INVALID_OBJECT;
use crate::proxy::Proxy;

// requests
pub const BIND: u16 = 0;

// events
pub const GLOBAL: u16 = 0;
pub const GLOBAL_REMOVE: u16 = 1;

pub static REGISTRY: Interface = Interface {
    name: "wl_registry",
    version: 1,
    requests: &[MessageDesc {
        name: "bind",
        signature: &[ArgKind::Uint, ArgKind::String, ArgKind::Uint, ArgKind::NewId],
        destructor: false,
    }],
    events: &[
        MessageDesc {
            name: "global",
            signature: &[ArgKind::Uint, ArgKind::String, ArgKind::Uint],
            destructor: false,
        },
        MessageDesc { name: "global_remove", signature: &[ArgKind::Uint], destructor: false },
    ],
};

pub trait RegistryRequests: Send {
    fn bind(
        &mut self,
        conn: &mut Connection,
        registry: ObjectId,
        name: u32,
        interface: String,
        version: u32,
        id: ObjectId,
    ) -> Result<()>;
}

pub trait RegistryEvents: Send {
    fn global(
        &mut self,
        conn: &mut Connection,
        registry: ObjectId,
        name: u32,
        interface: String,
        version: u32,
    ) -> Result<()>;
    fn global_remove(&mut self, conn: &mut Connection, registry: ObjectId, name: u32) -> Result<()>;

    fn destroyed(&mut self, _id: ObjectId) {}
}

/// Ignores every registry event. The connection still tracks globals.
impl RegistryEvents for () {
    fn global(&mut self, _: &mut Connection, _: ObjectId, _: u32, _: String, _: u32) -> Result<()> {
        Ok(())
    }

    fn global_remove(&mut self, _: &mut Connection, _: ObjectId, _: u32) -> Result<()> {
        Ok(())
    }
}

pub struct Requests<T>(pub T);

impl<T: RegistryRequests> Dispatch for Requests<T> {
    fn dispatch(&mut self, conn: &mut Connection, message: Message) -> Result<()> {
        let registry = message.object;
        match message.opcode {
            BIND => {
                let mut args = message.reader();
                let name = args.uint()?;
                let interface = args.string()?;
                let version = args.uint()?;
                let id = args.new_id()?;
                self.0.bind(conn, registry, name, interface, version, id)
            }
            _ => Err(super::unknown_opcode(&REGISTRY, &message)),
        }
    }
}

pub struct Events<T>(pub T);

impl<T: RegistryEvents> Dispatch for Events<T> {
    fn dispatch(&mut self, conn: &mut Connection, message: Message) -> Result<()> {
        let registry = message.object;
        match message.opcode {
            GLOBAL => {
                let mut args = message.reader();
                let name = args.uint()?;
                let interface = args.string()?;
                let version = args.uint()?;
                self.0.global(conn, registry, name, interface, version)
            }
            GLOBAL_REMOVE => {
                let name = message.reader().uint()?;
                self.0.global_remove(conn, registry, name)
            }
            _ => Err(super::unknown_opcode(&REGISTRY, &message)),
        }
    }

    fn destroyed(&mut self, id: ObjectId) {
        self.0.destroyed(id)
    }
}

/// Server-side registry. Binds globals from the connection's table.
pub struct ServerRegistry;

impl RegistryRequests for ServerRegistry {
    fn bind(
        &mut self,
        conn: &mut Connection,
        registry: ObjectId,
        name: u32,
        interface: String,
        version: u32,
        id: ObjectId,
    ) -> Result<()> {
        let (implementation, advertised) = match conn.globals().lookup(name) {
            Lookup::Unknown => {
                return Err(Error::application(registry, INVALID_OBJECT, format!("invalid global {}", name)));
            }
            Lookup::Removed(global) => {
                debug!(name, id = id.0, "bind to removed global, creating inert object");
                let Some(implementation) = global.implementation.clone() else {
                    return Err(Error::application(registry, INVALID_OBJECT, format!("invalid global {}", name)));
                };
                return conn.register(id, implementation.interface, version, Box::new(Inert));
            }
            Lookup::Live(global) => (global.implementation.clone(), global.version),
        };

        let Some(implementation) = implementation else {
            return Err(Error::application(registry, INVALID_OBJECT, format!("invalid global {}", name)));
        };
        if interface != implementation.interface.name {
            warn!(name, %interface, expected = implementation.interface.name, "bind interface mismatch");
            return Err(Error::application(
                registry,
                INVALID_OBJECT,
                format!("invalid interface for global {}: have {}, wanted {}", name, interface, implementation.interface.name),
            ));
        }
        if version == 0 || version > advertised {
            return Err(Error::application(
                registry,
                INVALID_OBJECT,
                format!("invalid version for global {} ({}): have {}, wanted {}", interface, name, advertised, version),
            ));
        }

        let handler = implementation.binder.bind(conn, id, version)?;
        conn.register(id, implementation.interface, version, handler)?;
        conn.globals_mut().mark_bound(name);
        debug!(name, %interface, version, id = id.0, "bound global");
        Ok(())
    }
}

/// Client-side registry. Records globals before the listener sees them.
pub struct ClientRegistry<L> {
    listener: L,
}

impl<L: RegistryEvents> ClientRegistry<L> {
    pub fn new(listener: L) -> Self {
        Self { listener }
    }
}

impl<L: RegistryEvents> RegistryEvents for ClientRegistry<L> {
    fn global(
        &mut self,
        conn: &mut Connection,
        registry: ObjectId,
        name: u32,
        interface: String,
        version: u32,
    ) -> Result<()> {
        conn.globals_mut().announce(Global::announced(name, interface.clone(), version));
        self.listener.global(conn, registry, name, interface, version)
    }

    fn global_remove(&mut self, conn: &mut Connection, registry: ObjectId, name: u32) -> Result<()> {
        conn.globals_mut().remove(name);
        self.listener.global_remove(conn, registry, name)
    }

    fn destroyed(&mut self, id: ObjectId) {
        self.listener.destroyed(id)
    }
}

/// Typed requests on a client's registry.
#[derive(Clone, Copy, Debug)]
pub struct RegistryProxy(pub Proxy);

impl RegistryProxy {
    /// Binds global `name` to a new object implementing `interface`.
    pub fn bind(
        &self,
        conn: &mut Connection,
        name: u32,
        interface: &'static Interface,
        version: u32,
        handler: Box<dyn Dispatch>,
    ) -> Result<Proxy> {
        let args = vec![
            Arg::Uint(name),
            Arg::String(interface.name.to_string()),
            Arg::Uint(version),
            Arg::NewId(0),
        ];
        self.0.marshal_constructor(conn, BIND, args, interface, version, handler)
    }

    pub fn proxy(&self) -> Proxy {
        self.0
    }
}
