//! # Proxies
//!
//! A `Proxy` is the client's name for an object: its id plus the interface
//! and version it was created with. It holds no state of its own; every
//! operation goes through the `Connection` that owns the object.

use tokio::sync::oneshot;
use wirepack::Arg;
use wirepack::ObjectId;

use crate::connection::Connection;
use crate::error::Result;
use crate::interface::Dispatch;
use crate::interface::Interface;

/// Capabilities shared by proxies and resources.
pub trait Object {
    fn id(&self) -> ObjectId;
    fn interface(&self) -> &'static Interface;
    fn version(&self) -> u32;

    fn is_alive(&self, conn: &Connection) -> bool {
        conn.is_alive(self.id())
    }

    /// Destroys the object locally. Repeated calls are no-ops.
    fn destroy(&self, conn: &mut Connection) {
        conn.destroy(self.id())
    }

    /// Resolves once the object is destroyed, immediately if it already is.
    fn on_destroy(&self, conn: &mut Connection) -> oneshot::Receiver<ObjectId> {
        conn.on_destroy(self.id())
    }

    fn add_destroy_listener<F>(&self, conn: &mut Connection, listener: F)
    where
        F: FnOnce(ObjectId) + Send + 'static,
        Self: Sized,
    {
        conn.add_destroy_listener(self.id(), listener)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Proxy {
    id: ObjectId,
    interface: &'static Interface,
    version: u32,
}

impl Proxy {
    pub(crate) fn new(id: ObjectId, interface: &'static Interface, version: u32) -> Self {
        Self { id, interface, version }
    }

    /// Queues a request on this object.
    pub fn marshal(&self, conn: &mut Connection, opcode: u16, args: &[Arg]) -> Result<()> {
        conn.marshal(self.id, opcode, args)
    }

    /// Queues a request that creates a new object, returning its proxy.
    pub fn marshal_constructor(
        &self,
        conn: &mut Connection,
        opcode: u16,
        args: Vec<Arg>,
        interface: &'static Interface,
        version: u32,
        handler: Box<dyn Dispatch>,
    ) -> Result<Proxy> {
        let id = conn.marshal_constructor(self.id, opcode, args, interface, version, handler)?;
        Ok(Proxy::new(id, interface, version))
    }
}

impl Object for Proxy {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn interface(&self) -> &'static Interface {
        self.interface
    }

    fn version(&self) -> u32 {
        self.version
    }
}
