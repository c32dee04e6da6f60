use wirepack::Arg;
use wirepack::ObjectId;

use crate::connection::Connection;
use crate::error::Result;
use crate::interface::Interface;
use crate::proxy::Object;

/// The server's name for an object a client created or bound.
#[derive(Clone, Copy, Debug)]
pub struct Resource {
    id: ObjectId,
    interface: &'static Interface,
    version: u32,
}

impl Resource {
    pub(crate) fn new(id: ObjectId, interface: &'static Interface, version: u32) -> Self {
        Self { id, interface, version }
    }

    /// Queues an event on this object.
    pub fn send_event(&self, conn: &mut Connection, opcode: u16, args: &[Arg]) -> Result<()> {
        conn.marshal(self.id, opcode, args)
    }

    /// Reports a protocol error against this object and closes the client.
    pub fn post_error(&self, conn: &mut Connection, code: u32, message: impl Into<String>) {
        conn.post_error(self.id, code, message)
    }
}

impl Object for Resource {
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
