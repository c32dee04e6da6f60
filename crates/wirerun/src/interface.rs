//! # Interface Descriptors
//!
//! Static message tables and the dispatch seam between a connection and the
//! code implementing an interface.
//!
//! ## Philosophy
//!
//! - **Static Tables**: An interface is a `static` value. Opcodes index
//!   straight into `requests` or `events`; there is no lookup by name on the
//!   hot path.
//! - **Direction**: The same table serves both ends. A server decodes
//!   `requests` and marshals `events`; a client does the opposite.

use std::vec;

use wirepack::Arg;
use wirepack::ArgKind;
use wirepack::Fixed;
use wirepack::Handle;
use wirepack::ObjectId;

use crate::config::Side;
use crate::connection::Connection;
use crate::error::Error;
use crate::error::Result;

#[derive(Debug)]
pub struct MessageDesc {
    pub name: &'static str,
    pub signature: &'static [ArgKind],
    /// The object is destroyed once this message is marshalled or dispatched.
    pub destructor: bool,
}

impl MessageDesc {
    /// Number of out-of-band handles a frame of this message carries.
    pub fn handle_count(&self) -> usize {
        self.signature.iter().filter(|k| **k == ArgKind::Handle).count()
    }
}

#[derive(Debug)]
pub struct Interface {
    pub name: &'static str,
    pub version: u32,
    pub requests: &'static [MessageDesc],
    pub events: &'static [MessageDesc],
}

impl Interface {
    /// Messages this side receives.
    pub fn incoming(&self, side: Side) -> &'static [MessageDesc] {
        match side {
            Side::Server => self.requests,
            Side::Client => self.events,
        }
    }

    /// Messages this side sends.
    pub fn outgoing(&self, side: Side) -> &'static [MessageDesc] {
        match side {
            Side::Server => self.events,
            Side::Client => self.requests,
        }
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.name == other.name
    }
}

/// A decoded frame addressed to one object.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub object: ObjectId,
    pub opcode: u16,
    pub args: Vec<Arg>,
}

impl Message {
    pub fn new(object: ObjectId, opcode: u16, args: Vec<Arg>) -> Self {
        Self { object, opcode, args }
    }

    /// Consumes the message into a reader that yields arguments in order.
    pub fn reader(self) -> ArgReader {
        ArgReader { args: self.args.into_iter(), index: 0 }
    }
}

/// Typed, in-order access to decoded arguments.
///
/// The arguments have already been checked against the signature, so a
/// mismatch here means the handler disagrees with its own descriptor.
pub struct ArgReader {
    args: vec::IntoIter<Arg>,
    index: usize,
}

impl ArgReader {
    fn take(&mut self) -> Result<(usize, Arg)> {
        let index = self.index;
        self.index += 1;
        let arg = self.args.next().ok_or_else(|| {
            Error::Wire(wirepack::Error::Malformed(format!("missing argument {}", index)))
        })?;
        Ok((index, arg))
    }

    /// Arguments not read yet.
    pub fn remaining(&self) -> usize {
        self.args.len()
    }

    pub fn uint(&mut self) -> Result<u32> {
        match self.take()? {
            (_, Arg::Uint(v)) => Ok(v),
            (index, other) => Err(mismatch(index, ArgKind::Uint, &other)),
        }
    }

    pub fn int(&mut self) -> Result<i32> {
        match self.take()? {
            (_, Arg::Int(v)) => Ok(v),
            (index, other) => Err(mismatch(index, ArgKind::Int, &other)),
        }
    }

    pub fn fixed(&mut self) -> Result<Fixed> {
        match self.take()? {
            (_, Arg::Fixed(v)) => Ok(v),
            (index, other) => Err(mismatch(index, ArgKind::Fixed, &other)),
        }
    }

    pub fn object(&mut self) -> Result<ObjectId> {
        match self.take()? {
            (_, Arg::Object(id)) => Ok(id),
            (index, other) => Err(mismatch(index, ArgKind::Object, &other)),
        }
    }

    pub fn optional_object(&mut self) -> Result<Option<ObjectId>> {
        match self.take()? {
            (_, Arg::OptionalObject(id)) => Ok(id),
            (index, other) => Err(mismatch(index, ArgKind::OptionalObject, &other)),
        }
    }

    pub fn new_id(&mut self) -> Result<ObjectId> {
        match self.take()? {
            (_, Arg::NewId(id)) => Ok(ObjectId(id)),
            (index, other) => Err(mismatch(index, ArgKind::NewId, &other)),
        }
    }

    pub fn string(&mut self) -> Result<String> {
        match self.take()? {
            (_, Arg::String(s)) => Ok(s),
            (index, other) => Err(mismatch(index, ArgKind::String, &other)),
        }
    }

    pub fn optional_string(&mut self) -> Result<Option<String>> {
        match self.take()? {
            (_, Arg::OptionalString(s)) => Ok(s),
            (index, other) => Err(mismatch(index, ArgKind::OptionalString, &other)),
        }
    }

    pub fn array(&mut self) -> Result<Vec<u8>> {
        match self.take()? {
            (_, Arg::Array(a)) => Ok(a),
            (index, other) => Err(mismatch(index, ArgKind::Array, &other)),
        }
    }

    pub fn optional_array(&mut self) -> Result<Option<Vec<u8>>> {
        match self.take()? {
            (_, Arg::OptionalArray(a)) => Ok(a),
            (index, other) => Err(mismatch(index, ArgKind::OptionalArray, &other)),
        }
    }

    pub fn handle(&mut self) -> Result<Handle> {
        match self.take()? {
            (_, Arg::Handle(h)) => Ok(h),
            (index, other) => Err(mismatch(index, ArgKind::Handle, &other)),
        }
    }
}

fn mismatch(index: usize, expected: ArgKind, found: &Arg) -> Error {
    Error::Wire(wirepack::Error::ArgumentMismatch { index, expected, found: found.kind() })
}

/// Receiving end of one object.
///
/// The connection owns the implementation for the lifetime of the object and
/// hands it every incoming message, decoded by the interface's signature.
pub trait Dispatch: Send {
    fn dispatch(&mut self, conn: &mut Connection, message: Message) -> Result<()>;

    /// Runs once, after destroy waiters have been notified.
    fn destroyed(&mut self, _id: ObjectId) {}
}

/// Accepts every message and does nothing.
///
/// Backs objects that exist only so their id stays reserved, such as a
/// binding to a global that was removed while the bind was in flight.
pub struct Inert;

impl Dispatch for Inert {
    fn dispatch(&mut self, _conn: &mut Connection, _message: Message) -> Result<()> {
        Ok(())
    }
}
