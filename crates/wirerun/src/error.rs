use std::fmt;

use wirepack::ObjectId;

use crate::transport::TransportError;

/// Engine errors.
///
/// Only `Application` is meant to be produced by interface authors; the
/// connection maps every other variant onto a close or a display error.
#[derive(Debug)]
pub enum Error {
    /// The wire codec rejected a frame or an argument list.
    Wire(wirepack::Error),
    /// A frame or a call addressed an id with no live object.
    UnknownObject(ObjectId),
    /// The opcode is outside the interface's message table.
    UnknownOpcode {
        object: ObjectId,
        interface: &'static str,
        opcode: u16,
    },
    /// A protocol error raised by an interface implementation.
    Application {
        object: ObjectId,
        code: u32,
        message: String,
    },
    /// A handle was used with a table that does not own it.
    HandleDomainMismatch { handle: String, domain: String },
    /// The handle id is not present in the table.
    UnknownHandle(u32),
    /// The id is already bound to a live object.
    IdInUse(ObjectId),
    /// The id allocator ran out of ids for this side.
    IdsExhausted,
    /// The frame would exceed the configured maximum size.
    MessageTooLarge(usize),
    /// The connection is closed.
    Closed,
    /// A pending completion was abandoned because its object was destroyed.
    Cancelled,
    Transport(TransportError),
    /// Opaque failure from a native collaborator.
    Native(anyhow::Error),
}

impl Error {
    /// Convenience constructor for `Error::Application`.
    pub fn application(object: ObjectId, code: u32, message: impl Into<String>) -> Self {
        Self::Application { object, code, message: message.into() }
    }

    /// Malformed input, which is always fatal to the connection.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Wire(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(e) => write!(f, "Malformed message: {}", e),
            Self::UnknownObject(id) => write!(f, "Unknown object {}", id),
            Self::UnknownOpcode { object, interface, opcode } => {
                write!(f, "Unknown opcode {} on {}@{}", opcode, interface, object)
            }
            Self::Application { object, code, message } => {
                write!(f, "Protocol error {} on object {}: {}", code, object, message)
            }
            Self::HandleDomainMismatch { handle, domain } => {
                write!(f, "Handle {} does not belong to domain '{}'", handle, domain)
            }
            Self::UnknownHandle(id) => write!(f, "Unknown handle {}", id),
            Self::IdInUse(id) => write!(f, "Object id {} is already in use", id),
            Self::IdsExhausted => write!(f, "Object id space exhausted"),
            Self::MessageTooLarge(size) => write!(f, "Message of {} bytes is too large", size),
            Self::Closed => write!(f, "Connection closed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Native(e) => write!(f, "Native error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<wirepack::Error> for Error {
    fn from(e: wirepack::Error) -> Self {
        Self::Wire(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::Native(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a connection ended. Delivered once to every close observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called locally.
    Requested,
    /// The peer hung up or the transport failed.
    TransportClosed,
    /// A frame could not be decoded.
    Malformed(String),
    /// A protocol error was posted (server) or received (client).
    Protocol {
        object: ObjectId,
        code: u32,
        message: String,
    },
    /// A handler failed with something other than a protocol error.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "closed by request"),
            Self::TransportClosed => write!(f, "transport closed"),
            Self::Malformed(msg) => write!(f, "malformed message: {}", msg),
            Self::Protocol { object, code, message } => {
                write!(f, "protocol error {} on object {}: {}", code, object, message)
            }
            Self::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}
