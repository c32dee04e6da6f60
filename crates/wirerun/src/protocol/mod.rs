//! Core protocol interfaces every connection speaks.
//!
//! Each interface gets a static descriptor, opcode constants, one trait per
//! direction and a `Requests`/`Events` wrapper that turns a trait
//! implementation into a `Dispatch` by matching on the opcode.

pub mod callback;
pub mod display;
pub mod registry;

pub use callback::CALLBACK;
pub use display::DISPLAY;
pub use registry::REGISTRY;

use crate::error::Error;
use crate::interface::Interface;
use crate::interface::Message;

fn unknown_opcode(interface: &'static Interface, message: &Message) -> Error {
    Error::UnknownOpcode {
        object: message.object,
        interface: interface.name,
        opcode: message.opcode,
    }
}
