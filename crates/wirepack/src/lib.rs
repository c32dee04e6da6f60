//! # Wirepack
//!
//! Stateless marshalling for Wayland-style wire frames.
//!
//! ## Philosophy
//!
//! - **Bit-exact**: Every argument has exactly one wire form. Encoding then
//!   decoding with the same signature consumes exactly the bytes produced.
//! - **Closed**: Arguments are a closed tagged union (`Arg`); there is no
//!   runtime type inspection while marshalling.
//! - **Strict**: A decoder never reads past the end of its frame and never
//!   silently truncates. Any disagreement between the declared frame size and
//!   the bytes a signature consumes is `Error::Malformed`.
//!
//! ## Format
//!
//! - **Header**: `[object id: u32][size << 16 | opcode: u32]`
//! - **Scalars**: `u32`, `i32` and 24.8 fixed point, 4 bytes each.
//! - **Blobs**: `[Len: u32][Data: Len][Pad to 4]`; strings carry a NUL.
//! - **Handles**: zero bytes in the frame; carried out-of-band in order.
//!
//! All integers are Little-Endian.

mod arg;
mod cursor;
mod decode;
mod encode;
mod fixed;
mod handle;
mod header;


pub use arg::Arg;
pub use arg::ArgKind;
pub use arg::ObjectId;
pub use arg::parse_signature;
pub use cursor::Cursor;
pub use decode::decode_args;
pub use encode::encode_args;
pub use encode::encode_message;
pub use fixed::Fixed;
pub use handle::Handle;
pub use handle::HandleKind;
pub use header::FrameIter;
pub use header::Header;
pub use header::RawFrame;
pub use header::HEADER_SIZE;

/// Wire encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The frame is structurally invalid (bad size, overrun, bad padding).
    Malformed(String),
    /// Attempted to read beyond the end of the frame's arguments.
    UnexpectedEnd { needed: usize, remaining: usize },
    /// The signature requires a handle that the packet did not carry.
    MissingHandle,
    /// An encoded frame would exceed the 16-bit size field.
    TooLarge(usize),
    /// A signature string contains an unknown type character.
    InvalidSignature(String),
    /// The argument list does not line up with the signature.
    ArgumentMismatch { index: usize, expected: ArgKind, found: ArgKind },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Malformed(msg) => write!(f, "malformed message: {}", msg),
            Error::UnexpectedEnd { needed, remaining } => {
                write!(f, "malformed message: needed {} bytes, {} remaining", needed, remaining)
            }
            Error::MissingHandle => write!(f, "malformed message: not enough handles in packet"),
            Error::TooLarge(size) => write!(f, "message of {} bytes exceeds the frame size limit", size),
            Error::InvalidSignature(sig) => write!(f, "invalid signature: {:?}", sig),
            Error::ArgumentMismatch { index, expected, found } => {
                write!(f, "argument {} is {:?}, signature expects {:?}", index, found, expected)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for wire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Rounds `len` up to the next multiple of 4.
#[inline]
pub const fn pad4(len: usize) -> usize {
    (len + 3) & !3
}
