//! # Frame Header
//!
//! ```text
//! offset 0: object id        (u32)
//! offset 4: size << 16 | op  (u32)
//! offset 8: arguments, 4-byte aligned
//! ```
//!
//! ## Invariants
//! - `size` counts the header, so it is always at least `HEADER_SIZE`.
//! - `size` is a multiple of 4.
//! - A frame never extends past the buffer it was split from.

use crate::Cursor;
use crate::Error;
use crate::ObjectId;
use crate::Result;

pub const HEADER_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub object_id: ObjectId,
    pub size: u16,
    pub opcode: u16,
}

impl Header {
    pub fn new(object_id: ObjectId, size: u16, opcode: u16) -> Self {
        Self { object_id, size, opcode }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.object_id.0.to_le_bytes());
        let word = ((self.size as u32) << 16) | self.opcode as u32;
        buf.extend_from_slice(&word.to_le_bytes());
    }

    /// Reads a header from the front of `bytes` without validating it.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let object_id = ObjectId(cursor.read_u32()?);
        let word = cursor.read_u32()?;
        Ok(Self {
            object_id,
            size: (word >> 16) as u16,
            opcode: (word & 0xffff) as u16,
        })
    }
}

/// One complete frame borrowed from a receive buffer.
#[derive(Clone, Copy, Debug)]
pub struct RawFrame<'a> {
    pub header: Header,
    /// The whole frame, header included.
    pub bytes: &'a [u8],
}

impl<'a> RawFrame<'a> {
    /// Argument bytes, excluding the header.
    pub fn args(&self) -> &'a [u8] {
        &self.bytes[HEADER_SIZE..]
    }

    pub fn cursor(&self) -> Cursor<'a> {
        Cursor::new(self.args())
    }
}

/// Splits a buffer into frames.
///
/// Yields `Err(Error::Malformed)` once and then stops if the buffer contains
/// a frame whose header is inconsistent with the remaining bytes.
pub struct FrameIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0, failed: false }
    }

    /// Bytes consumed by the frames yielded so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn fail(&mut self, msg: String) -> Option<Result<RawFrame<'a>>> {
        self.failed = true;
        Some(Err(Error::Malformed(msg)))
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<RawFrame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let rest = &self.buf[self.offset..];
        if rest.is_empty() {
            return None;
        }
        if rest.len() < HEADER_SIZE {
            let msg = format!("truncated header: {} trailing bytes", rest.len());
            return self.fail(msg);
        }
        let header = match Header::read(rest) {
            Ok(h) => h,
            Err(e) => return self.fail(e.to_string()),
        };
        let size = header.size as usize;
        if size < HEADER_SIZE || size % 4 != 0 {
            let msg = format!("invalid frame size {} for object {}", size, header.object_id);
            return self.fail(msg);
        }
        if size > rest.len() {
            let msg = format!("frame of {} bytes but only {} buffered", size, rest.len());
            return self.fail(msg);
        }
        self.offset += size;
        Some(Ok(RawFrame { header, bytes: &rest[..size] }))
    }
}
