use crate::Error;
use crate::Result;
use crate::pad4;

/// A bounds-checked reader over the argument bytes of one frame.
///
/// The slice handed to a cursor ends exactly at the frame boundary, so any
/// read past the end is a malformed message rather than a pending one.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    slice: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(slice: &'a [u8]) -> Self {
        Self { slice, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.slice.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    fn need(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            Err(Error::UnexpectedEnd { needed: n, remaining: self.remaining() })
        } else {
            Ok(())
        }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        let bytes = [
            self.slice[self.pos],
            self.slice[self.pos + 1],
            self.slice[self.pos + 2],
            self.slice[self.pos + 3],
        ];
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads `len` bytes and skips the padding up to the next 4-byte boundary.
    pub fn read_padded(&mut self, len: usize) -> Result<&'a [u8]> {
        let padded = pad4(len);
        self.need(padded)?;
        let data = &self.slice[self.pos..self.pos + len];
        self.pos += padded;
        Ok(data)
    }
}
