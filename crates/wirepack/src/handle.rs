//! Out-of-band handle references.
//!
//! A handle is the wire analogue of a file descriptor. The frame itself
//! carries nothing for a handle argument; the reference travels next to the
//! frame, and the payload travels over the transport's own side channel.

/// What kind of resource a handle refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    ArrayBuffer,
    ImageBitmap,
    MessagePort,
    OffscreenCanvas,
    SharedMemory,
    Other(u32),
}

/// A reference to a handle owned by the table of `domain`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    pub id: u32,
    pub kind: HandleKind,
    pub domain: String,
}

impl Handle {
    pub fn new(id: u32, kind: HandleKind, domain: impl Into<String>) -> Self {
        Self { id, kind, domain: domain.into() }
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}({:?})", self.domain, self.id, self.kind)
    }
}
