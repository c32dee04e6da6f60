//! # Handle Tables
//!
//! Handles are single-owner references to resources that cannot be copied
//! into a frame: shared memory, message ports, canvases. A `HandleTable`
//! owns the payloads for one domain and hands out `Handle` references that
//! only it will accept.
//!
//! ## Invariants
//! - A handle belongs to exactly one domain at a time.
//! - `transfer` moves the payload; the old reference stops resolving.
//! - Presenting a handle to a table of another domain is
//!   `HandleDomainMismatch`, never a lookup by id.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::debug;
use wirepack::Handle;
use wirepack::HandleKind;

use crate::error::Error;
use crate::error::Result;

/// The boundary a transport uses to move handle payloads in and out.
#[async_trait::async_trait]
pub trait HandleDomain<P: Send + 'static>: Send + Sync {
    fn domain(&self) -> &str;

    /// Takes ownership of `payload` and returns a reference to it.
    async fn create_handle(&self, payload: P, kind: HandleKind) -> Result<Handle>;

    /// Produces the payload to hand to the transport's side channel.
    async fn get_transferable(&self, handle: &Handle) -> Result<P>;

    /// Releases the payload. Closing an unknown handle is an error.
    async fn close_handle(&self, handle: &Handle) -> Result<()>;
}

pub struct HandleTable<P> {
    domain: String,
    next_id: AtomicU32,
    entries: DashMap<u32, (HandleKind, P)>,
}

impl<P> HandleTable<P> {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            next_id: AtomicU32::new(1),
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        handle.domain == self.domain && self.entries.contains_key(&handle.id)
    }

    /// Stores a payload and returns its reference.
    pub fn insert(&self, payload: P, kind: HandleKind) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, (kind, payload));
        Handle::new(id, kind, self.domain.clone())
    }

    /// Removes and returns the payload behind `handle`.
    pub fn take(&self, handle: &Handle) -> Result<P> {
        self.check_domain(handle)?;
        self.entries
            .remove(&handle.id)
            .map(|(_, (_, payload))| payload)
            .ok_or(Error::UnknownHandle(handle.id))
    }

    /// Moves the payload behind `handle` into `to`, returning the new reference.
    pub fn transfer(&self, handle: &Handle, to: &HandleTable<P>) -> Result<Handle> {
        self.check_domain(handle)?;
        let (_, (kind, payload)) = self.entries.remove(&handle.id).ok_or(Error::UnknownHandle(handle.id))?;
        let moved = to.insert(payload, kind);
        debug!(from = %handle, to = %moved, "handle transferred");
        Ok(moved)
    }

    fn check_domain(&self, handle: &Handle) -> Result<()> {
        if handle.domain != self.domain {
            return Err(Error::HandleDomainMismatch {
                handle: handle.to_string(),
                domain: self.domain.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<P> HandleDomain<P> for HandleTable<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn create_handle(&self, payload: P, kind: HandleKind) -> Result<Handle> {
        Ok(self.insert(payload, kind))
    }

    async fn get_transferable(&self, handle: &Handle) -> Result<P> {
        self.check_domain(handle)?;
        self.entries
            .get(&handle.id)
            .map(|entry| entry.value().1.clone())
            .ok_or(Error::UnknownHandle(handle.id))
    }

    async fn close_handle(&self, handle: &Handle) -> Result<()> {
        self.take(handle).map(|_| ())
    }
}
