//! # Object Registry
//!
//! Per-connection table from id to live object, plus the zombie set and the
//! id allocator for objects this side creates.
//!
//! ## Invariants
//! - An id is bound to at most one live object at a time.
//! - A zombie is never live. Registering over a zombie replaces it.
//! - Under `IdPolicy::Recycle`, an id only returns to the free list once the
//!   peer acknowledged its deletion, so it can never alias a zombie.
//! - Once ids have been reserved with `reserve_ids`, local allocation only
//!   hands out reserved ids.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;

use tokio::sync::oneshot;
use wirepack::ObjectId;

use crate::config::IdPolicy;
use crate::config::Side;
use crate::error::Error;
use crate::error::Result;
use crate::interface::Dispatch;
use crate::interface::Interface;

/// Something waiting for an object to be destroyed.
pub enum DestroyWaiter {
    Channel(oneshot::Sender<ObjectId>),
    Callback(Box<dyn FnOnce(ObjectId) + Send>),
}

impl DestroyWaiter {
    pub fn notify(self, id: ObjectId) {
        match self {
            // The receiver may have been dropped; nobody is waiting then.
            DestroyWaiter::Channel(tx) => {
                let _ = tx.send(id);
            }
            DestroyWaiter::Callback(f) => f(id),
        }
    }
}

pub struct ObjectEntry {
    pub interface: &'static Interface,
    pub version: u32,
    /// Taken out while the object is dispatching.
    pub(crate) handler: Option<Box<dyn Dispatch>>,
    pub(crate) waiters: Vec<DestroyWaiter>,
}

pub struct ObjectRegistry {
    side: Side,
    policy: IdPolicy,
    live: BTreeMap<u32, ObjectEntry>,
    zombies: HashMap<u32, &'static Interface>,
    next_id: u32,
    free: VecDeque<u32>,
    reserved: Option<VecDeque<u32>>,
}

impl ObjectRegistry {
    pub fn new(side: Side, policy: IdPolicy) -> Self {
        Self {
            side,
            policy,
            live: BTreeMap::new(),
            zombies: HashMap::new(),
            next_id: side.first_local_id(),
            free: VecDeque::new(),
            reserved: None,
        }
    }

    /// Binds `id` to a new live object.
    ///
    /// Fails with `IdInUse` if the id is live. A zombie under the same id is
    /// replaced, since the peer has moved on to a new object.
    pub fn register(
        &mut self,
        id: ObjectId,
        interface: &'static Interface,
        version: u32,
        handler: Box<dyn Dispatch>,
    ) -> Result<()> {
        if id.is_null() || self.live.contains_key(&id.0) {
            return Err(Error::IdInUse(id));
        }
        self.zombies.remove(&id.0);
        self.live.insert(id.0, ObjectEntry {
            interface,
            version,
            handler: Some(handler),
            waiters: Vec::new(),
        });
        Ok(())
    }

    /// Removes the live object, if any. Calling it twice is harmless.
    pub fn unregister(&mut self, id: ObjectId) -> Option<ObjectEntry> {
        self.live.remove(&id.0)
    }

    pub fn resolve(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.live.get(&id.0)
    }

    pub fn resolve_mut(&mut self, id: ObjectId) -> Option<&mut ObjectEntry> {
        self.live.get_mut(&id.0)
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        self.live.contains_key(&id.0)
    }

    /// Live ids in ascending order.
    pub fn live_ids(&self) -> Vec<ObjectId> {
        self.live.keys().map(|id| ObjectId(*id)).collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Hands out the next id for an object created on this side.
    pub fn allocate_next_local_id(&mut self) -> Result<ObjectId> {
        if let Some(reserved) = self.reserved.as_mut() {
            while let Some(id) = reserved.pop_front() {
                if !self.live.contains_key(&id) && !self.zombies.contains_key(&id) {
                    return Ok(ObjectId(id));
                }
            }
            return Err(Error::IdsExhausted);
        }
        if self.policy == IdPolicy::Recycle {
            if let Some(id) = self.free.pop_front() {
                return Ok(ObjectId(id));
            }
        }
        let id = self.next_id;
        if id > self.side.last_local_id() || id < self.side.first_local_id() {
            return Err(Error::IdsExhausted);
        }
        // Wraps to 0 past u32::MAX, which the range check above rejects next time.
        self.next_id = id.wrapping_add(1);
        Ok(ObjectId(id))
    }

    /// Restricts local allocation to ids handed out by someone else sharing
    /// this id space. Ids outside this side's range are dropped.
    pub fn reserve_ids(&mut self, ids: impl IntoIterator<Item = u32>) {
        let side = self.side;
        self.reserved
            .get_or_insert_with(VecDeque::new)
            .extend(ids.into_iter().filter(|id| side.owns(*id)));
    }

    pub fn reserved_ids_left(&self) -> usize {
        self.reserved.as_ref().map_or(0, VecDeque::len)
    }

    /// Marks a destroyed id as still addressable by the peer.
    pub fn bury(&mut self, id: ObjectId, interface: &'static Interface) {
        self.zombies.insert(id.0, interface);
    }

    pub fn zombie(&self, id: ObjectId) -> Option<&'static Interface> {
        self.zombies.get(&id.0).copied()
    }

    pub fn zombie_count(&self) -> usize {
        self.zombies.len()
    }

    /// Clears a zombie after the peer acknowledged its deletion, and returns
    /// the id to the free list when recycling.
    pub fn release(&mut self, id: ObjectId) -> bool {
        let was_zombie = self.zombies.remove(&id.0).is_some();
        if was_zombie && self.policy == IdPolicy::Recycle && self.side.owns(id.0) {
            self.free.push_back(id.0);
        }
        was_zombie
    }

    pub(crate) fn take_handler(&mut self, id: ObjectId) -> Option<Box<dyn Dispatch>> {
        self.live.get_mut(&id.0).and_then(|entry| entry.handler.take())
    }

    /// Puts a handler back after dispatch. Hands it back if the object it
    /// belongs to was destroyed in the meantime.
    pub(crate) fn restore_handler(
        &mut self,
        id: ObjectId,
        handler: Box<dyn Dispatch>,
    ) -> std::result::Result<(), Box<dyn Dispatch>> {
        match self.live.get_mut(&id.0) {
            Some(entry) if entry.handler.is_none() => {
                entry.handler = Some(handler);
                Ok(())
            }
            _ => Err(handler),
        }
    }
}
