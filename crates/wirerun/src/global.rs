//! # Globals
//!
//! A global is a named, versioned entry point advertised through the
//! registry. Each connection keeps its own `GlobalTable` view:
//!
//! ```text
//! Unannounced --announce--> Announced --bind--> Bound
//!                               |                 |
//!                               +----remove-------+--> Removed
//! ```
//!
//! Removed entries are kept so a bind that raced the removal can still be
//! resolved to an inert object instead of an error. They are forgotten once
//! no such bind can still be in flight.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use wirepack::ObjectId;

use crate::connection::Connection;
use crate::error::Result;
use crate::interface::Dispatch;
use crate::interface::Interface;

/// Creates the implementation for a freshly bound global.
pub trait Bind: Send + Sync {
    fn bind(&self, conn: &mut Connection, id: ObjectId, version: u32) -> Result<Box<dyn Dispatch>>;
}

impl<F> Bind for F
where
    F: Fn(&mut Connection, ObjectId, u32) -> Result<Box<dyn Dispatch>> + Send + Sync,
{
    fn bind(&self, conn: &mut Connection, id: ObjectId, version: u32) -> Result<Box<dyn Dispatch>> {
        self(conn, id, version)
    }
}

/// Server-side half of a global: the descriptor and how to bind it.
#[derive(Clone)]
pub struct GlobalImpl {
    pub interface: &'static Interface,
    pub binder: Arc<dyn Bind>,
}

impl fmt::Debug for GlobalImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalImpl").field("interface", &self.interface.name).finish()
    }
}

#[derive(Clone, Debug)]
pub struct Global {
    pub name: u32,
    pub interface: String,
    pub version: u32,
    /// Present on the server; a client only knows what was announced.
    pub implementation: Option<GlobalImpl>,
}

impl Global {
    /// A global as seen by a client.
    pub fn announced(name: u32, interface: impl Into<String>, version: u32) -> Self {
        Self { name, interface: interface.into(), version, implementation: None }
    }

    /// A global backed by a local implementation.
    pub fn implemented(name: u32, interface: &'static Interface, version: u32, binder: Arc<dyn Bind>) -> Self {
        Self {
            name,
            interface: interface.name.to_string(),
            version,
            implementation: Some(GlobalImpl { interface, binder }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalState {
    Announced,
    Bound,
    Removed,
}

pub enum Lookup<'a> {
    Live(&'a Global),
    Removed(&'a Global),
    Unknown,
}

#[derive(Default)]
pub struct GlobalTable {
    entries: BTreeMap<u32, (Global, GlobalState)>,
}

impl GlobalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the name was already known.
    pub fn announce(&mut self, global: Global) -> bool {
        if self.entries.contains_key(&global.name) {
            return false;
        }
        self.entries.insert(global.name, (global, GlobalState::Announced));
        true
    }

    pub fn mark_bound(&mut self, name: u32) {
        if let Some((_, state @ GlobalState::Announced)) = self.entries.get_mut(&name) {
            *state = GlobalState::Bound;
        }
    }

    /// Returns false for unknown or already removed names.
    pub fn remove(&mut self, name: u32) -> bool {
        match self.entries.get_mut(&name) {
            Some((_, state)) if *state != GlobalState::Removed => {
                *state = GlobalState::Removed;
                true
            }
            _ => false,
        }
    }

    /// Drops a removed entry. Live entries are left alone.
    pub fn forget(&mut self, name: u32) -> bool {
        match self.entries.get(&name) {
            Some((_, GlobalState::Removed)) => self.entries.remove(&name).is_some(),
            _ => false,
        }
    }

    /// Drops every removed entry and returns how many there were.
    pub fn prune_removed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, state)| *state != GlobalState::Removed);
        before - self.entries.len()
    }

    pub fn lookup(&self, name: u32) -> Lookup<'_> {
        match self.entries.get(&name) {
            Some((global, GlobalState::Removed)) => Lookup::Removed(global),
            Some((global, _)) => Lookup::Live(global),
            None => Lookup::Unknown,
        }
    }

    pub fn state(&self, name: u32) -> Option<GlobalState> {
        self.entries.get(&name).map(|(_, state)| *state)
    }

    /// Globals that have not been removed, by ascending name.
    pub fn live(&self) -> impl Iterator<Item = &Global> {
        self.entries
            .values()
            .filter(|(_, state)| *state != GlobalState::Removed)
            .map(|(global, _)| global)
    }

    /// First live global advertising `interface`.
    pub fn find(&self, interface: &str) -> Option<&Global> {
        self.live().find(|g| g.interface == interface)
    }
}
