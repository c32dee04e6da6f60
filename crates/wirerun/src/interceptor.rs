//! # Interceptors
//!
//! When a connection is bridged to a native compositor, every request frame
//! has to go somewhere: handled locally, forwarded untouched, or both.
//! Interceptors make that decision per object and per opcode, on raw frames,
//! without decoding anything they do not care about.
//!
//! ## Routing
//!
//! - No interceptor for the object: `ForwardOnly`.
//! - An interceptor that returns nothing: `LocalOnly`.
//! - Otherwise, whatever the interceptor returns.

use std::collections::HashMap;

use tracing::debug;
use wirepack::ObjectId;
use wirepack::RawFrame;

use crate::protocol::display;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    LocalOnly,
    ForwardOnly,
    Both,
}

/// Interceptors created while handling one request.
///
/// Installed after the request has been routed, so an interceptor never
/// sees the frame that created it.
#[derive(Default)]
pub struct NewInterceptors {
    pending: Vec<(ObjectId, Box<dyn Interceptor>)>,
}

impl NewInterceptors {
    pub fn add(&mut self, id: ObjectId, interceptor: Box<dyn Interceptor>) {
        self.pending.push((id, interceptor));
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

pub trait Interceptor: Send {
    /// Chooses where a request frame goes. `None` keeps it local.
    fn request(&mut self, _frame: &RawFrame<'_>, _created: &mut NewInterceptors) -> Option<Destination> {
        None
    }

    /// Observes an event frame on its way to the client.
    fn event(&mut self, _frame: &RawFrame<'_>) {}

    /// The object was deleted and this interceptor is being dropped.
    fn removed(&mut self, _id: ObjectId) {}
}

/// Routes by opcode, falling back to a fixed destination.
pub struct RoutingTable {
    routes: HashMap<u16, Destination>,
    fallback: Option<Destination>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), fallback: None }
    }

    pub fn route(mut self, opcode: u16, destination: Destination) -> Self {
        self.routes.insert(opcode, destination);
        self
    }

    pub fn fallback(mut self, destination: Destination) -> Self {
        self.fallback = Some(destination);
        self
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for RoutingTable {
    fn request(&mut self, frame: &RawFrame<'_>, _created: &mut NewInterceptors) -> Option<Destination> {
        self.routes.get(&frame.header.opcode).copied().or(self.fallback)
    }
}

#[derive(Default)]
pub struct InterceptorChain {
    interceptors: HashMap<ObjectId, Box<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an interceptor for `id`, returning the one it replaces.
    pub fn insert(&mut self, id: ObjectId, interceptor: Box<dyn Interceptor>) -> Option<Box<dyn Interceptor>> {
        self.interceptors.insert(id, interceptor)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<Box<dyn Interceptor>> {
        self.interceptors.remove(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.interceptors.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn intercept_request(&mut self, frame: &RawFrame<'_>) -> Destination {
        let id = frame.header.object_id;
        let Some(interceptor) = self.interceptors.get_mut(&id) else {
            return Destination::ForwardOnly;
        };
        let mut created = NewInterceptors::default();
        let destination = interceptor.request(frame, &mut created).unwrap_or(Destination::LocalOnly);
        for (new_id, new_interceptor) in created.pending {
            debug!(id = new_id.0, "interceptor installed");
            self.interceptors.insert(new_id, new_interceptor);
        }
        destination
    }

    /// Lets interceptors observe an event. Never changes routing.
    ///
    /// `display.delete_id` retires the interceptor of the deleted id.
    pub fn handle_event(&mut self, frame: &RawFrame<'_>) {
        let id = frame.header.object_id;
        if id == ObjectId::DISPLAY && frame.header.opcode == display::DELETE_ID {
            if let Ok(deleted) = frame.cursor().read_u32() {
                let deleted = ObjectId(deleted);
                if let Some(mut interceptor) = self.interceptors.remove(&deleted) {
                    debug!(id = deleted.0, "interceptor removed");
                    interceptor.removed(deleted);
                }
            }
        }
        if let Some(interceptor) = self.interceptors.get_mut(&id) {
            interceptor.event(frame);
        }
    }
}
