//! # Server
//!
//! A `Display` owns the global list shared by every client session and
//! broadcasts changes to them. Each accepted transport becomes a
//! `ServerSession`: one task, one `Connection`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::config::Side;
use crate::connection::Connection;
use crate::error::CloseReason;
use crate::global::Bind;
use crate::global::Global;
use crate::interface::Interface;
use crate::transport::Transport;
use crate::transport::WirePacket;

/// Global changes a session may fall behind by before it resyncs.
pub const DEFAULT_GLOBAL_EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub enum GlobalEvent {
    Added(Global),
    Removed(u32),
}

struct DisplayInner {
    config: Config,
    globals: Mutex<BTreeMap<u32, Global>>,
    next_name: AtomicU32,
    events: broadcast::Sender<GlobalEvent>,
}

/// The server root. Cheap to clone; clones share the same globals.
#[derive(Clone)]
pub struct Display {
    inner: Arc<DisplayInner>,
}

impl Display {
    pub fn new(config: Config) -> Self {
        Self::with_event_capacity(config, DEFAULT_GLOBAL_EVENT_CAPACITY)
    }

    /// Like `new`, buffering at most `capacity` global changes per session.
    pub fn with_event_capacity(config: Config, capacity: usize) -> Self {
        let config = Config { side: Side::Server, ..config };
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(DisplayInner {
                config,
                globals: Mutex::new(BTreeMap::new()),
                next_name: AtomicU32::new(1),
                events,
            }),
        }
    }

    /// Advertises a new global to every current and future client.
    ///
    /// Returns the global's name. Names are never reused.
    pub fn create_global<B>(&self, interface: &'static Interface, version: u32, binder: B) -> u32
    where
        B: Bind + 'static,
    {
        let mut globals = self.inner.globals.lock().unwrap_or_else(PoisonError::into_inner);
        let name = self.inner.next_name.fetch_add(1, Ordering::Relaxed);
        let global = Global::implemented(name, interface, version, Arc::new(binder));
        globals.insert(name, global.clone());
        // No receivers simply means no sessions yet.
        let _ = self.inner.events.send(GlobalEvent::Added(global));
        info!(name, interface = interface.name, version, "global created");
        name
    }

    /// Withdraws a global. Returns false if the name is unknown.
    pub fn remove_global(&self, name: u32) -> bool {
        let mut globals = self.inner.globals.lock().unwrap_or_else(PoisonError::into_inner);
        if globals.remove(&name).is_none() {
            return false;
        }
        let _ = self.inner.events.send(GlobalEvent::Removed(name));
        info!(name, "global removed");
        true
    }

    pub fn globals(&self) -> Vec<Global> {
        let globals = self.inner.globals.lock().unwrap_or_else(PoisonError::into_inner);
        globals.values().cloned().collect()
    }

    /// Starts a session for a newly connected client.
    pub fn accept(&self, transport: Box<dyn Transport>) -> ServerSession {
        // Snapshot and subscribe under the lock so no change falls between.
        let (snapshot, events) = {
            let globals = self.inner.globals.lock().unwrap_or_else(PoisonError::into_inner);
            (globals.values().cloned().collect::<Vec<_>>(), self.inner.events.subscribe())
        };

        let (outlet, outbox) = mpsc::unbounded_channel();
        let mut conn = Connection::new(self.inner.config.clone(), outlet);
        for global in snapshot {
            // No registries exist yet, so nothing is marshalled.
            let _ = conn.announce_global(global);
        }
        info!("client session accepted");
        ServerSession { conn, display: self.clone(), transport, outbox, events }
    }
}

pub struct ServerSession {
    conn: Connection,
    display: Display,
    transport: Box<dyn Transport>,
    outbox: mpsc::UnboundedReceiver<WirePacket>,
    events: broadcast::Receiver<GlobalEvent>,
}

impl ServerSession {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Serves the client until the connection closes.
    pub async fn run(self) -> CloseReason {
        let ServerSession { mut conn, display, transport, mut outbox, mut events } = self;
        let mut listening = true;

        while conn.is_open() {
            tokio::select! {
                received = transport.recv() => match received {
                    Ok(Some(packet)) => {
                        if let Err(e) = conn.dispatch(packet) {
                            debug!(error = %e, "dispatch stopped");
                        }
                        conn.flush();
                    }
                    Ok(None) => conn.close_with(CloseReason::TransportClosed),
                    Err(e) => {
                        warn!(error = %e, "transport failed");
                        conn.close_with(CloseReason::TransportClosed);
                    }
                },
                Some(packet) = outbox.recv() => {
                    if let Err(e) = transport.send(packet).await {
                        warn!(error = %e, "send failed");
                        conn.close_with(CloseReason::TransportClosed);
                    }
                },
                event = events.recv(), if listening => {
                    let applied = match event {
                        Ok(GlobalEvent::Added(global)) => conn.announce_global(global),
                        Ok(GlobalEvent::Removed(name)) => conn.remove_global(name),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "session fell behind global changes, resyncing");
                            resync_globals(&mut conn, &display.globals())
                        }
                        Err(RecvError::Closed) => {
                            listening = false;
                            Ok(())
                        }
                    };
                    if let Err(e) = applied {
                        warn!(error = %e, "could not forward global change");
                    }
                    conn.flush();
                },
            }
        }

        // Whatever was flushed before close, a final error included, still goes out.
        while let Ok(packet) = outbox.try_recv() {
            if transport.send(packet).await.is_err() {
                break;
            }
        }
        let reason = conn.close_reason().cloned().unwrap_or(CloseReason::Requested);
        info!(%reason, "client session ended");
        reason
    }
}

/// Brings a session's globals in line with `current` after missed changes.
fn resync_globals(conn: &mut Connection, current: &[Global]) -> crate::error::Result<()> {
    let gone: Vec<u32> = conn
        .globals()
        .live()
        .map(|g| g.name)
        .filter(|name| !current.iter().any(|g| g.name == *name))
        .collect();
    for name in gone {
        conn.remove_global(name)?;
    }
    for global in current {
        // Already known names are skipped by announce.
        conn.announce_global(global.clone())?;
    }
    Ok(())
}
