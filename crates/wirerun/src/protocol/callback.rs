use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use wirepack::ArgKind;
use wirepack::ObjectId;

use crate::connection::Connection;
use crate::error::Error;
use crate::error::Result;
use crate::interface::Dispatch;
use crate::interface::Interface;
use crate::interface::Message;
use crate::interface::MessageDesc;

pub const DONE: u16 = 0;

pub static CALLBACK: Interface = Interface {
    name: "wl_callback",
    version: 1,
    requests: &[],
    events: &[MessageDesc { name: "done", signature: &[ArgKind::Uint], destructor: true }],
};

pub trait CallbackEvents: Send {
    fn done(&mut self, conn: &mut Connection, callback: ObjectId, data: u32) -> Result<()>;

    fn destroyed(&mut self, _id: ObjectId) {}
}

/// Dispatches callback events to a `CallbackEvents` implementation.
pub struct Events<T>(pub T);

impl<T: CallbackEvents> Dispatch for Events<T> {
    fn dispatch(&mut self, conn: &mut Connection, message: Message) -> Result<()> {
        match message.opcode {
            DONE => {
                let object = message.object;
                let data = message.reader().uint()?;
                self.0.done(conn, object, data)
            }
            _ => Err(super::unknown_opcode(&CALLBACK, &message)),
        }
    }

    fn destroyed(&mut self, id: ObjectId) {
        self.0.destroyed(id)
    }
}

/// Resolves a `SyncCompletion` from the callback of one `sync` request.
pub struct SyncCallback {
    tx: Option<oneshot::Sender<Result<u32>>>,
}

impl SyncCallback {
    pub fn new() -> (Self, SyncCompletion) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, SyncCompletion { rx })
    }
}

impl CallbackEvents for SyncCallback {
    fn done(&mut self, _conn: &mut Connection, _callback: ObjectId, data: u32) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(data));
        }
        Ok(())
    }

    fn destroyed(&mut self, _id: ObjectId) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(Error::Cancelled));
        }
    }
}

/// Completion of a `sync` request.
///
/// Resolves with the serial carried by `done`, or `Error::Cancelled` if the
/// connection closed first.
pub struct SyncCompletion {
    rx: oneshot::Receiver<Result<u32>>,
}

impl SyncCompletion {
    pub async fn wait(self) -> Result<u32> {
        self.rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Returns the result if the completion has resolved.
    pub fn try_take(&mut self) -> Option<Result<u32>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(Error::Cancelled)),
        }
    }
}
