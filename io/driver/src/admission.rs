//! The seam between the acceptor and the service layer.

use crate::connection::Connection;
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Decides whether a newly accepted connection can be handed to the service
/// layer right now.
///
/// Called only from the acceptor thread and must not block. Refusal hands
/// the connection back; the acceptor then holds it, stops accepting, and
/// offers it again once capacity is signaled or the retry interval passes.
pub trait Admission: Send + 'static {
    fn try_admit(&mut self, conn: Connection) -> Result<(), Connection>;
}

impl<F> Admission for F
where
    F: FnMut(Connection) -> Result<(), Connection> + Send + 'static,
{
    fn try_admit(&mut self, conn: Connection) -> Result<(), Connection> {
        self(conn)
    }
}

/// Admission into a bounded work queue.
///
/// A full queue refuses the connection. Consumers should call
/// [`DriverHandle::notify_ready`](crate::DriverHandle::notify_ready) after
/// taking work so a held connection is retried promptly.
pub struct QueueAdmission {
    tx: Sender<Connection>,
}

impl QueueAdmission {
    /// Create an admission queue holding at most `depth` connections.
    pub fn bounded(depth: usize) -> (Self, Receiver<Connection>) {
        let (tx, rx) = crossbeam_channel::bounded(depth);
        (Self { tx }, rx)
    }
}

impl Admission for QueueAdmission {
    fn try_admit(&mut self, conn: Connection) -> Result<(), Connection> {
        match self.tx.try_send(conn) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(conn)) => Err(conn),
            Err(TrySendError::Disconnected(conn)) => {
                tracing::warn!(peer = %conn.peer_addr(), "admission queue has no consumers");
                Err(conn)
            }
        }
    }
}
