//! Graceful close: connections whose write side has been shut down and whose
//! unread bytes are being discarded until the peer closes or the drain
//! deadline passes.

use crate::connection::Connection;
use crate::stats::{DrainOutcome, DriverStats};
use crate::types::ConnState;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Instant;

/// Scratch buffer for discarded bytes.
const DRAIN_SCRATCH_SIZE: usize = 4096;

/// Reads between deadline checks while a peer keeps sending.
const READS_PER_DEADLINE_CHECK: usize = 16;

struct Draining {
    conn: Connection,
    deadline: Instant,
}

/// The set of draining connections, keyed by poll token.
///
/// Tokens are slab keys and stay below the listener token offset.
pub(crate) struct DrainSet {
    entries: Slab<Draining>,
    scratch: Box<[u8]>,
    stats: Arc<DriverStats>,
}

impl DrainSet {
    pub(crate) fn new(stats: Arc<DriverStats>) -> Self {
        Self {
            entries: Slab::new(),
            scratch: vec![0u8; DRAIN_SCRATCH_SIZE].into_boxed_slice(),
            stats,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, token: Token) -> bool {
        self.entries.contains(token.0)
    }

    /// Start draining `conn` until `deadline`.
    ///
    /// The connection's write side must already be shut down. If it cannot
    /// be registered for readiness it is handed back for immediate release.
    pub(crate) fn insert(
        &mut self,
        registry: &Registry,
        mut conn: Connection,
        deadline: Instant,
    ) -> Result<(), Connection> {
        let entry = self.entries.vacant_entry();
        let token = Token(entry.key());
        if let Err(e) = registry.register(
            &mut SourceFd(&conn.as_raw_fd()),
            token,
            Interest::READABLE,
        ) {
            tracing::debug!(peer = %conn.peer_addr(), error = %e, "failed to register draining connection");
            return Err(conn);
        }

        conn.set_state(ConnState::Draining);
        entry.insert(Draining { conn, deadline });
        Ok(())
    }

    /// Discard whatever the peer has sent.
    ///
    /// Returns the connection when draining is over: the peer closed, the
    /// read failed, or the deadline passed while the peer kept sending.
    pub(crate) fn on_readable(
        &mut self,
        registry: &Registry,
        token: Token,
        now: Instant,
    ) -> Option<(Connection, DrainOutcome)> {
        let entry = self.entries.get_mut(token.0)?;

        let mut drained = 0u64;
        let mut reads = 0usize;
        let outcome = loop {
            match entry.conn.stream().read(&mut self.scratch) {
                Ok(0) => break Some(DrainOutcome::PeerClosed),
                Ok(n) => {
                    drained += n as u64;
                    reads += 1;
                    if reads % READS_PER_DEADLINE_CHECK == 0 && Instant::now() >= entry.deadline {
                        break Some(DrainOutcome::TimedOut);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if now >= entry.deadline {
                        break Some(DrainOutcome::TimedOut);
                    }
                    break None;
                }
                Err(_) => break Some(DrainOutcome::ReadError),
            }
        };

        if drained > 0 {
            self.stats.add_drained_bytes(drained);
        }

        outcome.map(|outcome| (self.remove(registry, token.0), outcome))
    }

    /// Remove every connection whose deadline is at or before `now`.
    pub(crate) fn expire(&mut self, registry: &Registry, now: Instant) -> Vec<Connection> {
        let expired: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, d)| d.deadline <= now)
            .map(|(key, _)| key)
            .collect();

        expired
            .into_iter()
            .map(|key| self.remove(registry, key))
            .collect()
    }

    /// Remove every connection regardless of deadline.
    pub(crate) fn take_all(&mut self, registry: &Registry) -> Vec<Connection> {
        let keys: Vec<usize> = self.entries.iter().map(|(key, _)| key).collect();
        keys.into_iter()
            .map(|key| self.remove(registry, key))
            .collect()
    }

    /// Earliest drain deadline, if anything is draining.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(_, d)| d.deadline).min()
    }

    fn remove(&mut self, registry: &Registry, key: usize) -> Connection {
        let Draining { conn, .. } = self.entries.remove(key);
        if let Err(e) = registry.deregister(&mut SourceFd(&conn.as_raw_fd())) {
            tracing::debug!(peer = %conn.peer_addr(), error = %e, "failed to deregister draining connection");
        }
        conn
    }
}
