//! Per-driver counters.
//!
//! Every driver owns one `DriverStats`, shared between the acceptor thread
//! (the only writer) and any number of readers through `DriverHandle::stats`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Why a draining connection left the drain set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Peer closed its side (read returned 0).
    PeerClosed,
    /// Read failed with something other than would-block.
    ReadError,
    /// Deadline passed before the peer closed.
    TimedOut,
}

/// Counters for one driver.
#[derive(Default)]
pub struct DriverStats {
    pub polls: AtomicU64,
    pub ready_signals: AtomicU64,
    pub accepted: AtomicU64,
    pub accept_errors: AtomicU64,
    pub admitted: AtomicU64,
    pub admission_refused: AtomicU64,
    /// Connections currently held (0 or 1).
    pub held: AtomicU64,
    /// High-water mark of `held`.
    pub max_held: AtomicU64,
    pub slots_allocated: AtomicU64,
    pub slots_reused: AtomicU64,
    pub released_direct: AtomicU64,
    pub drain_started: AtomicU64,
    pub drain_peer_closed: AtomicU64,
    pub drain_read_errors: AtomicU64,
    pub drain_timed_out: AtomicU64,
    pub drained_bytes: AtomicU64,
    pub sockets_closed: AtomicU64,
}

impl DriverStats {
    pub const fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            ready_signals: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            admission_refused: AtomicU64::new(0),
            held: AtomicU64::new(0),
            max_held: AtomicU64::new(0),
            slots_allocated: AtomicU64::new(0),
            slots_reused: AtomicU64::new(0),
            released_direct: AtomicU64::new(0),
            drain_started: AtomicU64::new(0),
            drain_peer_closed: AtomicU64::new(0),
            drain_read_errors: AtomicU64::new(0),
            drain_timed_out: AtomicU64::new(0),
            drained_bytes: AtomicU64::new(0),
            sockets_closed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_ready_signal(&self) {
        self.ready_signals.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_accepted(&self, reused_slot: bool) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        if reused_slot {
            self.slots_reused.fetch_add(1, Ordering::Relaxed);
        } else {
            self.slots_allocated.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn inc_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_refused(&self) {
        self.admission_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_held(&self, held: bool) {
        let value = held as u64;
        self.held.store(value, Ordering::Relaxed);
        self.max_held.fetch_max(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_released_direct(&self) {
        self.released_direct.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_drain_started(&self) {
        self.drain_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_drained_bytes(&self, n: u64) {
        self.drained_bytes.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_drain_finished(&self, outcome: DrainOutcome) {
        match outcome {
            DrainOutcome::PeerClosed => {
                self.drain_peer_closed.fetch_add(1, Ordering::Relaxed);
            }
            DrainOutcome::ReadError => {
                self.drain_read_errors.fetch_add(1, Ordering::Relaxed);
            }
            DrainOutcome::TimedOut => {
                self.drain_timed_out.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub fn inc_socket_closed(&self) {
        self.sockets_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current stats.
    pub fn snapshot(&self) -> DriverStatsSnapshot {
        DriverStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            ready_signals: self.ready_signals.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            admission_refused: self.admission_refused.load(Ordering::Relaxed),
            held: self.held.load(Ordering::Relaxed),
            max_held: self.max_held.load(Ordering::Relaxed),
            slots_allocated: self.slots_allocated.load(Ordering::Relaxed),
            slots_reused: self.slots_reused.load(Ordering::Relaxed),
            released_direct: self.released_direct.load(Ordering::Relaxed),
            drain_started: self.drain_started.load(Ordering::Relaxed),
            drain_peer_closed: self.drain_peer_closed.load(Ordering::Relaxed),
            drain_read_errors: self.drain_read_errors.load(Ordering::Relaxed),
            drain_timed_out: self.drain_timed_out.load(Ordering::Relaxed),
            drained_bytes: self.drained_bytes.load(Ordering::Relaxed),
            sockets_closed: self.sockets_closed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of driver stats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStatsSnapshot {
    pub polls: u64,
    pub ready_signals: u64,
    pub accepted: u64,
    pub accept_errors: u64,
    pub admitted: u64,
    pub admission_refused: u64,
    pub held: u64,
    pub max_held: u64,
    pub slots_allocated: u64,
    pub slots_reused: u64,
    pub released_direct: u64,
    pub drain_started: u64,
    pub drain_peer_closed: u64,
    pub drain_read_errors: u64,
    pub drain_timed_out: u64,
    pub drained_bytes: u64,
    pub sockets_closed: u64,
}

impl DriverStatsSnapshot {
    /// Connections that finished draining, for any reason.
    pub fn drain_finished(&self) -> u64 {
        self.drain_peer_closed + self.drain_read_errors + self.drain_timed_out
    }

    /// Connections currently in the drain set.
    pub fn draining(&self) -> u64 {
        self.drain_started.saturating_sub(self.drain_finished())
    }

    /// Calculate the delta between two snapshots.
    ///
    /// `held` and `max_held` are levels, not counters, and are carried over
    /// from `self`.
    pub fn delta(&self, prev: &Self) -> Self {
        Self {
            polls: self.polls.saturating_sub(prev.polls),
            ready_signals: self.ready_signals.saturating_sub(prev.ready_signals),
            accepted: self.accepted.saturating_sub(prev.accepted),
            accept_errors: self.accept_errors.saturating_sub(prev.accept_errors),
            admitted: self.admitted.saturating_sub(prev.admitted),
            admission_refused: self
                .admission_refused
                .saturating_sub(prev.admission_refused),
            held: self.held,
            max_held: self.max_held,
            slots_allocated: self.slots_allocated.saturating_sub(prev.slots_allocated),
            slots_reused: self.slots_reused.saturating_sub(prev.slots_reused),
            released_direct: self.released_direct.saturating_sub(prev.released_direct),
            drain_started: self.drain_started.saturating_sub(prev.drain_started),
            drain_peer_closed: self
                .drain_peer_closed
                .saturating_sub(prev.drain_peer_closed),
            drain_read_errors: self
                .drain_read_errors
                .saturating_sub(prev.drain_read_errors),
            drain_timed_out: self.drain_timed_out.saturating_sub(prev.drain_timed_out),
            drained_bytes: self.drained_bytes.saturating_sub(prev.drained_bytes),
            sockets_closed: self.sockets_closed.saturating_sub(prev.sockets_closed),
        }
    }
}
