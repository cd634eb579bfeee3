//! Cross-thread entry points into the acceptor.
//!
//! Everything the acceptor owns is touched only by the acceptor thread. The
//! exceptions live here, behind one mutex: the shutdown flag, the capacity
//! ("ready") flag, and the ordered queue of connections submitted for close.
//! Producers follow the same sequence: lock, mutate, unlock, then wake the
//! acceptor if nothing else has since its last drain of the shared state.

use crate::connection::Connection;
use crate::metrics::CONNECTIONS_ACTIVE;
use crate::stats::{DriverStats, DriverStatsSnapshot};
use crate::types::{ConnState, Phase};
use mio::Waker;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// State shared between the acceptor and other threads.
pub(crate) struct Shared {
    state: Mutex<SharedState>,
    waker: Waker,
    /// Connections admitted and not yet returned or dropped.
    active: AtomicUsize,
    /// Published by the acceptor on every transition.
    phase: AtomicU8,
    pub(crate) stats: Arc<DriverStats>,
}

#[derive(Default)]
struct SharedState {
    shutdown: bool,
    ready: bool,
    /// A wake-up has been sent that the acceptor has not consumed yet.
    wake_pending: bool,
    /// The acceptor has exited; late submissions are closed in place.
    stopped: bool,
    closing: VecDeque<Connection>,
}

/// What the acceptor collected from the shared state in one pass.
pub(crate) struct Pending {
    pub(crate) shutdown: bool,
    pub(crate) ready: bool,
    pub(crate) closing: VecDeque<Connection>,
}

impl Shared {
    pub(crate) fn new(waker: Waker, stats: Arc<DriverStats>) -> Self {
        Self {
            state: Mutex::new(SharedState::default()),
            waker,
            active: AtomicUsize::new(0),
            phase: AtomicU8::new(Phase::Starting.as_u8()),
            stats,
        }
    }

    /// Interrupt the acceptor's readiness wait.
    pub(crate) fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            tracing::warn!(error = %e, "failed to wake acceptor");
        }
    }

    /// Take everything other threads have queued since the last call.
    ///
    /// Called only by the acceptor. Clears `wake_pending` so the next
    /// producer wakes the acceptor again.
    pub(crate) fn take_pending(&self) -> Pending {
        let mut state = self.state.lock();
        state.wake_pending = false;
        Pending {
            shutdown: state.shutdown,
            ready: mem::take(&mut state.ready),
            closing: mem::take(&mut state.closing),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Mark the acceptor as gone and hand back anything still queued.
    pub(crate) fn mark_stopped(&self) -> VecDeque<Connection> {
        let mut state = self.state.lock();
        state.stopped = true;
        mem::take(&mut state.closing)
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    pub(crate) fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Accounting token carried by every admitted connection.
///
/// The acceptor settles the lease when the connection comes back through
/// `submit_for_close`. If the service layer drops the connection instead,
/// the lease is released on drop and the acceptor is woken if it is waiting
/// for active connections to finish.
pub(crate) struct Lease {
    shared: Option<Arc<Shared>>,
}

impl Lease {
    pub(crate) fn acquire(shared: &Arc<Shared>) -> Self {
        shared.active.fetch_add(1, Ordering::AcqRel);
        CONNECTIONS_ACTIVE.increment();
        Self {
            shared: Some(shared.clone()),
        }
    }

    /// Release the lease from the acceptor thread, without a wake-up.
    pub(crate) fn settle(mut self) {
        if let Some(shared) = self.shared.take() {
            shared.active.fetch_sub(1, Ordering::AcqRel);
            CONNECTIONS_ACTIVE.decrement();
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.active.fetch_sub(1, Ordering::AcqRel);
            CONNECTIONS_ACTIVE.decrement();
            if shared.is_shutdown() {
                shared.wake();
            }
        }
    }
}

/// Cloneable handle for threads other than the acceptor.
#[derive(Clone)]
pub struct DriverHandle {
    pub(crate) shared: Arc<Shared>,
}

impl DriverHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Return a serviced connection to the driver for a graceful close.
    ///
    /// Callable from any thread. A connection that never received data since
    /// it was accepted or last detached is closed immediately; otherwise its
    /// write side is shut down and unread bytes are drained until the peer
    /// closes or the endpoint's drain timeout passes.
    pub fn submit_for_close(&self, mut conn: Connection) {
        conn.set_state(ConnState::AwaitingClose);

        let (wake, late) = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                (false, Some(conn))
            } else {
                state.closing.push_back(conn);
                (!mem::replace(&mut state.wake_pending, true), None)
            }
        };

        // Dropped outside the lock: the lease takes it again.
        if let Some(conn) = late {
            tracing::debug!(peer = %conn.peer_addr(), "driver stopped, closing connection in place");
            drop(conn);
        }

        if wake {
            self.shared.wake();
        }
    }

    /// Signal that the admission function has capacity again.
    ///
    /// A held connection is re-offered on the acceptor's next pass.
    pub fn notify_ready(&self) {
        let wake = {
            let mut state = self.shared.state.lock();
            state.ready = true;
            !mem::replace(&mut state.wake_pending, true)
        };
        if wake {
            self.shared.wake();
        }
    }

    /// Request shutdown: listening sockets close on the acceptor's next pass,
    /// admitted and draining connections are still finished.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.wake_pending = true;
        }
        tracing::info!("driver shutdown requested");
        self.shared.wake();
    }

    /// Interrupt the acceptor's readiness wait unconditionally.
    pub fn trigger(&self) {
        self.shared.wake();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Current phase of the acceptor.
    ///
    /// `Draining` is published after every listener has been closed.
    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Connections currently admitted to the service layer.
    pub fn active_connections(&self) -> usize {
        self.shared.active()
    }

    pub fn stats(&self) -> DriverStatsSnapshot {
        self.shared.stats.snapshot()
    }
}
