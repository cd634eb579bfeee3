//! The acceptor thread.
//!
//! One thread owns every endpoint, the held connection, and the drain set.
//! Each turn it waits on the listeners, the draining sockets, and the waker,
//! then:
//!
//! 1. discards bytes from readable draining connections and releases the ones
//!    that finished or ran past their deadline;
//! 2. picks up shutdown, capacity signals, and close submissions from the
//!    shared state;
//! 3. re-offers the held connection, if any;
//! 4. otherwise accepts one connection from each ready listener, in rotating
//!    order, stopping at the first refusal;
//! 5. half-closes submitted connections and moves them into the drain set, or
//!    releases them directly if they never received data.
//!
//! While a connection is held the listeners are out of the wait set, so the
//! OS backlog absorbs new clients until the service layer catches up.

use crate::admission::Admission;
use crate::close::DrainSet;
use crate::connection::Connection;
use crate::endpoint::{Endpoint, LISTENER_TOKEN_OFFSET};
use crate::error::{Error, Result};
use crate::handle::{Lease, Shared};
use crate::metrics::{
    ACCEPT_ERRORS, ADMISSION_REFUSED, CONNECTIONS_ACCEPTED, CONNECTIONS_DRAINING,
};
use crate::stats::{DrainOutcome, DriverStats};
use crate::types::{ConnState, Phase};
use mio::{Events, Poll, Token};
use std::io;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Token for the cross-thread waker.
pub(crate) const WAKE_TOKEN: Token = Token(1 << 31);

/// How long a listener is skipped after an accept error.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub(crate) struct Acceptor<A: Admission> {
    poll: Poll,
    events: Events,
    endpoints: Vec<Endpoint>,
    draining: DrainSet,
    /// Accepted but refused by admission. Never more than one.
    held: Option<Connection>,
    admission: A,
    shared: Arc<Shared>,
    stats: Arc<DriverStats>,
    rotation: Rotation,
    admission_retry: Option<Duration>,
    phase: Phase,
    /// Draining tokens reported by the last wait.
    drain_ready: Vec<Token>,
}

impl<A: Admission> Acceptor<A> {
    pub(crate) fn new(
        poll: Poll,
        events_capacity: usize,
        endpoints: Vec<Endpoint>,
        admission: A,
        shared: Arc<Shared>,
        admission_retry: Option<Duration>,
    ) -> Self {
        let stats = shared.stats.clone();
        Self {
            poll,
            events: Events::with_capacity(events_capacity),
            endpoints,
            draining: DrainSet::new(stats.clone()),
            held: None,
            admission,
            shared,
            stats,
            rotation: Rotation::default(),
            admission_retry,
            phase: Phase::Starting,
            drain_ready: Vec::new(),
        }
    }

    /// Run until shutdown completes or the readiness wait fails.
    pub(crate) fn run(mut self) -> Result<()> {
        self.set_phase(Phase::Running);
        tracing::debug!(
            endpoints = self.endpoints.iter().filter(|ep| ep.is_listening()).count(),
            "acceptor running"
        );

        let result = loop {
            if let Err(e) = self.turn() {
                break Err(e);
            }
            if self.phase == Phase::Terminated {
                break Ok(());
            }
        };

        self.finish();
        self.set_phase(Phase::Terminated);
        result
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.shared.set_phase(phase);
    }

    /// One iteration of the control loop.
    pub(crate) fn turn(&mut self) -> Result<()> {
        let timeout = self.timeout(Instant::now());
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "readiness wait failed, acceptor cannot continue");
                return Err(Error::Poll(e));
            }
        }
        self.stats.inc_poll();

        self.drain_ready.clear();
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKE_TOKEN {
                // Only interrupts the wait; the work is in the shared state.
                continue;
            }
            if token.0 >= LISTENER_TOKEN_OFFSET {
                if let Some(ep) = self.endpoints.get_mut(token.0 - LISTENER_TOKEN_OFFSET) {
                    ep.ready = true;
                }
            } else {
                self.drain_ready.push(token);
            }
        }

        let now = Instant::now();
        self.drain(now);

        let pending = self.shared.take_pending();
        if pending.ready {
            self.stats.inc_ready_signal();
        }
        if pending.shutdown && self.phase == Phase::Running {
            self.begin_shutdown();
        }

        if self.held.is_some() {
            self.retry_held();
        } else if self.phase == Phase::Running {
            self.accept_ready(now);
        }

        for mut conn in pending.closing {
            if let Some(lease) = conn.take_lease() {
                lease.settle();
            }
            self.close(conn, now);
        }

        if self.phase == Phase::Draining
            && self.held.is_none()
            && self.draining.is_empty()
            && self.shared.active() == 0
        {
            self.set_phase(Phase::Terminated);
            tracing::info!("acceptor terminated");
        }

        Ok(())
    }

    /// How long the next wait may block.
    fn timeout(&self, now: Instant) -> Option<Duration> {
        let mut deadline = self.draining.next_deadline();

        if self.held.is_none() && self.phase == Phase::Running {
            for ep in self.endpoints.iter().filter(|ep| ep.ready && ep.is_listening()) {
                match ep.retry_at {
                    // Pending connections with no new edge to report them.
                    None => return Some(Duration::ZERO),
                    Some(at) => deadline = Some(deadline.map_or(at, |d| d.min(at))),
                }
            }
        }

        let mut timeout = deadline.map(|d| d.saturating_duration_since(now));
        if self.held.is_some()
            && let Some(retry) = self.admission_retry
        {
            timeout = Some(timeout.map_or(retry, |t| t.min(retry)));
        }
        timeout
    }

    /// Service readable draining connections and expire overdue ones.
    fn drain(&mut self, now: Instant) {
        let ready = mem::take(&mut self.drain_ready);
        for &token in &ready {
            if let Some((conn, outcome)) =
                self.draining.on_readable(self.poll.registry(), token, now)
            {
                self.finish_drain(conn, outcome);
            }
        }
        self.drain_ready = ready;

        for conn in self.draining.expire(self.poll.registry(), now) {
            self.finish_drain(conn, DrainOutcome::TimedOut);
        }
    }

    fn finish_drain(&mut self, conn: Connection, outcome: DrainOutcome) {
        self.stats.inc_drain_finished(outcome);
        CONNECTIONS_DRAINING.decrement();
        tracing::trace!(peer = %conn.peer_addr(), ?outcome, "drain finished");
        self.release(conn);
    }

    /// Close every listener. Connections already admitted or draining are
    /// still finished.
    fn begin_shutdown(&mut self) {
        for ep in &mut self.endpoints {
            ep.stop(self.poll.registry());
        }
        self.set_phase(Phase::Draining);
        tracing::info!(
            active = self.shared.active(),
            draining = self.draining.len(),
            held = self.held.is_some(),
            "acceptor draining"
        );
    }

    /// Hand `conn` to the admission function. A refused connection is
    /// returned without a lease.
    fn offer(&mut self, mut conn: Connection) -> std::result::Result<(), Connection> {
        conn.set_state(ConnState::Active);
        conn.attach_lease(Lease::acquire(&self.shared));
        match self.admission.try_admit(conn) {
            Ok(()) => {
                self.stats.inc_admitted();
                Ok(())
            }
            Err(mut conn) => {
                if let Some(lease) = conn.take_lease() {
                    lease.settle();
                }
                self.stats.inc_refused();
                ADMISSION_REFUSED.increment();
                Err(conn)
            }
        }
    }

    fn hold(&mut self, conn: Connection) {
        tracing::debug!(peer = %conn.peer_addr(), endpoint = conn.endpoint_name(), "admission refused, holding connection");
        self.held = Some(conn);
        self.stats.set_held(true);
        for ep in &mut self.endpoints {
            ep.pause(self.poll.registry());
        }
    }

    fn retry_held(&mut self) {
        let Some(conn) = self.held.take() else {
            return;
        };

        match self.offer(conn) {
            Ok(()) => {
                self.stats.set_held(false);
                tracing::debug!("held connection admitted");
                if self.phase == Phase::Running {
                    for ep in &mut self.endpoints {
                        if let Err(e) = ep.resume(self.poll.registry()) {
                            tracing::warn!(endpoint = ep.name(), error = %e, "failed to resume listener");
                        }
                    }
                }
            }
            Err(conn) if self.phase == Phase::Draining => {
                // Never reached a service thread: nothing to drain.
                self.stats.set_held(false);
                tracing::debug!(peer = %conn.peer_addr(), "closing held connection at shutdown");
                self.stats.inc_released_direct();
                self.release(conn);
            }
            Err(conn) => self.held = Some(conn),
        }
    }

    /// Accept one connection from each ready listener, starting where the
    /// last pass left off.
    fn accept_ready(&mut self, now: Instant) {
        let len = self.endpoints.len();
        let start = self.rotation.start(len);

        for i in 0..len {
            let idx = (start + i) % len;
            let ep = &mut self.endpoints[idx];
            if !ep.ready || !ep.is_listening() {
                continue;
            }
            if let Some(at) = ep.retry_at {
                if now < at {
                    continue;
                }
                ep.retry_at = None;
            }

            match ep.accept() {
                Ok(None) => {}
                Ok(Some((conn, reused))) => {
                    self.stats.inc_accepted(reused);
                    CONNECTIONS_ACCEPTED.increment();
                    tracing::trace!(peer = %conn.peer_addr(), endpoint = conn.endpoint_name(), "accepted");

                    if let Err(conn) = self.offer(conn) {
                        self.hold(conn);
                        self.rotation.stopped_at(idx, len);
                        return;
                    }
                }
                Err(e) => {
                    self.stats.inc_accept_error();
                    ACCEPT_ERRORS.increment();
                    tracing::warn!(endpoint = ep.name(), error = %e, "accept failed");
                    ep.retry_at = Some(now + ACCEPT_ERROR_BACKOFF);
                }
            }
        }
    }

    /// Close a connection returned by the service layer.
    fn close(&mut self, conn: Connection, now: Instant) {
        if conn.bytes_received() == 0 {
            self.stats.inc_released_direct();
            self.release(conn);
            return;
        }

        if let Err(e) = conn.shutdown_write() {
            tracing::debug!(peer = %conn.peer_addr(), error = %e, "shutdown failed, closing without drain");
            self.stats.inc_released_direct();
            self.release(conn);
            return;
        }

        let drain_timeout = self
            .endpoints
            .get(conn.endpoint().as_usize())
            .map(|ep| ep.config().get_drain_timeout())
            .unwrap_or_default();

        match self
            .draining
            .insert(self.poll.registry(), conn, now + drain_timeout)
        {
            Ok(()) => {
                self.stats.inc_drain_started();
                CONNECTIONS_DRAINING.increment();
            }
            Err(conn) => {
                self.stats.inc_released_direct();
                self.release(conn);
            }
        }
    }

    /// Close the socket and return the slot to its endpoint.
    fn release(&mut self, mut conn: Connection) {
        conn.set_state(ConnState::Free);
        let (endpoint, slot) = conn.release();
        self.stats.inc_socket_closed();
        if let Some(ep) = self.endpoints.get_mut(endpoint.as_usize()) {
            ep.release(slot);
        }
    }

    /// Tear down after the loop exits.
    fn finish(&mut self) {
        for mut conn in self.shared.mark_stopped() {
            if let Some(lease) = conn.take_lease() {
                lease.settle();
            }
            self.release(conn);
        }
        if let Some(conn) = self.held.take() {
            self.stats.set_held(false);
            self.release(conn);
        }
        for conn in self.draining.take_all(self.poll.registry()) {
            self.finish_drain(conn, DrainOutcome::TimedOut);
        }
        for ep in &mut self.endpoints {
            ep.stop(self.poll.registry());
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }
}

/// Rotating start position across endpoints.
///
/// A pass that is cut short by a refusal ends at the refused endpoint, and
/// the next pass starts right after it. A full pass leaves the start where
/// it was, which is also right after the last endpoint served.
#[derive(Debug, Default)]
pub(crate) struct Rotation {
    start: usize,
}

impl Rotation {
    pub(crate) fn start(&self, len: usize) -> usize {
        if len == 0 { 0 } else { self.start % len }
    }

    /// The pass stopped at `idx`.
    pub(crate) fn stopped_at(&mut self, idx: usize, len: usize) {
        if len > 0 {
            self.start = (idx + 1) % len;
        }
    }
}
