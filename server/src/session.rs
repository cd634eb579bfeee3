//! PING/QUIT sessions on admitted connections.
//!
//! A worker serves one connection at a time. Each request is answered and
//! the connection is detached so the next request starts with fresh byte
//! counters. Whatever ends the session, the connection goes back to the
//! driver through `submit_for_close`.

use crate::metrics::{
    PING_REQUESTS, PROTOCOL_ERRORS, QUIT_REQUESTS, SESSIONS_ACTIVE, SESSIONS_TIMED_OUT,
};
use crossbeam_channel::Receiver;
use protocol_ping::{ParseError, Request, Response};
use sock_driver::{Connection, DriverHandle, Error};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed its write side.
    PeerClosed,
    /// Client sent QUIT.
    Quit,
    /// Client sent a line too long to parse.
    ProtocolError,
    /// No complete request arrived within the I/O timeout.
    TimedOut,
    /// Shutdown was requested while the connection was idle.
    Shutdown,
    /// Read or write failed.
    Failed,
}

/// Serve requests until the session ends.
pub fn serve(conn: &mut Connection, handle: &DriverHandle) -> SessionEnd {
    loop {
        if conn.buffered() == 0 && handle.is_shutdown() {
            return SessionEnd::Shutdown;
        }

        let parsed = match conn.fill_buf() {
            Ok(buf) if buf.is_empty() => return SessionEnd::PeerClosed,
            Ok(buf) => Request::parse(buf),
            Err(e) => return failed(conn, e),
        };

        let (request, consumed) = match parsed {
            Ok((request, consumed)) => (Some(request), consumed),
            Err(ParseError::Incomplete) => match conn.fill_more() {
                Ok(0) => return SessionEnd::PeerClosed,
                Ok(_) => continue,
                Err(e) => return failed(conn, e),
            },
            Err(ParseError::Invalid { consumed }) => {
                PROTOCOL_ERRORS.increment();
                (None, consumed)
            }
        };

        let response = match request {
            Some(Request::Ping) => {
                PING_REQUESTS.increment();
                Response::Pong
            }
            Some(Request::Quit) => {
                QUIT_REQUESTS.increment();
                Response::Bye
            }
            None => Response::Error,
        };

        conn.consume(consumed);
        if let Err(e) = conn.write_all(response.as_bytes()) {
            return failed(conn, e);
        }
        conn.detach();

        match request {
            Some(Request::Quit) => return SessionEnd::Quit,
            // A line that never ends cannot be skipped.
            None if consumed == 0 => return SessionEnd::ProtocolError,
            _ => {}
        }
    }
}

fn failed(conn: &Connection, error: Error) -> SessionEnd {
    match error {
        Error::TimedOut => {
            SESSIONS_TIMED_OUT.increment();
            SessionEnd::TimedOut
        }
        e => {
            tracing::debug!(peer = %conn.peer_addr(), error = %e, "session I/O failed");
            SessionEnd::Failed
        }
    }
}

/// Worker loop: serve connections from the admission queue until the driver
/// goes away. Returns the number of sessions served.
pub fn run_worker(worker_id: usize, queue: Receiver<Connection>, handle: DriverHandle) -> u64 {
    let mut sessions = 0;

    while let Ok(mut conn) = queue.recv() {
        // A queue slot just opened up.
        handle.notify_ready();

        SESSIONS_ACTIVE.increment();
        let end = serve(&mut conn, &handle);
        SESSIONS_ACTIVE.decrement();

        tracing::debug!(
            worker_id,
            peer = %conn.peer_addr(),
            endpoint = conn.endpoint_name(),
            ?end,
            "session ended"
        );
        handle.submit_for_close(conn);
        sessions += 1;
    }

    tracing::debug!(worker_id, sessions, "worker exiting");
    sessions
}
