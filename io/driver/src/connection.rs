//! Accepted client connections and the service-side byte-stream contract.
//!
//! The socket is non-blocking for its whole life. Service threads get a
//! blocking-looking API: each `read`/`write` makes one attempt, and on
//! would-block waits for readiness (bounded by the endpoint's I/O timeout)
//! and retries exactly once.

use crate::error::{Error, Result};
use crate::handle::Lease;
use crate::slot::Slot;
use crate::types::{ConnState, EndpointId};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A client connection accepted by the driver.
///
/// Admitted connections are owned by the service layer until they are handed
/// back with [`DriverHandle::submit_for_close`](crate::DriverHandle::submit_for_close).
/// Dropping a connection instead closes the socket without a drain.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    endpoint: EndpointId,
    endpoint_name: Arc<str>,
    io_timeout: Duration,
    bytes_received: u64,
    bytes_sent: u64,
    state: ConnState,
    slot: Slot,
    lease: Option<Lease>,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        endpoint: EndpointId,
        endpoint_name: Arc<str>,
        io_timeout: Duration,
        slot: Slot,
    ) -> Self {
        Self {
            stream,
            peer,
            endpoint,
            endpoint_name,
            io_timeout,
            bytes_received: 0,
            bytes_sent: 0,
            state: ConnState::Active,
            slot,
            lease: None,
        }
    }

    /// Read into `buf`.
    ///
    /// Bytes already buffered by [`fill_buf`](Self::fill_buf) are returned
    /// first. `Ok(0)` means the peer closed its write side.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.slot.is_empty() {
            return Ok(self.slot.copy_to(buf));
        }

        let stream = &self.stream;
        let n = io_retry(stream, self.io_timeout, libc::POLLIN, || (&*stream).read(buf))?;
        self.bytes_received += n as u64;
        Ok(n)
    }

    /// Write from `buf`, returning the number of bytes accepted by the socket.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let stream = &self.stream;
        let n = io_retry(stream, self.io_timeout, libc::POLLOUT, || (&*stream).write(buf))?;
        self.bytes_sent += n as u64;
        Ok(n)
    }

    /// Write all of `buf`. Each partial write gets its own timeout.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    /// Return buffered bytes, reading from the socket if none are buffered.
    ///
    /// An empty slice means the peer closed its write side. Call
    /// [`consume`](Self::consume) for the bytes that were used.
    pub fn fill_buf(&mut self) -> Result<&[u8]> {
        if self.slot.is_empty() {
            let stream = &self.stream;
            let slot = &mut self.slot;
            let n = io_retry(stream, self.io_timeout, libc::POLLIN, || {
                (&*stream).read(slot.spare_mut())
            })?;
            slot.commit(n);
            self.bytes_received += n as u64;
        }
        Ok(self.slot.as_slice())
    }

    /// Read more bytes into the buffer, keeping what is already there.
    ///
    /// Used when the buffered bytes do not yet form a complete message.
    /// Returns the number of new bytes; `Ok(0)` is end of stream, and a full
    /// buffer is reported as `InvalidData`.
    pub fn fill_more(&mut self) -> Result<usize> {
        if self.slot.available() == self.slot.capacity() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "read buffer full").into());
        }
        let stream = &self.stream;
        let slot = &mut self.slot;
        let n = io_retry(stream, self.io_timeout, libc::POLLIN, || {
            (&*stream).read(slot.spare_mut())
        })?;
        slot.commit(n);
        self.bytes_received += n as u64;
        Ok(n)
    }

    /// Mark `n` buffered bytes as consumed.
    pub fn consume(&mut self, n: usize) {
        self.slot.consume(n);
    }

    /// Number of bytes buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.slot.available()
    }

    /// Reset the connection for another keep-alive request.
    ///
    /// Byte counters restart; the buffer is kept. Bytes of a pipelined
    /// request that are already buffered count as received, so closing the
    /// connection afterwards still drains.
    pub fn detach(&mut self) {
        self.bytes_received = self.slot.available() as u64;
        self.bytes_sent = 0;
        self.state = ConnState::Active;
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Bytes received from the peer since accept or the last `detach`.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Bytes sent to the peer since accept or the last `detach`.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnState) {
        self.state = state;
    }

    pub(crate) fn attach_lease(&mut self, lease: Lease) {
        self.lease = Some(lease);
    }

    pub(crate) fn take_lease(&mut self) -> Option<Lease> {
        self.lease.take()
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub(crate) fn shutdown_write(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Write)
    }

    /// Close the socket and hand back the slot for reuse.
    pub(crate) fn release(self) -> (EndpointId, Slot) {
        let Connection {
            stream,
            endpoint,
            slot,
            lease,
            ..
        } = self;
        drop(stream);
        drop(lease);
        (endpoint, slot)
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("endpoint", &self.endpoint_name)
            .field("state", &self.state)
            .field("bytes_received", &self.bytes_received)
            .field("bytes_sent", &self.bytes_sent)
            .finish()
    }
}

/// Run `op` once; on would-block wait for readiness and run it once more.
fn io_retry<F>(stream: &TcpStream, timeout: Duration, events: libc::c_short, mut op: F) -> Result<usize>
where
    F: FnMut() -> io::Result<usize>,
{
    match attempt(&mut op) {
        Ok(n) => return Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e.into()),
    }

    if !wait_ready(stream.as_raw_fd(), events, timeout)? {
        return Err(Error::TimedOut);
    }

    match attempt(&mut op) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Error::TimedOut),
        Err(e) => Err(e.into()),
    }
}

fn attempt<F>(op: &mut F) -> io::Result<usize>
where
    F: FnMut() -> io::Result<usize>,
{
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Wait for `events` on `fd` for at most `timeout`.
///
/// Returns false if the timeout elapsed first. Error and hang-up conditions
/// count as ready so the retry surfaces them.
fn wait_ready(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        // Round up so a sub-millisecond remainder still waits.
        let millis = remaining
            .as_micros()
            .div_ceil(1000)
            .min(libc::c_int::MAX as u128) as libc::c_int;

        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        match rc {
            0 => return Ok(false),
            n if n > 0 => return Ok(true),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
            }
        }
    }
}
