//! Listening endpoints.
//!
//! An endpoint owns one listening socket and the free-list of slots for the
//! connections accepted from it. Only the acceptor thread touches endpoints.

use crate::config::EndpointConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::slot::{Slot, SlotPool};
use crate::types::{EndpointId, EndpointState};
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Instant;

/// Token offset for listeners to avoid collision with draining connections.
pub(crate) const LISTENER_TOKEN_OFFSET: usize = 1 << 30;

pub(crate) struct Endpoint {
    id: EndpointId,
    name: Arc<str>,
    config: EndpointConfig,
    listener: Option<TcpListener>,
    state: EndpointState,
    /// Listener is currently part of the poll registry.
    registered: bool,
    /// The listener may have pending connections. Readiness is edge
    /// triggered, so this stays set until an accept returns would-block.
    pub(crate) ready: bool,
    /// Accepting is suspended until this instant after an accept error.
    pub(crate) retry_at: Option<Instant>,
    pool: SlotPool,
    /// The next accept fails without touching the listener.
    #[cfg(test)]
    pub(crate) fail_next_accept: bool,
}

impl Endpoint {
    pub(crate) fn new(id: EndpointId, config: EndpointConfig, max_free_slots: usize) -> Self {
        let pool = SlotPool::new(config.buffer_size, max_free_slots);
        Self {
            id,
            name: Arc::from(config.name.as_str()),
            config,
            listener: None,
            state: EndpointState::Registered,
            registered: false,
            ready: false,
            retry_at: None,
            pool,
            #[cfg(test)]
            fail_next_accept: false,
        }
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn config(&self) -> &EndpointConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> EndpointState {
        self.state
    }

    #[inline]
    pub(crate) fn is_listening(&self) -> bool {
        self.state == EndpointState::Listening
    }

    #[inline]
    pub(crate) fn token(&self) -> Token {
        Token(LISTENER_TOKEN_OFFSET + self.id.0)
    }

    /// Bind, listen, and register the listening socket.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub(crate) fn start(&mut self, registry: &Registry) -> Result<SocketAddr> {
        let address = self.config.address;
        let listener = self.open().map_err(|source| Error::Bind {
            endpoint: self.config.name.clone(),
            address,
            source,
        })?;
        let local_addr = listener.local_addr()?;

        registry.register(
            &mut SourceFd(&listener.as_raw_fd()),
            self.token(),
            Interest::READABLE,
        )?;

        self.listener = Some(listener);
        self.state = EndpointState::Listening;
        self.registered = true;
        self.ready = true;

        tracing::info!(
            endpoint = %self.name,
            address = %local_addr,
            backlog = self.config.backlog,
            "listening"
        );
        Ok(local_addr)
    }

    fn open(&self) -> io::Result<TcpListener> {
        let address = self.config.address;
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        if self.config.accept_async {
            set_defer_accept(&socket, self.config.io_timeout.as_secs().max(1))?;
        }
        socket.bind(&address.into())?;
        let backlog = self.config.backlog.min(i32::MAX as u32) as i32;
        socket.listen(backlog)?;
        Ok(socket.into())
    }

    /// Close the listening socket. Safe to call more than once and on an
    /// endpoint that never started.
    pub(crate) fn stop(&mut self, registry: &Registry) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        if self.registered {
            if let Err(e) = registry.deregister(&mut SourceFd(&listener.as_raw_fd())) {
                tracing::debug!(endpoint = %self.name, error = %e, "failed to deregister listener");
            }
            self.registered = false;
        }
        drop(listener);
        self.ready = false;
        self.retry_at = None;
        self.state = EndpointState::Idle;
        tracing::info!(endpoint = %self.name, "listener closed");
    }

    /// Take the listener out of the wait set while a connection is held.
    pub(crate) fn pause(&mut self, registry: &Registry) {
        let Some(listener) = &self.listener else {
            return;
        };
        if !self.registered {
            return;
        }
        if let Err(e) = registry.deregister(&mut SourceFd(&listener.as_raw_fd())) {
            tracing::debug!(endpoint = %self.name, error = %e, "failed to pause listener");
        }
        self.registered = false;
    }

    /// Put the listener back in the wait set.
    ///
    /// Connections that queued while paused produced no readiness event, so
    /// the endpoint is marked ready.
    pub(crate) fn resume(&mut self, registry: &Registry) -> io::Result<()> {
        let Some(listener) = &self.listener else {
            return Ok(());
        };
        if self.registered {
            return Ok(());
        }
        registry.register(
            &mut SourceFd(&listener.as_raw_fd()),
            self.token(),
            Interest::READABLE,
        )?;
        self.registered = true;
        self.ready = true;
        Ok(())
    }

    /// Accept one connection.
    ///
    /// Returns `Ok(None)` when nothing is pending, which also clears the
    /// ready flag. The boolean is true when the slot came from the free-list.
    pub(crate) fn accept(&mut self) -> io::Result<Option<(Connection, bool)>> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_accept) {
            return Err(io::Error::other("injected accept failure"));
        }

        let Some(listener) = &self.listener else {
            self.ready = false;
            return Ok(None);
        };

        let (stream, peer) = loop {
            match listener.accept() {
                Ok(accepted) => break accepted,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.ready = false;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        };

        stream.set_nonblocking(true)?;
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }

        let (slot, reused) = self.pool.take();
        let conn = Connection::new(
            stream,
            peer,
            self.id,
            self.name.clone(),
            self.config.io_timeout,
            slot,
        );
        Ok(Some((conn, reused)))
    }

    /// Return a released connection's slot to the free-list.
    #[inline]
    pub(crate) fn release(&mut self, slot: Slot) {
        self.pool.put(slot);
    }

    #[cfg(test)]
    pub(crate) fn free_slots(&self) -> usize {
        self.pool.free_count()
    }
}

#[cfg(target_os = "linux")]
fn set_defer_accept(socket: &Socket, secs: u64) -> io::Result<()> {
    let value = secs.min(libc::c_int::MAX as u64) as libc::c_int;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_DEFER_ACCEPT,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_defer_accept(_socket: &Socket, _secs: u64) -> io::Result<()> {
    Ok(())
}
