//! Core identifier and state types shared across the driver.

use std::fmt;

/// Opaque endpoint identifier.
///
/// Endpoints are numbered in configuration order. The id is stable for the
/// life of the driver, including after the endpoint's listening socket has
/// been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub(crate) usize);

impl EndpointId {
    /// Create a new endpoint ID from a raw value.
    ///
    /// This is primarily useful for testing purposes.
    #[inline]
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw value of the endpoint ID.
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

/// Lifecycle state of a connection.
///
/// A connection is in exactly one of these states at any time. Only the
/// acceptor thread moves a connection into `Draining` or `Free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Handed to the admission function and owned by the service layer.
    Active,
    /// Returned by the service layer, waiting for the acceptor to close it.
    AwaitingClose,
    /// Write side shut down; unread bytes are being discarded until EOF or
    /// the drain deadline.
    Draining,
    /// Socket closed and slot returned to the endpoint free-list.
    Free,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Active => "active",
            ConnState::AwaitingClose => "awaiting_close",
            ConnState::Draining => "draining",
            ConnState::Free => "free",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an endpoint's listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Configured, socket not open (never started, or start failed).
    Registered,
    /// Socket open and part of the multiplexing set.
    Listening,
    /// Socket closed at shutdown. Still known, never polled again.
    Idle,
}

/// Phase of the acceptor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    /// Shutdown requested: listeners closed, admitted and draining
    /// connections still being finished.
    Draining,
    Terminated,
}

impl Phase {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Phase::Starting => 0,
            Phase::Running => 1,
            Phase::Draining => 2,
            Phase::Terminated => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Starting,
            1 => Phase::Running,
            2 => Phase::Draining,
            _ => Phase::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
