//! Driver and endpoint configuration.
//!
//! These are plain values: parsing from files is left to the embedding
//! application. Both types use a fluent builder style.
//!
//! ```ignore
//! use sock_driver::{DriverConfig, EndpointConfig};
//! use std::time::Duration;
//!
//! let config = DriverConfig::new()
//!     .endpoint(
//!         EndpointConfig::new("public", "0.0.0.0:8080".parse()?)
//!             .backlog(512)
//!             .drain_timeout(Duration::from_secs(2)),
//!     )
//!     .admission_retry(Some(Duration::from_millis(50)));
//! ```

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 128;

/// Default read/write timeout for service-side connection I/O.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a half-closed connection may spend discarding unread bytes.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default per-connection read-ahead buffer: 16KB.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default interval at which a held connection is re-offered for admission.
pub const DEFAULT_ADMISSION_RETRY: Duration = Duration::from_millis(100);

/// Default bound on pooled slots per endpoint.
pub const DEFAULT_MAX_FREE_SLOTS: usize = 1024;

/// Default readiness event capacity per wait.
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Configuration for one listening endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub(crate) name: String,
    pub(crate) address: SocketAddr,
    pub(crate) backlog: u32,
    pub(crate) io_timeout: Duration,
    pub(crate) drain_timeout: Duration,
    pub(crate) buffer_size: usize,
    pub(crate) accept_async: bool,
    pub(crate) nodelay: bool,
}

impl EndpointConfig {
    /// Create an endpoint with default settings.
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address,
            backlog: DEFAULT_BACKLOG,
            io_timeout: DEFAULT_IO_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            accept_async: false,
            nodelay: true,
        }
    }

    /// Set the maximum number of pending connections queued by the OS.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the timeout applied to each blocking read or write wait on an
    /// accepted connection.
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set how long a half-closed connection may drain before it is closed.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the size of the read-ahead buffer carried by each connection slot.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Only report connections once the client has sent data.
    ///
    /// Uses `TCP_DEFER_ACCEPT` on Linux and is ignored elsewhere.
    pub fn accept_async(mut self, enabled: bool) -> Self {
        self.accept_async = enabled;
        self
    }

    /// Set TCP_NODELAY on accepted connections. Default: true
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn get_backlog(&self) -> u32 {
        self.backlog
    }

    pub fn get_io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn get_drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("endpoint name must not be empty".into()));
        }
        if self.backlog == 0 {
            return Err(Error::Config(format!(
                "endpoint {}: backlog must be at least 1",
                self.name
            )));
        }
        if self.buffer_size == 0 {
            return Err(Error::Config(format!(
                "endpoint {}: buffer_size must be at least 1",
                self.name
            )));
        }
        if self.io_timeout.is_zero() {
            return Err(Error::Config(format!(
                "endpoint {}: io_timeout must be non-zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Configuration for a driver: its endpoints plus acceptor tuning.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub(crate) endpoints: Vec<EndpointConfig>,
    pub(crate) events_capacity: usize,
    pub(crate) admission_retry: Option<Duration>,
    pub(crate) max_free_slots: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverConfig {
    /// Create an empty configuration with default acceptor settings.
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            admission_retry: Some(DEFAULT_ADMISSION_RETRY),
            max_free_slots: DEFAULT_MAX_FREE_SLOTS,
        }
    }

    /// Add an endpoint. Endpoints are served in the order they are added.
    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Set the number of readiness events collected per wait.
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Set how often a held connection is re-offered for admission when no
    /// capacity signal arrives.
    ///
    /// `None` makes retries purely signal driven: a held connection waits
    /// until `DriverHandle::notify_ready()` (or any other wake-up).
    pub fn admission_retry(mut self, interval: Option<Duration>) -> Self {
        self.admission_retry = interval;
        self
    }

    /// Set the maximum number of released slots kept per endpoint.
    pub fn max_free_slots(mut self, max: usize) -> Self {
        self.max_free_slots = max;
        self
    }

    pub fn endpoints(&self) -> &[EndpointConfig] {
        &self.endpoints
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::Config(
                "at least one endpoint must be configured".into(),
            ));
        }
        if self.events_capacity == 0 {
            return Err(Error::Config("events_capacity must be at least 1".into()));
        }
        if matches!(self.admission_retry, Some(d) if d.is_zero()) {
            return Err(Error::Config(
                "admission_retry must be non-zero (use None to disable)".into(),
            ));
        }

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !names.insert(endpoint.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name
                )));
            }
        }

        Ok(())
    }
}
