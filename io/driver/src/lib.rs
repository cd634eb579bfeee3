//! sock-driver - connection admission and lifecycle engine.
//!
//! A single acceptor thread multiplexes any number of listening endpoints,
//! hands accepted connections to an admission function, and closes returned
//! connections gracefully: the write side is shut down and unread bytes are
//! drained for a bounded time before the socket is released.
//!
//! # Features
//!
//! - **Backpressure**: when admission is refused the acceptor holds that one
//!   connection and stops accepting until the service layer has capacity
//! - **Fair**: ready endpoints are served round-robin, one accept each per pass
//! - **Graceful close**: half-close plus bounded drain, so trailing client
//!   bytes never turn a FIN into a RST
//! - **Slot reuse**: per-endpoint LIFO free-lists of read-ahead buffers
//!
//! # Quick Start
//!
//! ```ignore
//! use sock_driver::{Driver, DriverConfig, EndpointConfig, QueueAdmission};
//!
//! let config = DriverConfig::new()
//!     .endpoint(EndpointConfig::new("public", "0.0.0.0:7070".parse()?));
//!
//! let (admission, queue) = QueueAdmission::bounded(64);
//! let driver = Driver::spawn(config, admission)?;
//! let handle = driver.handle();
//!
//! // Service thread
//! while let Ok(mut conn) = queue.recv() {
//!     let mut buf = [0u8; 1024];
//!     let n = conn.read(&mut buf)?;
//!     conn.write_all(&buf[..n])?;
//!     handle.submit_for_close(conn);
//!     handle.notify_ready();
//! }
//! ```
//!
//! # Shutdown
//!
//! [`DriverHandle::shutdown`] closes every listener on the acceptor's next
//! pass. Admitted connections keep working; the acceptor exits once all of
//! them have been returned (or dropped) and every drain has finished or
//! timed out.

mod acceptor;
mod admission;
mod close;
mod config;
mod connection;
mod driver;
mod endpoint;
mod error;
mod handle;
mod slot;
mod stats;
mod types;

pub mod metrics;

// Re-exports
pub use admission::{Admission, QueueAdmission};
pub use config::{
    DEFAULT_ADMISSION_RETRY, DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE, DEFAULT_DRAIN_TIMEOUT,
    DEFAULT_EVENTS_CAPACITY, DEFAULT_IO_TIMEOUT, DEFAULT_MAX_FREE_SLOTS, DriverConfig,
    EndpointConfig,
};
pub use connection::Connection;
pub use driver::{ACCEPTOR_THREAD_NAME, Driver};
pub use error::{Error, Result};
pub use handle::DriverHandle;
pub use stats::{DrainOutcome, DriverStats, DriverStatsSnapshot};
pub use types::{ConnState, EndpointId, EndpointState, Phase};
