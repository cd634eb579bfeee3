//! sockd - a PING/QUIT server built on `sock-driver`.
//!
//! One acceptor thread owns every listening socket and admits connections
//! into a bounded queue; a pool of worker threads serves them and hands them
//! back for graceful close. When the queue is full the acceptor stops
//! accepting, so excess load waits in the kernel's listen backlog.

pub mod affinity;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod session;
pub mod signal;
pub mod workers;

pub use config::Config;
pub use server::Server;
pub use session::SessionEnd;
