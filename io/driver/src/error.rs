use std::io;
use std::net::SocketAddr;

/// Errors returned by the socket driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid driver or endpoint configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// An endpoint could not bind or listen on its address.
    #[error("endpoint {endpoint} failed to listen on {address}: {source}")]
    Bind {
        endpoint: String,
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The wake-up primitive could not be created or registered.
    #[error("wake-up trigger: {0}")]
    Trigger(#[source] io::Error),
    /// The readiness wait failed with something other than an interrupt.
    /// The acceptor cannot continue with unknown socket state.
    #[error("readiness wait failed: {0}")]
    Poll(#[source] io::Error),
    /// A connection read or write did not become ready within its I/O timeout.
    #[error("connection I/O timed out")]
    TimedOut,
    /// The acceptor thread panicked.
    #[error("acceptor thread panicked")]
    Panicked,
}

/// A convenience wrapper around `Result` for `sock_driver::Error`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error is fatal to the whole driver.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Poll(_) | Error::Trigger(_) | Error::Panicked)
    }
}
