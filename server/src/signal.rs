//! Signal handling for graceful shutdown.
//!
//! The first SIGINT/SIGTERM requests a graceful shutdown; a second one exits
//! the process immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide shutdown request, shared between the signal handler and the
/// server's main loop.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns true if shutdown had already been requested.
    pub fn request(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install the SIGINT/SIGTERM handler.
pub fn install_signal_handler() -> Result<ShutdownFlag, ctrlc::Error> {
    let shutdown = ShutdownFlag::new();
    let flag = shutdown.clone();

    ctrlc::set_handler(move || {
        if flag.request() {
            tracing::warn!("received second signal, exiting immediately");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, draining connections");
    })?;

    Ok(shutdown)
}
