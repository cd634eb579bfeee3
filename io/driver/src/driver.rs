//! Starting and stopping a driver.

use crate::acceptor::{Acceptor, WAKE_TOKEN};
use crate::admission::Admission;
use crate::config::DriverConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::handle::{DriverHandle, Shared};
use crate::stats::{DriverStats, DriverStatsSnapshot};
use crate::types::EndpointId;
use mio::{Poll, Waker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Name of the acceptor thread.
pub const ACCEPTOR_THREAD_NAME: &str = "sock-acceptor";

/// A running driver: the acceptor thread plus its handle.
///
/// Dropping a `Driver` without calling [`join`](Self::join) requests
/// shutdown and detaches the acceptor thread, which exits once admitted
/// connections are returned and drains finish.
pub struct Driver {
    handle: DriverHandle,
    local_addrs: Vec<(String, SocketAddr)>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl Driver {
    /// Open every configured endpoint and start the acceptor thread.
    ///
    /// Endpoints that fail to bind are logged and left out; the driver runs
    /// with the rest. If no endpoint comes up, the first bind error is
    /// returned.
    pub fn spawn<A: Admission>(config: DriverConfig, admission: A) -> Result<Self> {
        config.validate()?;

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN).map_err(Error::Trigger)?;
        let stats = Arc::new(DriverStats::new());
        let shared = Arc::new(Shared::new(waker, stats));

        let DriverConfig {
            endpoints: endpoint_configs,
            events_capacity,
            admission_retry,
            max_free_slots,
        } = config;

        let mut endpoints = Vec::with_capacity(endpoint_configs.len());
        let mut local_addrs = Vec::new();
        let mut first_error = None;

        for (idx, endpoint_config) in endpoint_configs.into_iter().enumerate() {
            let mut endpoint = Endpoint::new(EndpointId(idx), endpoint_config, max_free_slots);
            match endpoint.start(poll.registry()) {
                Ok(addr) => local_addrs.push((endpoint.name().to_string(), addr)),
                Err(e) => {
                    tracing::error!(endpoint = endpoint.name(), error = %e, "endpoint failed to start");
                    first_error.get_or_insert(e);
                }
            }
            endpoints.push(endpoint);
        }

        if local_addrs.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| Error::Config("no endpoint could be started".into())));
        }

        let acceptor = Acceptor::new(
            poll,
            events_capacity,
            endpoints,
            admission,
            shared.clone(),
            admission_retry,
        );

        let thread = thread::Builder::new()
            .name(ACCEPTOR_THREAD_NAME.to_string())
            .spawn(move || acceptor.run())?;

        Ok(Self {
            handle: DriverHandle::new(shared),
            local_addrs,
            thread: Some(thread),
        })
    }

    /// A cloneable handle for service threads.
    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    /// Names and bound addresses of the endpoints that came up.
    pub fn local_addrs(&self) -> &[(String, SocketAddr)] {
        &self.local_addrs
    }

    /// Bound address of the named endpoint, if it came up.
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.local_addrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, addr)| *addr)
    }

    pub fn stats(&self) -> DriverStatsSnapshot {
        self.handle.stats()
    }

    /// Request shutdown. See [`DriverHandle::shutdown`].
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    /// True once the acceptor thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Wait for the acceptor thread to exit.
    ///
    /// Does not request shutdown by itself. Returns the acceptor's fatal
    /// error, if it stopped on one.
    pub fn join(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| Error::Panicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.handle.shutdown();
        }
    }
}
