//! Server runtime: driver, worker pool, and diagnostics.

use crate::config::Config;
use crate::session::run_worker;
use crate::signal::ShutdownFlag;
use crate::workers::{WorkerHandle, join_workers, spawn_workers};
use crossbeam_channel::{RecvTimeoutError, Sender};
use sock_driver::{Driver, DriverHandle, DriverStatsSnapshot, QueueAdmission};
use std::error::Error;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WORKER_THREAD_PREFIX: &str = "sockd-worker";
const DIAGNOSTICS_THREAD_NAME: &str = "sockd-diag";

/// How often `run_until` checks for a shutdown request.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running server.
pub struct Server {
    driver: Driver,
    workers: Vec<WorkerHandle<u64>>,
    diagnostics: Option<(Sender<()>, JoinHandle<()>)>,
}

impl Server {
    /// Bind every configured endpoint and start the acceptor, the workers and,
    /// if enabled, the diagnostics thread.
    pub fn start(config: &Config) -> Result<Self, Box<dyn Error>> {
        let (admission, queue) = QueueAdmission::bounded(config.workers.queue_depth);
        let driver = Driver::spawn(config.driver_config(), admission)?;

        for (name, address) in driver.local_addrs() {
            tracing::info!(endpoint = %name, %address, "listening");
        }

        let threads = config.threads();
        let cpu_affinity = config.cpu_affinity();
        let handle = driver.handle();
        let workers = spawn_workers(
            threads,
            cpu_affinity.as_deref(),
            WORKER_THREAD_PREFIX,
            move |worker_id| run_worker(worker_id, queue.clone(), handle.clone()),
        )?;

        let diagnostics = match config.diagnostics_interval() {
            Some(interval) => Some(spawn_diagnostics(driver.handle(), interval)?),
            None => None,
        };

        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            workers = threads,
            queue_depth = config.workers.queue_depth,
            "sockd started"
        );

        Ok(Self {
            driver,
            workers,
            diagnostics,
        })
    }

    pub fn handle(&self) -> DriverHandle {
        self.driver.handle()
    }

    /// Bound address of each endpoint that came up, by name.
    pub fn local_addrs(&self) -> &[(String, SocketAddr)] {
        self.driver.local_addrs()
    }

    pub fn local_addr(&self, endpoint: &str) -> Option<SocketAddr> {
        self.driver.local_addr(endpoint)
    }

    /// Stop accepting. Sessions in progress run until idle.
    pub fn shutdown(&self) {
        self.driver.shutdown();
    }

    /// Block until `shutdown` is requested (or the acceptor stops on its
    /// own), then shut down gracefully.
    pub fn run_until(self, shutdown: &ShutdownFlag) -> Result<(), Box<dyn Error>> {
        while !shutdown.is_requested() && !self.driver.is_finished() {
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
        self.shutdown();
        self.wait()
    }

    /// Wait for the acceptor and every worker to finish.
    pub fn wait(self) -> Result<(), Box<dyn Error>> {
        let handle = self.driver.handle();
        let result = self.driver.join();
        let stats = handle.stats();

        if let Some((stop, thread)) = self.diagnostics {
            drop(stop);
            if thread.join().is_err() {
                tracing::error!("diagnostics thread panicked");
            }
        }

        let sessions: u64 = join_workers(self.workers).into_iter().sum();
        tracing::info!(
            sessions,
            accepted = stats.accepted,
            drained = stats.drain_started,
            "sockd stopped"
        );

        result.map_err(Into::into)
    }
}

fn spawn_diagnostics(
    handle: DriverHandle,
    interval: Duration,
) -> std::io::Result<(Sender<()>, JoinHandle<()>)> {
    let (stop, stopped) = crossbeam_channel::bounded::<()>(0);

    let thread = thread::Builder::new()
        .name(DIAGNOSTICS_THREAD_NAME.to_string())
        .spawn(move || {
            let mut prev = DriverStatsSnapshot::default();
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                let current = handle.stats();
                tracing::info!(
                    phase = %handle.phase(),
                    active = handle.active_connections(),
                    held = current.held,
                    draining = current.draining(),
                    "stats"
                );
                log_delta(&current.delta(&prev));
                prev = current;
            }
        })?;

    Ok((stop, thread))
}

fn log_delta(delta: &DriverStatsSnapshot) {
    tracing::info!(
        accepted = delta.accepted,
        refused = delta.admission_refused,
        accept_errors = delta.accept_errors,
        released_direct = delta.released_direct,
        drain_started = delta.drain_started,
        drain_timed_out = delta.drain_timed_out,
        drained_bytes = delta.drained_bytes,
        "stats delta"
    );
}
