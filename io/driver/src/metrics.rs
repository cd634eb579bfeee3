//! Process-wide socket driver metrics.
//!
//! These aggregate across every driver in the process and are exposed through
//! `metriken`. Per-driver numbers live in [`crate::stats::DriverStats`].

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "sock_connections_accepted",
    description = "Total number of connections accepted from listening sockets"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "sock_connections_active",
    description = "Number of connections currently admitted to the service layer"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "sock_connections_draining",
    description = "Number of half-closed connections waiting for the peer to finish"
)]
pub static CONNECTIONS_DRAINING: Gauge = Gauge::new();

#[metric(
    name = "sock_admission_refused",
    description = "Total number of times the admission function refused a connection"
)]
pub static ADMISSION_REFUSED: Counter = Counter::new();

#[metric(
    name = "sock_accept_errors",
    description = "Total number of failed accept calls"
)]
pub static ACCEPT_ERRORS: Counter = Counter::new();
