//! Ping service metrics.
//!
//! Connection-level metrics are published by `sock_driver::metrics`.

use metriken::{Counter, Gauge, metric};

#[metric(name = "ping_requests", description = "Total PING requests served")]
pub static PING_REQUESTS: Counter = Counter::new();

#[metric(name = "quit_requests", description = "Total QUIT requests served")]
pub static QUIT_REQUESTS: Counter = Counter::new();

#[metric(
    name = "protocol_errors",
    description = "Total request lines that could not be parsed"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

#[metric(
    name = "sessions_timed_out",
    description = "Total sessions ended because the client went quiet"
)]
pub static SESSIONS_TIMED_OUT: Counter = Counter::new();

#[metric(
    name = "sessions_active",
    description = "Number of sessions currently being served by a worker"
)]
pub static SESSIONS_ACTIVE: Gauge = Gauge::new();
