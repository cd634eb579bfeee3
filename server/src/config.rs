//! Server configuration.
//!
//! One `[[endpoint]]` table per listening socket, plus acceptor tuning,
//! the worker pool, logging, and periodic diagnostics.

use serde::Deserialize;
use sock_driver::{DriverConfig, EndpointConfig};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Acceptor tuning
    #[serde(default)]
    pub driver: DriverSection,

    /// Listening endpoints
    #[serde(default)]
    pub endpoint: Vec<EndpointSection>,

    /// Worker thread configuration
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Periodic stats output
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Acceptor tuning shared by all endpoints.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverSection {
    /// Interval in milliseconds at which a held connection is re-offered
    /// when no capacity signal arrives. 0 disables the timer.
    #[serde(default = "default_admission_retry_ms")]
    pub admission_retry_ms: u64,

    /// Readiness events collected per wait
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,

    /// Released connection slots kept per endpoint for reuse
    #[serde(default = "default_max_free_slots")]
    pub max_free_slots: usize,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            admission_retry_ms: default_admission_retry_ms(),
            events_capacity: default_events_capacity(),
            max_free_slots: default_max_free_slots(),
        }
    }
}

/// One listening endpoint.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSection {
    /// Name used in logs and stats
    pub name: String,

    /// Address to listen on
    pub address: SocketAddr,

    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Timeout in seconds for each read or write wait on a connection
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// Time in milliseconds a closing connection may spend discarding
    /// unread bytes
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Per-connection read buffer (e.g., "16KB")
    #[serde(default = "default_buffer_size", deserialize_with = "deserialize_size")]
    pub buffer_size: usize,

    /// Only report connections once the client has sent data (Linux)
    #[serde(default)]
    pub accept_async: bool,

    /// Set TCP_NODELAY on accepted connections
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl EndpointSection {
    fn to_endpoint_config(&self) -> EndpointConfig {
        EndpointConfig::new(self.name.clone(), self.address)
            .backlog(self.backlog)
            .io_timeout(Duration::from_secs(self.io_timeout_secs))
            .drain_timeout(Duration::from_millis(self.drain_timeout_ms))
            .buffer_size(self.buffer_size)
            .accept_async(self.accept_async)
            .nodelay(self.nodelay)
    }
}

/// Worker thread configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of worker threads (default: derived from cpu_affinity or number of CPUs)
    pub threads: Option<usize>,

    /// Admitted connections waiting for a worker. A full queue is what makes
    /// the acceptor hold a connection and stop accepting.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// CPU cores to pin worker threads to, Linux-style (e.g., "0-3,6-8")
    pub cpu_affinity: Option<String>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: None,
            queue_depth: default_queue_depth(),
            cpu_affinity: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line
    #[default]
    Pretty,
    /// Single-line
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level or filter directive. RUST_LOG takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "compact", or "json"
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include module target
    #[serde(default = "default_true")]
    pub target: bool,

    /// Include thread names
    #[serde(default)]
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
            target: true,
            thread_names: false,
        }
    }
}

/// Periodic diagnostics.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Seconds between stats lines. Absent or 0 disables them.
    pub interval_secs: Option<u64>,
}

// Default value functions

fn default_admission_retry_ms() -> u64 {
    100
}

fn default_events_capacity() -> usize {
    sock_driver::DEFAULT_EVENTS_CAPACITY
}

fn default_max_free_slots() -> usize {
    sock_driver::DEFAULT_MAX_FREE_SLOTS
}

fn default_backlog() -> u32 {
    sock_driver::DEFAULT_BACKLOG
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

fn default_buffer_size() -> usize {
    16 * 1024 // 16KB
}

fn default_nodelay() -> bool {
    true
}

fn default_queue_depth() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Deserialize a size string like "64KB" or a plain number into bytes.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

/// Parse a size string like "64KB", "4MB", "1GB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

/// Parse a Linux-style CPU list string ("0-3,6,8-15:2") into CPU IDs.
pub fn parse_cpu_list(cpu_list: &str) -> Result<Vec<usize>, String> {
    fn parse_range(range: &str) -> Result<(usize, usize), String> {
        let (start_str, end_str) = range
            .split_once('-')
            .ok_or_else(|| format!("expected a range, got: {}", range))?;
        let start: usize = start_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid start of range: {}", start_str))?;
        let end: usize = end_str
            .trim()
            .parse()
            .map_err(|_| format!("invalid end of range: {}", end_str))?;
        if start > end {
            return Err(format!("invalid range: start ({}) > end ({})", start, end));
        }
        Ok((start, end))
    }

    let mut cpus = Vec::new();

    for part in cpu_list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((range, stride_str)) = part.split_once(':') {
            let stride: usize = stride_str
                .trim()
                .parse()
                .map_err(|_| format!("invalid stride: {}", stride_str))?;
            if stride == 0 {
                return Err("stride cannot be zero".to_string());
            }
            let (start, end) = parse_range(range)?;
            cpus.extend((start..=end).step_by(stride));
        } else if part.contains('-') {
            let (start, end) = parse_range(part)?;
            cpus.extend(start..=end);
        } else {
            let cpu: usize = part
                .parse()
                .map_err(|_| format!("invalid CPU number: {}", part))?;
            cpus.push(cpu);
        }
    }

    if cpus.is_empty() {
        return Err("CPU list cannot be empty".to_string());
    }

    cpus.sort_unstable();
    cpus.dedup();

    Ok(cpus)
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.endpoint.is_empty() {
            return Err("at least one endpoint must be configured".into());
        }

        let mut names = HashSet::new();
        for endpoint in &self.endpoint {
            if !names.insert(endpoint.name.as_str()) {
                return Err(format!("duplicate endpoint name: {}", endpoint.name).into());
            }
            if endpoint.io_timeout_secs == 0 {
                return Err(format!("endpoint {}: io_timeout_secs must be > 0", endpoint.name).into());
            }
        }

        if self.workers.threads == Some(0) {
            return Err("workers.threads must be > 0".into());
        }

        if self.workers.queue_depth == 0 {
            return Err("workers.queue_depth must be > 0".into());
        }

        if let Some(ref affinity) = self.workers.cpu_affinity {
            parse_cpu_list(affinity).map_err(|e| format!("invalid cpu_affinity: {}", e))?;
        }

        self.driver_config().validate()?;

        Ok(())
    }

    /// Build the socket driver configuration.
    pub fn driver_config(&self) -> DriverConfig {
        let retry = match self.driver.admission_retry_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        self.endpoint.iter().fold(
            DriverConfig::new()
                .admission_retry(retry)
                .events_capacity(self.driver.events_capacity)
                .max_free_slots(self.driver.max_free_slots),
            |config, endpoint| config.endpoint(endpoint.to_endpoint_config()),
        )
    }

    /// Get the number of worker threads.
    pub fn threads(&self) -> usize {
        if let Some(threads) = self.workers.threads {
            return threads;
        }
        if let Some(ref affinity) = self.workers.cpu_affinity
            && let Ok(cpus) = parse_cpu_list(affinity)
        {
            return cpus.len();
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Get the parsed CPU affinity list.
    pub fn cpu_affinity(&self) -> Option<Vec<usize>> {
        self.workers
            .cpu_affinity
            .as_ref()
            .and_then(|s| parse_cpu_list(s).ok())
    }

    /// Interval between diagnostics lines, if enabled.
    pub fn diagnostics_interval(&self) -> Option<Duration> {
        match self.diagnostics.interval_secs {
            None | Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        }
    }
}

/// Default configuration, as printed by `sockd --print-config`.
pub const DEFAULT_CONFIG: &str = r#"# sockd configuration

[driver]
# Re-offer a held connection this often (milliseconds) even without a
# capacity signal from the workers. 0 relies on the signal alone.
admission_retry_ms = 100
# Readiness events collected per wait
events_capacity = 1024
# Released connection slots kept per endpoint for reuse
max_free_slots = 1024

# Listening endpoints - configure one or more
[[endpoint]]
name = "public"
address = "0.0.0.0:7070"
backlog = 128
# Timeout for each blocking read or write on a connection
io_timeout_secs = 30
# How long a closing connection may discard trailing client bytes
drain_timeout_ms = 2000
buffer_size = "16KB"
# Only wake the acceptor once the client has sent data (Linux only)
accept_async = false
nodelay = true

[workers]
# Number of worker threads (default: number of CPUs)
# threads = 8
# Admitted connections waiting for a worker; when full, the acceptor
# holds one connection and stops accepting
queue_depth = 64
# CPU cores to pin workers to (Linux-style, e.g., "0-3,6-8")
# cpu_affinity = "0-7"

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# Can be overridden with RUST_LOG environment variable
level = "info"
# Log format: "pretty" (human-readable), "json", or "compact"
format = "pretty"
# Include timestamps
timestamps = true
# Include thread names
thread_names = false
# Include module target
target = true

[diagnostics]
# Seconds between stats lines (0 disables)
interval_secs = 0
"#;
