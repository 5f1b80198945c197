//! Server configuration limits and timeouts.
//!
//! Defaults follow the protocol deadlines the server promises on the wire:
//! a connection may sit idle for 180 seconds, a request must arrive within
//! 30 seconds of its first byte, a response must be written within
//! 60 seconds, input lines are capped at 64 KiB and bodies at 1 MiB.
//!
//! ```no_run
//! use pier_web::{limits::ConnLimits, Reply, Router, Server};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .router(Router::new().route("/", |_| async { Ok(Reply::from("hi")) }))
//!         .connection_limits(ConnLimits {
//!             idle_timeout: Duration::from_secs(60),
//!             ..ConnLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Controls worker-pool sizing and connection admission.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of pre-spawned connection workers (default: `100`).
    ///
    /// Each worker drives one connection at a time; a single connection's
    /// reader and writer are never shared across workers.
    pub workers: usize,

    /// Maximum number of accepted TCP streams waiting in the admission
    /// queue (default: `250`). Streams accepted past this cap are dropped
    /// without a response.
    pub max_pending_connections: usize,

    /// How an idle worker waits for the next queued connection.
    pub wait_strategy: WaitStrategy,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            workers: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Yield,
        }
    }
}

/// Worker behavior while the admission queue is empty.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Yield back to the runtime between polls. Lowest latency.
    Yield,
    /// Sleep between polls. Lowest idle CPU.
    Sleep(Duration),
}

/// Per-connection protocol deadlines.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// How long a connection may wait between requests before it is
    /// closed without a response (default: `180s`).
    pub idle_timeout: Duration,

    /// Deadline for a whole request, measured from its first byte
    /// (default: `30s`). Expiry mid-request answers `408` and closes.
    pub request_timeout: Duration,

    /// Deadline for writing a response (default: `60s`). Expiry is fatal:
    /// the connection closes with no further bytes.
    pub response_timeout: Duration,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(180),
            request_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(60),
        }
    }
}

/// Request parsing limits.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum bytes a single input line (request line, field line, chunk
    /// size line, header block) may span (default: `64 KiB`).
    pub line_limit: usize,

    /// Maximum request body size in bytes, whatever the framing
    /// (default: `1 MiB`).
    pub body_limit: usize,

    /// Read buffer capacity per connection (default: `64 KiB`).
    pub read_buffer: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            line_limit: 64 * 1024,
            body_limit: 1024 * 1024,
            read_buffer: 64 * 1024,
        }
    }
}
