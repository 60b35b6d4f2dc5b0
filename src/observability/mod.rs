//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured events keyed by session_id and command)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Every error path logs the session id and the STOMP command
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
