//! Telemetry and observability for the limiter.
//!
//! Events flow through [`TelemetrySink`] implementations which can log, aggregate, or
//! forward them to external systems.
//!
//! # Event Types
//!
//! - **Middleware**: `Admitted`, `Rejected`, `Bypassed`
//! - **Token bucket**: `Swept` (cleanup of idle buckets, with eviction counts and timing)
//!
//! Sinks are independent of the crate's own `tracing` output: the limiter always logs
//! blocked requests and sweeps, whichever sink is installed.

pub mod events;
pub mod sinks;

pub use events::LimiterEvent;
pub use sinks::{LogSink, MemorySink, MulticastSink, NullSink, TelemetrySink};
