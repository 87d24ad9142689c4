#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # bucketgate
//!
//! Per-client rate limiting middleware for [tower] services.
//!
//! ## Features
//!
//! - **Token bucket** admission control with lazy, time-based refill
//! - **Pluggable strategies** behind the one-method [`AdmissionControl`] trait
//! - **Pluggable client keys**: peer address by default, headers or any closure
//! - **Bounded memory** via an optional retention window for idle clients
//! - **Sharded state** so concurrent checks for different clients rarely contend
//! - **Telemetry sinks** for admissions, rejections and cleanup sweeps
//!
//! Clients over their limit get `429 Too Many Requests` with the body `Limit Exceded`;
//! the wrapped service is not called for them. Upgraded connections (WebSocket,
//! `CONNECT`) pass through unchecked unless configured otherwise.
//!
//! ## Quick Start
//!
//! ```rust
//! use bucketgate::RateLimitLayer;
//! use std::convert::Infallible;
//! use std::time::Duration;
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = service_fn(|_req: http::Request<String>| async {
//!         Ok::<_, Infallible>(http::Response::new(String::from("Hello")))
//!     });
//!
//!     // Two requests per client, then one more every second.
//!     let limiter = RateLimitLayer::token_bucket(2, Duration::from_secs(1)).unwrap();
//!     let svc = ServiceBuilder::new().layer(limiter).service(app);
//!
//!     let response = svc.oneshot(http::Request::new(String::new())).await.unwrap();
//!     assert_eq!(response.status(), http::StatusCode::OK);
//! }
//! ```
//!
//! [tower]: https://docs.rs/tower

pub mod clock;
pub mod error;
pub mod prelude;
pub mod rate_limit;
pub mod telemetry;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ConfigError;
pub use rate_limit::{
    token_bucket_rate_limiter, AdmissionControl, Classify, FromRejection, HeaderKey,
    KeyExtractor, PeerAddr, RateLimitLayer, RateLimitService, Rejection, RequestKind,
    TokenBucket, TokenBucketBuilder, TokenBucketConfig, REJECTION_BODY,
};
pub use telemetry::{LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink};
