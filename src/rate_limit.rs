//! Rate limiting primitives.
//!
//! This module provides the building blocks for rate limiting:
//! - [`AdmissionControl`]: The core trait for rate limiting logic.
//! - [`RateLimitLayer`]: Tower middleware that enforces the limit.
//! - [`KeyExtractor`]: Derives the client key a request is charged against.
//! - [`Classify`]: Tells the middleware which kind of request it is looking at.
//!
//! # Architecture
//!
//! The system is designed to be modular:
//! - **Middleware**: `RateLimitLayer` wraps your service. It doesn't know *how* limiting works,
//!   only that it should ask an `AdmissionControl`.
//! - **Logic**: Implementations like `TokenBucket` (in `strategies` module) handle the math.
//! - **Storage**: `BucketStore` (in `store` module) holds per-client state behind sharded locks.

use std::fmt;
use std::time::SystemTime;

pub mod key;
pub mod middleware;
pub(crate) mod store;
pub mod strategies;

pub use key::{HeaderKey, KeyExtractor, PeerAddr};
pub use middleware::{
    token_bucket_rate_limiter, FromRejection, RateLimitLayer, RateLimitService, Rejection,
    ResponseFuture, REJECTION_BODY,
};
pub use strategies::{TokenBucket, TokenBucketBuilder, TokenBucketConfig};

/// Core interface for rate limiting logic.
///
/// `check` decides whether the client identified by `key` may proceed at `now`, updating
/// whatever state the strategy keeps. It must not block and must accept any key and any
/// timestamp, including timestamps earlier than ones it has already seen.
///
/// Closures with the matching signature implement the trait, which keeps tests and
/// one-off policies short:
///
/// ```
/// use bucketgate::AdmissionControl;
/// use std::time::SystemTime;
///
/// let allow_all = |_key: &[u8], _now: SystemTime| true;
/// assert!(allow_all.check(b"client", SystemTime::now()));
/// ```
pub trait AdmissionControl: Send + Sync {
    /// Returns `true` if the client may proceed.
    fn check(&self, key: &[u8], now: SystemTime) -> bool;
}

impl<F> AdmissionControl for F
where
    F: Fn(&[u8], SystemTime) -> bool + Send + Sync,
{
    fn check(&self, key: &[u8], now: SystemTime) -> bool {
        self(key, now)
    }
}

/// Kind of unit of work flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Plain request/response exchange.
    Http,
    /// Long-lived bidirectional stream (protocol upgrade, tunnel).
    Stream,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Http => f.write_str("http"),
            RequestKind::Stream => f.write_str("stream"),
        }
    }
}

/// Requests the middleware can classify.
pub trait Classify {
    fn kind(&self) -> RequestKind;
}

/// Upgrade requests (`Upgrade` header, e.g. WebSocket) and `CONNECT` tunnels are streams;
/// everything else is a plain HTTP exchange.
impl<B> Classify for http::Request<B> {
    fn kind(&self) -> RequestKind {
        if self.method() == http::Method::CONNECT
            || self.headers().contains_key(http::header::UPGRADE)
        {
            RequestKind::Stream
        } else {
            RequestKind::Http
        }
    }
}
