//! Convenient re-exports for common bucketgate types.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    error::ConfigError,
    rate_limit::{
        token_bucket_rate_limiter, AdmissionControl, Classify, HeaderKey, KeyExtractor, PeerAddr,
        RateLimitLayer, RequestKind, TokenBucket,
    },
    telemetry::{LogSink, MemorySink, TelemetrySink},
};
