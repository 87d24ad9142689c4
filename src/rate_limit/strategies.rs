use crate::error::ConfigError;
use crate::rate_limit::store::{Bucket, BucketStore};
use crate::rate_limit::AdmissionControl;
use crate::telemetry::{LimiterEvent, NullSink, TelemetrySink};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const DEFAULT_CAPACITY: u32 = 10;
const DEFAULT_RATE: Duration = Duration::from_secs(1);
const DEFAULT_SHARDS: usize = 16;
/// `sweep_due` before the first check has seeded it.
const UNSEEDED: i64 = i64::MIN;

/// Plain token bucket settings, suitable for loading from a config file.
///
/// With the `serde` feature enabled this deserializes from e.g.
/// `{"capacity": 20, "rate_secs": 2, "memory_days": 7}`; missing fields take the defaults
/// (`capacity = 10`, `rate_secs = 1`, no retention).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TokenBucketConfig {
    /// Maximum number of tokens in a single bucket.
    pub capacity: u32,
    /// Seconds it takes to earn one token back.
    pub rate_secs: u64,
    /// Days to remember an idle client. Must be > 0 when set.
    pub memory_days: Option<u32>,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CAPACITY, rate_secs: DEFAULT_RATE.as_secs(), memory_days: None }
    }
}

/// A per-client token bucket.
///
/// Every client key gets a bucket holding up to `capacity` tokens. A check first tops the
/// bucket up with one token per whole `rate` interval elapsed since the client was last
/// seen (never above `capacity`), then charges one token. The client may proceed if the
/// balance is still non-negative.
///
/// The charge is taken even when the client is denied, so a client that keeps hammering
/// while empty goes into debt and must wait longer before it is admitted again. Timestamps
/// may go backwards: the elapsed interval count is floored, so a check slightly in the past
/// costs an extra token.
///
/// With a retention window (`memory_days`), buckets idle for the whole window are dropped
/// by a sweep that piggybacks on normal checks at most once per window.
///
/// # Example
/// ```
/// use bucketgate::{AdmissionControl, TokenBucket};
/// use std::time::{Duration, SystemTime};
///
/// let bucket = TokenBucket::new(2, Duration::from_secs(1)).unwrap();
/// let t = SystemTime::UNIX_EPOCH;
/// assert!(bucket.check(b"A", t));
/// assert!(bucket.check(b"A", t));
/// assert!(!bucket.check(b"A", t));
/// assert!(bucket.check(b"A", t + Duration::from_secs(10)));
/// ```
pub struct TokenBucket {
    capacity: i64,
    rate: Duration,
    retention: Option<Duration>,
    store: BucketStore,
    last_sweep: Mutex<Option<SystemTime>>,
    /// Earliest time (nanos since the epoch) the next sweep may run, mirrored from
    /// `last_sweep` so checks skip the lock until then.
    sweep_due: AtomicI64,
    sink: Arc<dyn TelemetrySink>,
}

impl TokenBucket {
    /// Create a bucket set without retention. Errors if `rate` is zero.
    pub fn new(capacity: u32, rate: Duration) -> Result<Self, ConfigError> {
        Self::builder().capacity(capacity).rate(rate).build()
    }

    pub fn builder() -> TokenBucketBuilder {
        TokenBucketBuilder::default()
    }

    /// Build from plain settings.
    pub fn from_config(config: &TokenBucketConfig) -> Result<Self, ConfigError> {
        let mut builder = Self::builder()
            .capacity(config.capacity)
            .rate(Duration::from_secs(config.rate_secs));
        if let Some(days) = config.memory_days {
            builder = builder.memory_days(days);
        }
        builder.build()
    }

    /// Number of clients currently tracked.
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Stored token balance for `key`, if the client is tracked.
    pub fn tokens(&self, key: &[u8]) -> Option<i64> {
        self.store.get(key).map(|bucket| bucket.tokens)
    }

    pub fn capacity(&self) -> u32 {
        u32::try_from(self.capacity).unwrap_or(u32::MAX)
    }

    pub fn rate(&self) -> Duration {
        self.rate
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    fn sweep_may_be_due(&self, now: SystemTime) -> bool {
        let due = self.sweep_due.load(Ordering::Acquire);
        due == UNSEEDED || epoch_nanos(now) >= due
    }

    fn clear_old(&self, now: SystemTime) {
        let Some(window) = self.retention else { return };
        if !self.sweep_may_be_due(now) {
            return;
        }

        let mut last_sweep = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(previous) = *last_sweep else {
            *last_sweep = Some(now);
            self.sweep_due.store(sweep_deadline(now, window), Ordering::Release);
            return;
        };
        if !age_reached(previous, now, window) {
            return;
        }

        let started = Instant::now();
        let (evicted, retained) = self.store.retain(|bucket| !age_reached(bucket.last_update, now, window));
        *last_sweep = Some(now);
        self.sweep_due.store(sweep_deadline(now, window), Ordering::Release);
        drop(last_sweep);

        let duration = started.elapsed();
        tracing::debug!(evicted, retained, ?duration, "swept idle rate limit buckets");
        self.sink.emit(LimiterEvent::Swept { evicted, retained, duration });
    }
}

impl Default for TokenBucket {
    /// `capacity = 10`, one token per second, no retention.
    fn default() -> Self {
        TokenBucketBuilder::default().assemble()
    }
}

impl AdmissionControl for TokenBucket {
    fn check(&self, key: &[u8], now: SystemTime) -> bool {
        let capacity = self.capacity;
        let rate = self.rate;
        let tokens = self.store.update(key, |current| {
            let bucket = current.unwrap_or(Bucket { tokens: capacity, last_update: now });
            let top_up = elapsed_units(bucket.last_update, now, rate);
            let tokens = bucket.tokens.saturating_add(top_up).min(capacity).saturating_sub(1);
            (Bucket { tokens, last_update: now }, tokens)
        });
        self.clear_old(now);
        tokens >= 0
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("rate", &self.rate)
            .field("retention", &self.retention)
            .field("tracked", &self.size())
            .finish_non_exhaustive()
    }
}

/// Whole `rate` intervals from `since` to `now`, rounded toward negative infinity.
fn elapsed_units(since: SystemTime, now: SystemTime, rate: Duration) -> i64 {
    let elapsed = signed_nanos(since, now);
    saturate_i64(elapsed.div_euclid(rate.as_nanos() as i128))
}

fn signed_nanos(since: SystemTime, now: SystemTime) -> i128 {
    match now.duration_since(since) {
        Ok(forward) => forward.as_nanos() as i128,
        Err(backward) => -(backward.duration().as_nanos() as i128),
    }
}

fn epoch_nanos(at: SystemTime) -> i64 {
    saturate_i64(signed_nanos(SystemTime::UNIX_EPOCH, at))
}

/// Time of the next sweep after one at `swept`, saturating outside the `i64` nanosecond range.
fn sweep_deadline(swept: SystemTime, window: Duration) -> i64 {
    let deadline = signed_nanos(SystemTime::UNIX_EPOCH, swept) + window.as_nanos() as i128;
    saturate_i64(deadline).max(UNSEEDED + 1)
}

fn saturate_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// True once `now` is at least `window` after `since`.
fn age_reached(since: SystemTime, now: SystemTime, window: Duration) -> bool {
    now.duration_since(since).is_ok_and(|age| age >= window)
}

/// Builder for [`TokenBucket`].
#[derive(Debug, Clone)]
pub struct TokenBucketBuilder {
    capacity: u32,
    rate: Duration,
    retention: Option<Duration>,
    shards: usize,
    sink: Arc<dyn TelemetrySink>,
}

impl Default for TokenBucketBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            rate: DEFAULT_RATE,
            retention: None,
            shards: DEFAULT_SHARDS,
            sink: Arc::new(NullSink),
        }
    }
}

impl TokenBucketBuilder {
    /// Maximum number of tokens in a single bucket.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Time needed to earn one token.
    pub fn rate(mut self, rate: Duration) -> Self {
        self.rate = rate;
        self
    }

    /// Forget clients idle for this many days. Zero is rejected by [`build`](Self::build).
    pub fn memory_days(self, days: u32) -> Self {
        self.retention(Duration::from_secs(u64::from(days) * SECS_PER_DAY))
    }

    /// Forget clients idle for `window`. Zero is rejected by [`build`](Self::build).
    pub fn retention(mut self, window: Duration) -> Self {
        self.retention = Some(window);
        self
    }

    /// Number of independently locked shards in the bucket map.
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Sink receiving [`LimiterEvent::Swept`] reports.
    pub fn sink<S: TelemetrySink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn build(self) -> Result<TokenBucket, ConfigError> {
        if self.rate.is_zero() {
            return Err(ConfigError::ZeroRate);
        }
        if let Some(window) = self.retention.filter(|w| w.is_zero()) {
            return Err(ConfigError::InvalidRetentionWindow(window));
        }
        if self.shards == 0 {
            return Err(ConfigError::ZeroShards);
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> TokenBucket {
        TokenBucket {
            capacity: i64::from(self.capacity),
            rate: self.rate,
            retention: self.retention,
            store: BucketStore::new(self.shards),
            last_sweep: Mutex::new(None),
            sweep_due: AtomicI64::new(UNSEEDED),
            sink: self.sink,
        }
    }
}
