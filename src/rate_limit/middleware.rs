use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::rate_limit::key::{KeyExtractor, PeerAddr};
use crate::rate_limit::strategies::TokenBucket;
use crate::rate_limit::{AdmissionControl, Classify, RequestKind};
use crate::telemetry::{LimiterEvent, NullSink, TelemetrySink};
use pin_project::pin_project;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Body of the rejection response. The spelling is kept for compatibility with existing
/// clients that match on it.
pub const REJECTION_BODY: &str = "Limit Exceded";

/// The fixed response returned to clients over their limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub status: http::StatusCode,
    pub body: &'static str,
}

impl Default for Rejection {
    /// `429 Too Many Requests` with body [`REJECTION_BODY`].
    fn default() -> Self {
        Self { status: http::StatusCode::TOO_MANY_REQUESTS, body: REJECTION_BODY }
    }
}

/// Response types the middleware can build a rejection for.
pub trait FromRejection {
    fn from_rejection(rejection: &Rejection) -> Self;
}

impl<B> FromRejection for http::Response<B>
where
    B: From<&'static str>,
{
    fn from_rejection(rejection: &Rejection) -> Self {
        let mut response = http::Response::new(B::from(rejection.body));
        *response.status_mut() = rejection.status;
        response
    }
}

/// A layer that enforces rate limits using an [`AdmissionControl`] strategy.
///
/// All services produced by one layer (and all their clones) share the same strategy
/// instance, and therefore the same per-client state.
pub struct RateLimitLayer<L, K = PeerAddr> {
    strategy: Arc<L>,
    extractor: Arc<K>,
    governed: Arc<[RequestKind]>,
    rejection: Rejection,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
}

impl<L> RateLimitLayer<L> {
    /// Create a new rate limit layer keyed by peer address, governing plain HTTP requests.
    pub fn new(strategy: L) -> Self {
        Self::from_shared(Arc::new(strategy))
    }

    /// Like [`new`](Self::new) but for a strategy the caller keeps a handle to.
    pub fn from_shared(strategy: Arc<L>) -> Self {
        Self {
            strategy,
            extractor: Arc::new(PeerAddr),
            governed: Arc::from(vec![RequestKind::Http]),
            rejection: Rejection::default(),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
        }
    }
}

impl RateLimitLayer<TokenBucket> {
    /// Token bucket limiter with `capacity` tokens per client, one token earned per `rate`.
    pub fn token_bucket(capacity: u32, rate: Duration) -> Result<Self, ConfigError> {
        TokenBucket::new(capacity, rate).map(Self::new)
    }

    /// Token bucket limiter with 10 tokens per client, one earned per second.
    pub fn default_token_bucket() -> Self {
        Self::new(TokenBucket::default())
    }
}

impl<L, K> RateLimitLayer<L, K> {
    /// Replace the key extractor.
    pub fn key_extractor<K2>(self, extractor: K2) -> RateLimitLayer<L, K2> {
        RateLimitLayer {
            strategy: self.strategy,
            extractor: Arc::new(extractor),
            governed: self.governed,
            rejection: self.rejection,
            clock: self.clock,
            sink: self.sink,
        }
    }

    /// Request kinds subject to the limit; all other kinds pass through unchecked.
    pub fn governed(mut self, kinds: impl IntoIterator<Item = RequestKind>) -> Self {
        self.governed = kinds.into_iter().collect::<Vec<_>>().into();
        self
    }

    /// Override the rejection response.
    pub fn rejection(mut self, rejection: Rejection) -> Self {
        self.rejection = rejection;
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sink receiving admission events.
    pub fn sink<T: TelemetrySink + 'static>(mut self, sink: T) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// The shared strategy.
    pub fn strategy(&self) -> &Arc<L> {
        &self.strategy
    }
}

impl<L, K> Clone for RateLimitLayer<L, K> {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy.clone(),
            extractor: self.extractor.clone(),
            governed: self.governed.clone(),
            rejection: self.rejection,
            clock: self.clock.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<L, K> fmt::Debug for RateLimitLayer<L, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("governed", &self.governed)
            .field("rejection", &self.rejection)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<S, L, K> Layer<S> for RateLimitLayer<L, K> {
    type Service = RateLimitService<S, L, K>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService { inner: service, layer: self.clone() }
    }
}

/// Middleware service that enforces rate limits.
pub struct RateLimitService<S, L, K = PeerAddr> {
    inner: S,
    layer: RateLimitLayer<L, K>,
}

impl<S, L, K> RateLimitService<S, L, K> {
    /// Borrow the wrapped service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// The shared strategy.
    pub fn strategy(&self) -> &Arc<L> {
        &self.layer.strategy
    }
}

impl<S: Clone, L, K> Clone for RateLimitService<S, L, K> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), layer: self.layer.clone() }
    }
}

impl<S: fmt::Debug, L, K> fmt::Debug for RateLimitService<S, L, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .field("layer", &self.layer)
            .finish()
    }
}

impl<S, L, K, Req> Service<Req> for RateLimitService<S, L, K>
where
    S: Service<Req>,
    S::Response: FromRejection,
    L: AdmissionControl,
    K: KeyExtractor<Req>,
    Req: Classify,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let layer = &self.layer;
        let kind = req.kind();

        if !layer.governed.contains(&kind) {
            tracing::trace!(%kind, "request kind not rate limited; forwarding");
            layer.sink.emit(LimiterEvent::Bypassed { kind });
            return ResponseFuture::forward(self.inner.call(req));
        }

        let key = layer.extractor.extract(&req);
        if layer.strategy.check(&key, layer.clock.now()) {
            tracing::trace!(%kind, "request admitted");
            layer.sink.emit(LimiterEvent::Admitted { kind });
            ResponseFuture::forward(self.inner.call(req))
        } else {
            // Keys may carry credentials (API key headers); keep them out of info logs.
            tracing::info!(%kind, "request blocked: rate limit exceeded");
            tracing::debug!(client = %String::from_utf8_lossy(&key), %kind, "blocked client");
            layer.sink.emit(LimiterEvent::Rejected { kind });
            ResponseFuture::rejected(<S::Response as FromRejection>::from_rejection(&layer.rejection))
        }
    }
}

/// Response future of [`RateLimitService`].
#[pin_project(project = ResponseFutureProj)]
pub enum ResponseFuture<F, R> {
    /// Waiting on the wrapped service.
    Forward {
        #[pin]
        future: F,
    },
    /// Rejected without touching the wrapped service.
    Rejected { response: Option<R> },
}

impl<F, R> ResponseFuture<F, R> {
    fn forward(future: F) -> Self {
        ResponseFuture::Forward { future }
    }

    fn rejected(response: R) -> Self {
        ResponseFuture::Rejected { response: Some(response) }
    }
}

impl<F, R, E> Future for ResponseFuture<F, R>
where
    F: Future<Output = Result<R, E>>,
{
    type Output = Result<R, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Forward { future } => future.poll(cx),
            ResponseFutureProj::Rejected { response } => {
                Poll::Ready(Ok(response.take().expect("ResponseFuture polled after completion")))
            }
        }
    }
}

impl<F, R> fmt::Debug for ResponseFuture<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFuture::Forward { .. } => f.write_str("ResponseFuture::Forward"),
            ResponseFuture::Rejected { .. } => f.write_str("ResponseFuture::Rejected"),
        }
    }
}

/// Wrap `service` in a token bucket limiter keyed by peer address.
///
/// Each client gets `capacity` tokens and earns one back per `rate`.
pub fn token_bucket_rate_limiter<S>(
    service: S,
    capacity: u32,
    rate: Duration,
) -> Result<RateLimitService<S, TokenBucket>, ConfigError> {
    Ok(RateLimitLayer::token_bucket(capacity, rate)?.layer(service))
}
