use bucketgate::prelude::*;
use http::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tower::{service_fn, Layer, Service, ServiceBuilder, ServiceExt};

fn website(
) -> impl Service<Request<()>, Response = Response<String>, Error = Infallible> + Clone {
    service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(Response::new("Hello".to_string()))
    })
}

fn get() -> Request<()> {
    let mut req = Request::get("/").body(()).unwrap();
    req.extensions_mut().insert(SocketAddr::from(([127, 0, 0, 1], 50_000)));
    req
}

async fn status<S>(svc: &mut S) -> StatusCode
where
    S: Service<Request<()>, Response = Response<String>, Error = Infallible>,
{
    svc.ready().await.unwrap().call(get()).await.unwrap().status()
}

#[tokio::test]
async fn token_bucket_rate_limit_wall_clock() {
    let mut limiter = token_bucket_rate_limiter(website(), 2, Duration::from_secs(1)).unwrap();

    assert_eq!(status(&mut limiter).await, StatusCode::OK);
    assert_eq!(status(&mut limiter).await, StatusCode::OK);
    assert_eq!(status(&mut limiter).await, StatusCode::TOO_MANY_REQUESTS);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(status(&mut limiter).await, StatusCode::OK);
}

#[tokio::test]
async fn token_bucket_rate_limit_manual_clock() {
    let clock = ManualClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));
    let layer = RateLimitLayer::token_bucket(2, Duration::from_secs(1)).unwrap().clock(clock.clone());
    let mut svc = ServiceBuilder::new().layer(layer.clone()).service(website());

    assert_eq!(status(&mut svc).await, StatusCode::OK);
    assert_eq!(status(&mut svc).await, StatusCode::OK);
    assert_eq!(status(&mut svc).await, StatusCode::TOO_MANY_REQUESTS);

    // One second only pays back the denied attempt.
    clock.advance(Duration::from_secs(1));
    assert_eq!(status(&mut svc).await, StatusCode::TOO_MANY_REQUESTS);

    clock.advance(Duration::from_secs(2));
    assert_eq!(status(&mut svc).await, StatusCode::OK);
    assert_eq!(layer.strategy().size(), 1);
}

#[tokio::test]
async fn fixed_key_collapses_clients_into_one_bucket() {
    let clock = ManualClock::default();
    let layer = RateLimitLayer::token_bucket(3, Duration::from_secs(60))
        .unwrap()
        .clock(clock)
        .key_extractor(|_req: &Request<()>| b"everyone".to_vec());
    let svc = layer.layer(website());

    let mut statuses = Vec::new();
    for port in 1..=4u16 {
        let mut req = Request::get("/").body(()).unwrap();
        req.extensions_mut().insert(SocketAddr::from(([10, 0, 0, 1], port)));
        statuses.push(svc.clone().oneshot(req).await.unwrap().status());
    }

    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
    assert_eq!(layer.strategy().size(), 1);
}

#[tokio::test]
async fn header_key_limits_per_user() {
    let layer = RateLimitLayer::token_bucket(1, Duration::from_secs(60))
        .unwrap()
        .clock(ManualClock::default())
        .key_extractor(HeaderKey::new(http::HeaderName::from_static("x-user-id")));
    let svc = layer.layer(website());

    let as_user = |user: &'static str| Request::get("/").header("x-user-id", user).body(()).unwrap();

    assert_eq!(svc.clone().oneshot(as_user("alice")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(svc.clone().oneshot(as_user("bob")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        svc.oneshot(as_user("alice")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn header_cannot_spend_a_peer_bucket() {
    let layer = RateLimitLayer::token_bucket(1, Duration::from_secs(3600))
        .unwrap()
        .clock(ManualClock::default())
        .key_extractor(HeaderKey::new(http::HeaderName::from_static("x-user-id")));
    let svc = layer.layer(website());

    let mut spoofed = Request::get("/").header("x-user-id", "10.0.0.7:4711").body(()).unwrap();
    spoofed.extensions_mut().insert(SocketAddr::from(([6, 6, 6, 6], 1)));
    assert_eq!(svc.clone().oneshot(spoofed).await.unwrap().status(), StatusCode::OK);

    let mut anonymous = Request::get("/").body(()).unwrap();
    anonymous.extensions_mut().insert(SocketAddr::from(([10, 0, 0, 7], 4711)));
    assert_eq!(svc.oneshot(anonymous).await.unwrap().status(), StatusCode::OK);
    assert_eq!(layer.strategy().size(), 2);
}

#[tokio::test]
async fn retention_through_shared_strategy() {
    let clock = ManualClock::new(SystemTime::UNIX_EPOCH);
    let sink = MemorySink::new();
    let bucket =
        Arc::new(TokenBucket::builder().memory_days(1).sink(sink.clone()).build().unwrap());
    let layer = RateLimitLayer::from_shared(bucket.clone()).clock(clock.clone());
    let svc = layer.layer(website());

    let from = |port: u16| {
        let mut req = Request::get("/").body(()).unwrap();
        req.extensions_mut().insert(SocketAddr::from(([192, 168, 0, 1], port)));
        req
    };

    svc.clone().oneshot(from(1)).await.unwrap();
    clock.advance(Duration::from_secs(12 * 60 * 60));
    svc.clone().oneshot(from(2)).await.unwrap();
    assert_eq!(bucket.size(), 2);

    clock.advance(Duration::from_secs(12 * 60 * 60));
    svc.oneshot(from(3)).await.unwrap();

    assert_eq!(bucket.size(), 2);
    assert_eq!(bucket.tokens(b"192.168.0.1:1"), None);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, bucketgate::LimiterEvent::Swept { evicted: 1, .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_never_over_admit() {
    let bucket = Arc::new(TokenBucket::new(10, Duration::from_secs(3600)).unwrap());
    let now = SystemTime::UNIX_EPOCH;

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let bucket = bucket.clone();
            tokio::spawn(async move { bucket.check(b"shared", now) })
        })
        .collect();

    let admitted = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();

    assert_eq!(admitted, 10);
    assert_eq!(bucket.tokens(b"shared"), Some(10 - 64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_are_independent() {
    let bucket = Arc::new(TokenBucket::builder().capacity(5).shards(4).build().unwrap());
    let now = SystemTime::UNIX_EPOCH;

    let handles: Vec<_> = (0..32u32)
        .map(|client| {
            let bucket = bucket.clone();
            tokio::spawn(async move {
                let key = client.to_be_bytes();
                (0..8).filter(|_| bucket.check(&key, now)).count()
            })
        })
        .collect();

    for admitted in futures::future::join_all(handles).await {
        assert_eq!(admitted.unwrap(), 5);
    }
    assert_eq!(bucket.size(), 32);
}
