//! Client key extraction.

use http::header::HeaderName;
use std::net::SocketAddr;

/// Derives the key a request is charged against.
///
/// Keys are opaque bytes; two requests share a bucket exactly when their keys are equal.
/// Any `Fn(&Req) -> Vec<u8>` is an extractor.
pub trait KeyExtractor<Req>: Send + Sync {
    fn extract(&self, req: &Req) -> Vec<u8>;
}

impl<Req, F> KeyExtractor<Req> for F
where
    F: Fn(&Req) -> Vec<u8> + Send + Sync,
{
    fn extract(&self, req: &Req) -> Vec<u8> {
        self(req)
    }
}

/// Default extractor: the peer's socket address, encoded as `ip:port`.
///
/// The address is read from a [`SocketAddr`] in the request extensions, which the
/// server (or an outer layer) is expected to insert per connection. Requests without
/// one are all charged against the empty key.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddr;

impl PeerAddr {
    fn key<B>(req: &http::Request<B>) -> Vec<u8> {
        match req.extensions().get::<SocketAddr>() {
            Some(addr) => addr.to_string().into_bytes(),
            None => {
                tracing::debug!("no peer address on request; using shared empty key");
                Vec::new()
            }
        }
    }
}

impl<B> KeyExtractor<http::Request<B>> for PeerAddr {
    fn extract(&self, req: &http::Request<B>) -> Vec<u8> {
        Self::key(req)
    }
}

const HEADER_TAG: &[u8] = b"h:";
const PEER_TAG: &[u8] = b"p:";

/// Keys requests by the value of a header (API key, authenticated user id), falling back
/// to [`PeerAddr`] when the header is absent.
///
/// Header keys are tagged `h:` and peer fallbacks `p:`, so a client cannot name a peer's
/// address in the header to spend that peer's tokens.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: HeaderName,
}

impl HeaderKey {
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }

    /// Header consulted by this extractor.
    pub fn name(&self) -> &HeaderName {
        &self.name
    }
}

impl<B> KeyExtractor<http::Request<B>> for HeaderKey {
    fn extract(&self, req: &http::Request<B>) -> Vec<u8> {
        let (tag, source) = match req.headers().get(&self.name) {
            Some(value) => (HEADER_TAG, value.as_bytes().to_vec()),
            None => (PEER_TAG, PeerAddr::key(req)),
        };
        let mut key = Vec::with_capacity(tag.len() + source.len());
        key.extend_from_slice(tag);
        key.extend_from_slice(&source);
        key
    }
}
