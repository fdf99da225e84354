//! The contract the native HTTP transport presents to the adapter.
//!
//! The transport itself (socket handling, header parsing, wire framing) is
//! an external collaborator. Per incoming exchange it delivers an
//! [`IncomingHead`] plus a push-based sequence of [`BodyEvent`]s, and
//! accepts the reply through a [`ReplyChannel`]. Not polling the body
//! source *is* the pause control; an in-flight [`ReplyChannel::send_chunk`]
//! suspending *is* the drain signal.

use bytes::Bytes;
use futures::Stream;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri, Version};
use tokio_util::sync::CancellationToken;

use ferry_fetch::{Headers, NativeTransportError};

/// What the transport delivers for one exchange before any body bytes:
/// method, target (path + query), protocol version and the raw header
/// pairs.
#[derive(Debug)]
pub struct IncomingHead {
    method: Method,
    target: String,
    version: Version,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl IncomingHead {
    pub fn new(
        method: Method,
        target: impl Into<String>,
        version: Version,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Self {
        Self { method, target: target.into(), version, headers }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Reconstructs the absolute request url from the target and the host
    /// header, since the fetch model carries absolute urls only.
    pub fn absolute_url(&self) -> Result<Uri, NativeTransportError> {
        if !self.target.starts_with('/') {
            // absolute-form target already carries scheme and authority
            return self
                .target
                .parse()
                .map_err(|e| NativeTransportError::protocol(format!("invalid request target {:?}: {e}", self.target)));
        }

        let host = self
            .headers
            .iter()
            .find(|(name, _)| *name == http::header::HOST)
            .and_then(|(_, value)| value.to_str().ok())
            .unwrap_or("localhost");

        format!("http://{host}{}", self.target)
            .parse()
            .map_err(|e| NativeTransportError::protocol(format!("invalid request target {:?}: {e}", self.target)))
    }
}

/// One event on the incoming body: a chunk, or the end of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEvent {
    Chunk(Bytes),
    End,
}

impl BodyEvent {
    #[inline]
    pub fn is_end(&self) -> bool {
        matches!(self, BodyEvent::End)
    }
}

/// Push-based body feed from the transport. Backpressure is exercised by
/// the adapter simply not polling while its bridge queue is full.
pub trait BodySource: Stream<Item = Result<BodyEvent, NativeTransportError>> + Unpin + Send {}

impl<S> BodySource for S where S: Stream<Item = Result<BodyEvent, NativeTransportError>> + Unpin + Send {}

/// The reply side of one exchange.
///
/// `send_head` commits the status line and headers; after that point no
/// fallback reply is possible and a broken exchange can only be
/// [`terminate`](ReplyChannel::terminate)d. `send_chunk` suspends while the
/// native sink's buffer is full and resumes on its drain signal.
#[trait_variant::make(ReplyChannel: Send)]
pub trait LocalReplyChannel {
    async fn send_head(&mut self, status: StatusCode, headers: &Headers) -> Result<(), NativeTransportError>;

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), NativeTransportError>;

    /// Cleanly finishes the reply.
    async fn end(&mut self) -> Result<(), NativeTransportError>;

    /// Forcibly closes the connection. Used when the head was already
    /// flushed and no valid reply can be constructed any more.
    async fn terminate(&mut self);
}

/// Transient handle on the native connection, held for the duration of one
/// exchange only and never shared across exchanges.
#[derive(Debug, Clone)]
pub struct NativeConnection {
    peer_closed: CancellationToken,
}

impl NativeConnection {
    /// Wraps the transport's close/error event feed.
    pub fn new(peer_closed: CancellationToken) -> Self {
        Self { peer_closed }
    }

    /// A connection that never reports a peer disconnect, for transports
    /// without close events.
    pub fn detached() -> Self {
        Self { peer_closed: CancellationToken::new() }
    }

    pub fn peer_closed(&self) -> &CancellationToken {
        &self.peer_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_url_uses_the_host_header() {
        let head = IncomingHead::new(
            Method::GET,
            "/echo?x=1",
            Version::HTTP_11,
            vec![(http::header::HOST, HeaderValue::from_static("example.test:8080"))],
        );

        assert_eq!(head.absolute_url().unwrap().to_string(), "http://example.test:8080/echo?x=1");
    }

    #[test]
    fn absolute_url_falls_back_to_localhost() {
        let head = IncomingHead::new(Method::GET, "/", Version::HTTP_11, Vec::new());
        assert_eq!(head.absolute_url().unwrap().to_string(), "http://localhost/");
    }

    #[test]
    fn absolute_form_targets_pass_through() {
        let head = IncomingHead::new(Method::GET, "http://other.test/path", Version::HTTP_11, Vec::new());
        assert_eq!(head.absolute_url().unwrap().to_string(), "http://other.test/path");
    }

    #[test]
    fn invalid_targets_are_protocol_errors() {
        let head = IncomingHead::new(Method::GET, "/bad target", Version::HTTP_11, Vec::new());
        assert!(matches!(head.absolute_url(), Err(NativeTransportError::Protocol { .. })));
    }
}
