//! The request listener: drives one native exchange through the fetch
//! model.
//!
//! Flow per exchange: the native transport delivers a head and a body event
//! source; the listener builds a [`Request`] whose body is only a lazy
//! stream handle, invokes the application handler concurrently with body
//! forwarding, drains whatever the handler left unread, then streams the
//! returned [`Response`] to the reply channel chunk by chunk. The head is
//! written immediately and the body is never buffered wholesale, so
//! incremental producers keep their pacing.
//!
//! Error rules: failures before the head is committed produce a fallback
//! status reply (400 for requests the model rejects, 500 for handler
//! failures); failures after the head can only terminate the connection.
//! Either way the native channel is closed and no stream subscription
//! outlives the exchange.

use std::sync::Arc;

use futures::StreamExt;
use http::header::HeaderValue;
use http::{Method, StatusCode, header};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use ferry_fetch::abort::{AbortController, AbortReason, AbortSignal};
use ferry_fetch::error::{AbortError, BodyError, NativeTransportError};
use ferry_fetch::{Body, ByteSink, Headers, Request, Response, byte_channel};

use crate::handler::Handler;
use crate::transport::{BodyEvent, BodySource, IncomingHead, NativeConnection, ReplyChannel};

/// Default bridge queue depth, in chunks.
const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Error from serving one exchange.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to build request: {reason}")]
    BadRequest { reason: String },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: NativeTransportError,
    },

    #[error("response body error: {source}")]
    Body {
        #[from]
        source: BodyError,
    },
}

/// How an exchange finished when it did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The response was fully streamed and the reply channel ended.
    Completed,
    /// The exchange was deliberately aborted. Not an error: resources are
    /// released and the connection was torn down on purpose.
    Aborted(AbortReason),
}

/// Adapter between a native HTTP transport and a fetch [`Handler`].
///
/// One listener serves any number of sequential exchanges, but each call to
/// [`serve`](RequestListener::serve) owns its native connection exclusively
/// for the duration of that exchange.
#[derive(Debug)]
pub struct RequestListener<H> {
    handler: Arc<H>,
    high_water_mark: usize,
}

impl<H> RequestListener<H>
where
    H: Handler,
{
    pub fn new(handler: H) -> Self {
        Self { handler: Arc::new(handler), high_water_mark: DEFAULT_HIGH_WATER_MARK }
    }

    /// Overrides the body bridge queue depth.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Serves one exchange.
    ///
    /// `body` is the transport's body event feed, `None` for bodiless
    /// exchanges; a body is never fabricated for GET/HEAD/DELETE-class
    /// requests that arrive without one.
    pub async fn serve<S, R>(
        &self,
        head: IncomingHead,
        body: Option<S>,
        reply: &mut R,
        connection: NativeConnection,
    ) -> Result<ExchangeOutcome, ServeError>
    where
        S: BodySource,
        R: ReplyChannel,
    {
        let controller = AbortController::new();
        let signal = controller.signal();

        // BUILDING_REQUEST: only a lazy stream handle is attached, no body
        // bytes are read here.
        let (sink, request_body) = if body.is_some() && body_allowed(head.method()) {
            let (sink, stream) = byte_channel(self.high_water_mark);
            (Some(sink), Some(Body::from(stream.abort_on(&signal))))
        } else {
            (None, None)
        };

        let request = match build_request(&head, request_body, &signal) {
            Ok(request) => request,
            Err(reason) => {
                warn!(%reason, "rejecting unbuildable request");
                send_status_only(reply, StatusCode::BAD_REQUEST).await?;
                return Err(ServeError::BadRequest { reason });
            }
        };

        debug!(method = %request.method(), url = %request.url(), "invoking handler");

        // INVOKING_HANDLER: the handler and the body forwarder run
        // concurrently: the handler may park on body chunks while the
        // forwarder parks on bridge capacity, and neither may starve the
        // other. Peer disconnect aborts the exchange signal but still lets
        // the handler resolve.
        let handler = Arc::clone(&self.handler);
        tokio::pin! {
            let handler_future = handler.handle(request);
            let forward_future = forward_body(body, sink, &signal);
        }

        let mut forward_done = false;
        let mut peer_watched = true;
        let response_result = loop {
            tokio::select! {
                biased;
                response = &mut handler_future => break response,
                () = connection.peer_closed().cancelled(), if peer_watched => {
                    peer_watched = false;
                    info!("peer disconnected mid exchange");
                    controller.abort(AbortReason::PeerDisconnected);
                }
                result = &mut forward_future, if !forward_done => {
                    forward_done = true;
                    if let Err(e) = result {
                        warn!(cause = %e, "request body stream failed");
                    }
                }
            }
        };

        // STREAMING_RESPONSE, concurrently with draining whatever the
        // handler left unread so the native connection finishes clean. The
        // two must overlap: a response that echoes the request stream keeps
        // the forwarder busy until the writer pulls it through.
        let (write_result, forward_result) = tokio::join!(
            async {
                match response_result {
                    Ok(response) => write_response(reply, response).await,
                    Err(e) => {
                        error!(cause = %e, "handler failed, sending fallback response");
                        send_status_only(reply, StatusCode::INTERNAL_SERVER_ERROR).await.map_err(ServeError::from)
                    }
                }
            },
            async {
                if forward_done { Ok(()) } else { forward_future.await }
            }
        );

        if let Err(e) = forward_result {
            warn!(cause = %e, "failed to drain request body");
        }
        write_result?;

        Ok(match signal.reason() {
            Some(reason) => ExchangeOutcome::Aborted(reason),
            None => ExchangeOutcome::Completed,
        })
    }

}

/// Writes one response: head immediately, then the body chunk by chunk as
/// the producer makes it available.
async fn write_response<R>(reply: &mut R, mut response: Response) -> Result<(), ServeError>
where
    R: ReplyChannel,
{
    if let Some(length) = response.body().and_then(Body::known_length) {
        if !response.headers().contains(header::CONTENT_LENGTH) {
            response.headers_mut().set(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
    }

    let status = response.status();
    let body = response.take_body();

    // committing the head; from here on only terminate() can bail out
    reply.send_head(status, response.headers()).await?;

    if let Some(mut body) = body {
        let mut stream = match body.stream() {
            Ok(stream) => stream,
            Err(e) => {
                error!(cause = %e, "response body unusable after head was sent, terminating");
                reply.terminate().await;
                return Err(e.into());
            }
        };

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if let Err(e) = reply.send_chunk(chunk).await {
                        error!(cause = %e, "reply sink failed mid body, terminating");
                        reply.terminate().await;
                        return Err(e.into());
                    }
                }
                Err(e) => {
                    error!(cause = %e, "response body errored mid stream, terminating");
                    reply.terminate().await;
                    return Err(e.into());
                }
            }
        }
    }

    reply.end().await?;
    Ok(())
}

/// True for methods that may carry a request body through the model.
fn body_allowed(method: &Method) -> bool {
    !matches!(method, &Method::GET | &Method::HEAD)
}

/// Streams native body events into the bridge sink.
///
/// Honors abort (stops consuming and tears the source down), consumer
/// release (keeps draining so the connection stays reusable) and clean end
/// versus truncation.
async fn forward_body<S>(
    source: Option<S>,
    mut sink: Option<ByteSink>,
    signal: &AbortSignal,
) -> Result<(), NativeTransportError>
where
    S: BodySource,
{
    let Some(mut source) = source else {
        return Ok(());
    };

    let mut skipped: usize = 0;
    loop {
        tokio::select! {
            biased;
            () = signal.cancelled() => {
                if let Some(sink) = sink.take() {
                    let err = signal.abort_error().unwrap_or_else(|| AbortError::new(AbortReason::Explicit(None)));
                    sink.fail(BodyError::Aborted(err)).await;
                }
                // dropping the source stops native consumption and releases
                // its buffers
                return Ok(());
            }
            event = source.next() => match event {
                Some(Ok(BodyEvent::Chunk(chunk))) => {
                    let released = match sink.as_mut() {
                        Some(active) => {
                            let len = chunk.len();
                            match active.send(chunk).await {
                                Ok(()) => false,
                                Err(_) => {
                                    skipped += len;
                                    true
                                }
                            }
                        }
                        None => {
                            skipped += chunk.len();
                            false
                        }
                    };
                    if released {
                        sink = None;
                    }
                }
                Some(Ok(BodyEvent::End)) => {
                    if let Some(sink) = sink.take() {
                        let _ = sink.close().await;
                    }
                    if skipped > 0 {
                        info!(size = skipped, "skipped unread request body");
                    }
                    return Ok(());
                }
                Some(Err(e)) => {
                    if let Some(sink) = sink.take() {
                        sink.fail(BodyError::Transport { source: e.clone() }).await;
                    }
                    return Err(e);
                }
                None => {
                    let e = NativeTransportError::Closed;
                    if let Some(sink) = sink.take() {
                        sink.fail(BodyError::Transport { source: e.clone() }).await;
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Builds the fetch-model request from the native head. The body, when given, is
/// the already-bridged lazy stream.
fn build_request(head: &IncomingHead, body: Option<Body>, signal: &AbortSignal) -> Result<Request, String> {
    let url = head.absolute_url().map_err(|e| e.to_string())?;

    let mut headers = Headers::new();
    for (name, value) in head.headers() {
        headers.append(name.clone(), value.clone());
    }

    let mut builder = Request::builder().method(head.method().clone()).url(url).headers(headers).signal(signal.clone());
    if let Some(body) = body {
        builder = builder.body(body);
    }
    builder.build().map_err(|e| e.to_string())
}

/// Bodiless fallback reply, used when no application response can be
/// produced and the head has not been committed yet.
async fn send_status_only<R>(reply: &mut R, status: StatusCode) -> Result<(), NativeTransportError>
where
    R: ReplyChannel,
{
    let mut headers = Headers::new();
    headers.set(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    reply.send_head(status, &headers).await?;
    reply.end().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{BoxError, make_handler};
    use bytes::Bytes;
    use ferry_fetch::ByteStream;
    use futures::stream::{self, BoxStream};
    use http::header::{HOST, HeaderValue};
    use http::{Method, Version};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    type EventResult = Result<BodyEvent, NativeTransportError>;

    const NO_BODY: Option<stream::Empty<EventResult>> = None;

    /// In-memory reply channel recording everything the adapter writes.
    #[derive(Default)]
    struct TestReply {
        head: Option<(StatusCode, Headers)>,
        chunks: Vec<Bytes>,
        ended: bool,
        terminated: bool,
    }

    impl TestReply {
        fn status(&self) -> StatusCode {
            self.head.as_ref().expect("head not sent").0
        }

        fn header(&self, name: &str) -> Option<String> {
            self.head.as_ref().expect("head not sent").1.get(name)
        }

        fn body(&self) -> Bytes {
            let mut collected = Vec::new();
            for chunk in &self.chunks {
                collected.extend_from_slice(chunk);
            }
            Bytes::from(collected)
        }
    }

    impl ReplyChannel for TestReply {
        async fn send_head(&mut self, status: StatusCode, headers: &Headers) -> Result<(), NativeTransportError> {
            assert!(self.head.is_none(), "head sent twice");
            self.head = Some((status, headers.clone()));
            Ok(())
        }

        async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), NativeTransportError> {
            assert!(self.head.is_some(), "chunk before head");
            self.chunks.push(chunk);
            Ok(())
        }

        async fn end(&mut self) -> Result<(), NativeTransportError> {
            self.ended = true;
            Ok(())
        }

        async fn terminate(&mut self) {
            self.terminated = true;
        }
    }

    fn incoming_head(method: Method, extra: &[(&'static str, &'static str)]) -> IncomingHead {
        let mut headers = vec![(HOST, HeaderValue::from_static("localhost:8080"))];
        for &(name, value) in extra {
            headers.push((name.parse().unwrap(), HeaderValue::from_static(value)));
        }
        IncomingHead::new(method, "/echo", Version::HTTP_11, headers)
    }

    fn body_events(chunks: &[&'static str]) -> impl BodySource + use<> {
        let mut events: Vec<EventResult> = chunks.iter().map(|c| Ok(BodyEvent::Chunk(Bytes::from_static(c.as_bytes())))).collect();
        events.push(Ok(BodyEvent::End));
        stream::iter(events)
    }

    #[tokio::test]
    async fn echoes_a_json_exchange() {
        let seen = Arc::new(Mutex::new(None));
        let record = Arc::clone(&seen);
        let listener = RequestListener::new(make_handler(move |mut request: Request| {
            let record = Arc::clone(&record);
            async move {
                let body = request.text().await?;
                *record.lock().unwrap() =
                    Some((request.method().clone(), request.url().to_string(), request.headers().clone(), body));
                Ok::<_, BoxError>(
                    Response::builder()
                        .status(200)
                        .header("content-type", "application/json")
                        .body(r#"{"responseFoo":"responseFoo"}"#)
                        .build()?,
                )
            }
        }));

        let head = incoming_head(
            Method::POST,
            &[("accept", "application/json"), ("content-type", "application/json"), ("connection", "keep-alive")],
        );
        let body = body_events(&[r#"{"requestFoo":"#, r#""requestFoo"}"#]);

        let mut reply = TestReply::default();
        let outcome = listener.serve(head, Some(body), &mut reply, NativeConnection::detached()).await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Completed);

        let (method, url, headers, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(method, Method::POST);
        assert_eq!(url, "http://localhost:8080/echo");
        assert_eq!(headers.get("accept").as_deref(), Some("application/json"));
        assert_eq!(headers.get("content-type").as_deref(), Some("application/json"));
        // connection management never crosses the boundary
        assert_eq!(headers.get("connection"), None);
        assert_eq!(body, r#"{"requestFoo":"requestFoo"}"#);

        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(reply.header("content-type").as_deref(), Some("application/json"));
        assert_eq!(reply.body(), Bytes::from(r#"{"responseFoo":"responseFoo"}"#));
        assert!(reply.ended);
        assert!(!reply.terminated);
    }

    #[tokio::test]
    async fn method_and_url_round_trip_for_all_methods() {
        for method in [Method::GET, Method::DELETE, Method::POST, Method::PUT, Method::PATCH] {
            let seen = Arc::new(Mutex::new(None));
            let record = Arc::clone(&seen);
            let listener = RequestListener::new(make_handler(move |request: Request| {
                let record = Arc::clone(&record);
                async move {
                    *record.lock().unwrap() = Some((request.method().clone(), request.url().to_string()));
                    Ok::<_, BoxError>(Response::empty(StatusCode::OK))
                }
            }));

            let head = incoming_head(method.clone(), &[]);
            let mut reply = TestReply::default();
            let outcome = if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
                listener
                    .serve(head, Some(body_events(&["payload"])), &mut reply, NativeConnection::detached())
                    .await
                    .unwrap()
            } else {
                listener.serve(head, NO_BODY, &mut reply, NativeConnection::detached()).await.unwrap()
            };

            assert_eq!(outcome, ExchangeOutcome::Completed);
            let (seen_method, seen_url) = seen.lock().unwrap().take().unwrap();
            assert_eq!(seen_method, method);
            assert_eq!(seen_url, "http://localhost:8080/echo");
            assert_eq!(reply.status(), StatusCode::OK);
            assert!(reply.ended);
        }
    }

    /// Five chunks spaced 30ms apart, highest index first.
    fn paced_response_body() -> ByteStream {
        ByteStream::wrap(stream::unfold(5u32, |i| async move {
            if i == 0 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            Some((Ok(Bytes::from(format!("data: response_{i}\n"))), i - 1))
        }))
    }

    fn paced_request_events() -> BoxStream<'static, EventResult> {
        stream::unfold(5u32, |i| async move {
            if i == 0 {
                return Some((Ok(BodyEvent::End), 0));
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            Some((Ok(BodyEvent::Chunk(Bytes::from(format!("data: request_{i}\n")))), i - 1))
        })
        .take(6)
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn incremental_response_chunks_keep_their_order() {
        for method in [Method::GET, Method::DELETE, Method::POST, Method::PUT, Method::PATCH] {
            let listener = RequestListener::new(make_handler(|_request: Request| async move {
                Ok::<_, BoxError>(
                    Response::builder().status(200).body(ferry_fetch::Body::from(paced_response_body())).build()?,
                )
            }));

            let head = incoming_head(method.clone(), &[]);
            let mut reply = TestReply::default();
            let outcome = if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
                listener
                    .serve(head, Some(body_events(&["payload"])), &mut reply, NativeConnection::detached())
                    .await
                    .unwrap()
            } else {
                listener.serve(head, NO_BODY, &mut reply, NativeConnection::detached()).await.unwrap()
            };

            assert_eq!(outcome, ExchangeOutcome::Completed);
            let observed: Vec<_> = reply.chunks.iter().map(|c| String::from_utf8_lossy(c).into_owned()).collect();
            assert_eq!(
                observed,
                [
                    "data: response_5\n",
                    "data: response_4\n",
                    "data: response_3\n",
                    "data: response_2\n",
                    "data: response_1\n",
                ]
            );
            assert!(reply.ended);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn incremental_request_chunks_keep_their_order() {
        let seen = Arc::new(Mutex::new(None));
        let record = Arc::clone(&seen);
        let listener = RequestListener::new(make_handler(move |mut request: Request| {
            let record = Arc::clone(&record);
            async move {
                *record.lock().unwrap() = Some(request.text().await?);
                Ok::<_, BoxError>(Response::empty(StatusCode::OK))
            }
        }));

        let head = incoming_head(Method::POST, &[]);
        let mut reply = TestReply::default();
        listener.serve(head, Some(paced_request_events()), &mut reply, NativeConnection::detached()).await.unwrap();

        let body = seen.lock().unwrap().take().unwrap();
        assert_eq!(
            body,
            "data: request_5\ndata: request_4\ndata: request_3\ndata: request_2\ndata: request_1\n"
        );
    }

    #[tokio::test]
    async fn unread_body_is_drained_and_the_exchange_stays_clean() {
        let listener = RequestListener::new(make_handler(|_request: Request| async move {
            // never touches the body
            Ok::<_, BoxError>(Response::empty(StatusCode::NO_CONTENT))
        }));

        let consumed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&consumed);
        let body = body_events(&["chunk one", "chunk two", "chunk three"]).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let head = incoming_head(Method::POST, &[]);
        let mut reply = TestReply::default();
        let outcome = listener.serve(head, Some(body), &mut reply, NativeConnection::detached()).await.unwrap();

        assert_eq!(outcome, ExchangeOutcome::Completed);
        // three chunks plus the end marker were pulled off the native source
        assert_eq!(consumed.load(Ordering::SeqCst), 4);
        assert_eq!(reply.status(), StatusCode::NO_CONTENT);
        assert!(reply.ended);
        assert!(!reply.terminated);
    }

    #[tokio::test]
    async fn handler_failure_becomes_a_500_reply() {
        let listener = RequestListener::new(make_handler(|_request: Request| async move {
            Err::<Response, BoxError>("boom".into())
        }));

        let head = incoming_head(Method::GET, &[]);
        let mut reply = TestReply::default();
        let outcome = listener.serve(head, NO_BODY, &mut reply, NativeConnection::detached()).await.unwrap();

        assert_eq!(outcome, ExchangeOutcome::Completed);
        assert_eq!(reply.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reply.chunks.is_empty());
        assert!(reply.ended);
    }

    #[tokio::test]
    async fn peer_disconnect_aborts_the_exchange_signal() {
        let listener = RequestListener::new(make_handler(|request: Request| async move {
            let signal = request.signal().cloned().expect("adapter wires a signal");
            signal.cancelled().await;
            Ok::<_, BoxError>(Response::empty(StatusCode::OK))
        }));

        let token = CancellationToken::new();
        let head = incoming_head(Method::GET, &[]);
        let mut reply = TestReply::default();

        let serve = listener.serve(head, NO_BODY, &mut reply, NativeConnection::new(token.clone()));
        tokio::pin!(serve);

        assert!(futures::poll!(serve.as_mut()).is_pending());
        token.cancel();

        let outcome = serve.await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Aborted(AbortReason::PeerDisconnected));
    }

    #[tokio::test]
    async fn peer_disconnect_unblocks_a_parked_body_read() {
        let listener = RequestListener::new(make_handler(|mut request: Request| async move {
            // the native source never produces; this read parks until abort
            let result = request.text().await;
            assert!(result.is_err());
            Ok::<_, BoxError>(Response::empty(StatusCode::OK))
        }));

        let token = CancellationToken::new();
        let head = incoming_head(Method::POST, &[]);
        let mut reply = TestReply::default();

        let stalled: BoxStream<'static, EventResult> = stream::pending().boxed();
        let outcome = {
            let serve = listener.serve(head, Some(stalled), &mut reply, NativeConnection::new(token.clone()));
            tokio::pin!(serve);

            assert!(futures::poll!(serve.as_mut()).is_pending());
            token.cancel();

            serve.await.unwrap()
        };
        assert_eq!(outcome, ExchangeOutcome::Aborted(AbortReason::PeerDisconnected));
        assert_eq!(reply.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unbuildable_requests_get_a_400() {
        let listener = RequestListener::new(make_handler(|_request: Request| async move {
            Ok::<_, BoxError>(Response::empty(StatusCode::OK))
        }));

        let head = IncomingHead::new(Method::GET, "/bad target", Version::HTTP_11, Vec::new());
        let mut reply = TestReply::default();
        let result = listener.serve(head, NO_BODY, &mut reply, NativeConnection::detached()).await;

        assert!(matches!(result, Err(ServeError::BadRequest { .. })));
        assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
        assert!(reply.ended);
    }
}
