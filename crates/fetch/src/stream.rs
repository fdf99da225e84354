//! Lazy pull-based byte streams.
//!
//! [`ByteStream`] is the fetch-shaped side of the body bridge: a finite (unless
//! the source is open ended) sequence of [`Bytes`] chunks that is pulled, not
//! pushed. It is a composition over a boxed [`futures::Stream`] with a small
//! capability set (read, cancel, pipe, tee) rather than an inheritance from
//! either stream family.
//!
//! Chunks are delivered in exactly the order the source produced them; the
//! only buffering introduced anywhere is the lag window between the two
//! branches of a [`tee`](ByteStream::tee).

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker, ready};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use http_body::{Body as HttpBody, Frame};
use http_body_util::StreamBody;

use crate::abort::{AbortReason, AbortSignal};
use crate::error::{AbortError, BodyError, NativeTransportError};

/// Item yielded by a [`ByteStream`].
pub type ChunkResult = Result<Bytes, BodyError>;

type CancelHook = Box<dyn FnOnce(AbortReason) + Send>;

/// A lazy, pull-based stream of byte chunks.
///
/// Not restartable: once exhausted, further reads yield end-of-stream. The
/// single-read discipline (reading twice is an error) is enforced one layer
/// up by [`Body`](crate::Body), which hands the stream out at most once.
pub struct ByteStream {
    inner: BoxStream<'static, ChunkResult>,
    cancel_hook: Option<CancelHook>,
}

impl ByteStream {
    /// A stream that ends immediately.
    pub fn empty() -> Self {
        Self::wrap(stream::empty())
    }

    /// A stream yielding a single chunk.
    pub fn once(chunk: Bytes) -> Self {
        Self::wrap(stream::iter([Ok(chunk)]))
    }

    /// A stream yielding each chunk in order.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::wrap(stream::iter(chunks.into_iter().map(|chunk| Ok(chunk.into()))))
    }

    /// Wraps an arbitrary chunk stream.
    pub fn wrap<S>(stream: S) -> Self
    where
        S: Stream<Item = ChunkResult> + Send + 'static,
    {
        Self { inner: stream.boxed(), cancel_hook: None }
    }

    /// Wraps a chunk stream together with a teardown hook that runs when the
    /// consumer cancels, so the native source behind the stream can be
    /// destroyed rather than left dangling.
    pub fn wrap_with_cancel<S, F>(stream: S, hook: F) -> Self
    where
        S: Stream<Item = ChunkResult> + Send + 'static,
        F: FnOnce(AbortReason) + Send + 'static,
    {
        Self { inner: stream.boxed(), cancel_hook: Some(Box::new(hook)) }
    }

    /// Adapts a Rust-native [`http_body::Body`] into a pull stream,
    /// discarding trailer frames.
    pub fn from_http_body<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: fmt::Display,
    {
        Self::wrap(FrameStream { body })
    }

    /// Converts into a Rust-native [`http_body::Body`].
    pub fn into_http_body(self) -> impl HttpBody<Data = Bytes, Error = BodyError> + Send + 'static {
        StreamBody::new(self.map(|result| result.map(Frame::data)))
    }

    /// Pulls the next chunk.
    pub async fn read(&mut self) -> Option<ChunkResult> {
        self.next().await
    }

    /// Cancels the stream: runs the teardown hook (if any) and drops the
    /// source without draining it.
    pub fn cancel(mut self, reason: AbortReason) {
        if let Some(hook) = self.cancel_hook.take() {
            hook(reason);
        }
    }

    /// Couples the stream to an abort signal.
    ///
    /// A pending pull unblocks as soon as the signal transitions, yielding
    /// `Err(BodyError::Aborted)` and dropping the source, rather than waiting
    /// for the next chunk to arrive.
    pub fn abort_on(self, signal: &AbortSignal) -> Self {
        struct State {
            inner: Option<BoxStream<'static, ChunkResult>>,
            signal: AbortSignal,
        }

        let Self { inner, cancel_hook } = self;
        let state = State { inner: Some(inner), signal: signal.clone() };

        let stream = stream::unfold(state, |mut state| async move {
            let mut inner = state.inner.take()?;
            if let Some(err) = state.signal.abort_error() {
                return Some((Err(BodyError::Aborted(err)), state));
            }
            tokio::select! {
                biased;
                () = state.signal.cancelled() => {
                    let err = state.signal.abort_error().unwrap_or_else(|| AbortError::new(AbortReason::Explicit(None)));
                    Some((Err(BodyError::Aborted(err)), state))
                }
                item = inner.next() => match item {
                    Some(item) => {
                        state.inner = Some(inner);
                        Some((item, state))
                    }
                    None => None,
                }
            }
        });

        Self { inner: stream.boxed(), cancel_hook }
    }

    /// Splits into two streams that each observe the full chunk sequence.
    ///
    /// Only the lag between the two readers is buffered; a dropped branch
    /// stops buffering entirely. The teardown hook moves into the shared
    /// source, which is released once both branches are gone.
    pub fn tee(self) -> (ByteStream, ByteStream) {
        let shared = Arc::new(Mutex::new(TeeShared {
            source: self,
            queues: [VecDeque::new(), VecDeque::new()],
            live: [true, true],
            done: false,
            wakers: [None, None],
        }));

        let first = ByteStream::wrap(TeeBranch { shared: Arc::clone(&shared), index: 0 });
        let second = ByteStream::wrap(TeeBranch { shared, index: 1 });
        (first, second)
    }

    /// Drains into a sink, suspending whenever the sink exerts backpressure.
    pub async fn pipe_to<Si>(mut self, sink: &mut Si) -> Result<(), BodyError>
    where
        Si: Sink<Bytes> + Unpin,
        Si::Error: fmt::Display,
    {
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            sink.send(chunk).await.map_err(|e| BodyError::channel(format!("sink rejected chunk: {e}")))?;
        }
        sink.flush().await.map_err(|e| BodyError::channel(format!("sink flush failed: {e}")))
    }

    /// Collects the remaining chunks into one contiguous buffer.
    pub async fn collect_bytes(mut self) -> Result<Bytes, BodyError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ByteStream {
    type Item = ChunkResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

impl From<Bytes> for ByteStream {
    fn from(bytes: Bytes) -> Self {
        Self::once(bytes)
    }
}

/// Shared side of a tee. The source is polled by whichever branch reads
/// ahead; every produced item is mirrored into the other live branch's
/// queue.
struct TeeShared {
    source: ByteStream,
    queues: [VecDeque<ChunkResult>; 2],
    live: [bool; 2],
    done: bool,
    wakers: [Option<Waker>; 2],
}

struct TeeBranch {
    shared: Arc<Mutex<TeeShared>>,
    index: usize,
}

impl Stream for TeeBranch {
    type Item = ChunkResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let other = 1 - this.index;
        let mut shared = this.shared.lock().unwrap();

        if let Some(item) = shared.queues[this.index].pop_front() {
            return Poll::Ready(Some(item));
        }
        if shared.done {
            return Poll::Ready(None);
        }

        match shared.source.poll_next_unpin(cx) {
            Poll::Ready(Some(item)) => {
                if shared.live[other] {
                    shared.queues[other].push_back(item.clone());
                    if let Some(waker) = shared.wakers[other].take() {
                        waker.wake();
                    }
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                shared.done = true;
                if let Some(waker) = shared.wakers[other].take() {
                    waker.wake();
                }
                Poll::Ready(None)
            }
            Poll::Pending => {
                shared.wakers[this.index] = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for TeeBranch {
    fn drop(&mut self) {
        let mut shared = self.shared.lock().unwrap();
        shared.live[self.index] = false;
        shared.queues[self.index].clear();
    }
}

pin_project_lite::pin_project! {
    /// Pull adapter over a Rust-native `http_body::Body`, yielding only data
    /// frames.
    struct FrameStream<B> {
        #[pin]
        body: B,
    }
}

impl<B> Stream for FrameStream<B>
where
    B: HttpBody<Data = Bytes>,
    B::Error: fmt::Display,
{
    type Item = ChunkResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            return match ready!(this.body.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => Poll::Ready(Some(Ok(data))),
                    // trailers are not part of the fetch body surface
                    Err(_frame) => continue,
                },
                Some(Err(e)) => Poll::Ready(Some(Err(NativeTransportError::protocol(e.to_string()).into()))),
                None => Poll::Ready(None),
            };
        }
    }
}
