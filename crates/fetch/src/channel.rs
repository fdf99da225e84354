//! Push↔pull bridge between a native byte source and a [`ByteStream`].
//!
//! The bridge is a bounded queue with two independent demand signals: the
//! producer is ready while the queue is below its high-water mark (an
//! in-flight [`ByteSink::send`] suspending *is* the native pause control),
//! and the consumer signals demand by polling the stream. Chunks pass
//! through without copying and arrive in exactly the order they were sent.
//!
//! End of stream is explicit: a producer that goes away without calling
//! [`ByteSink::close`] surfaces as a truncation error on the consumer side,
//! never as a silent clean end.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use tracing::debug;

use crate::error::BodyError;
use crate::stream::{ByteStream, ChunkResult};

/// Frame carried through the bridge queue.
#[derive(Debug)]
enum QueueItem {
    Chunk(Bytes),
    End,
}

/// Creates a bridge with the given high-water mark (in chunks).
///
/// Returns the producer half and the pull stream the consumer reads.
pub fn byte_channel(high_water_mark: usize) -> (ByteSink, ByteStream) {
    let (tx, rx) = mpsc::channel::<Result<QueueItem, BodyError>>(high_water_mark);
    let sink = ByteSink { tx: Some(tx) };
    let stream = ByteStream::wrap(ChannelStream { rx, terminated: false });
    (sink, stream)
}

/// Producer half of the bridge.
///
/// Dropping the sink without [`close`](ByteSink::close) marks the stream as
/// truncated.
#[derive(Debug)]
pub struct ByteSink {
    tx: Option<mpsc::Sender<Result<QueueItem, BodyError>>>,
}

impl ByteSink {
    /// Enqueues one chunk, suspending while the queue is full.
    ///
    /// An error means the consumer released the stream; the producer should
    /// stop delivering and tear down (or drain) its source.
    pub async fn send(&mut self, chunk: Bytes) -> Result<(), BodyError> {
        let Some(tx) = self.tx.as_mut() else {
            return Err(BodyError::channel("sink is already closed"));
        };
        tx.send(Ok(QueueItem::Chunk(chunk))).await.map_err(|_| BodyError::channel("body consumer released the stream"))
    }

    /// True once the consumer side is gone and sends can no longer succeed.
    pub fn consumer_gone(&self) -> bool {
        self.tx.as_ref().is_none_or(mpsc::Sender::is_closed)
    }

    /// Terminates the stream with an error, best effort: a consumer that
    /// already left does not need to hear about it.
    pub async fn fail(mut self, error: BodyError) {
        if let Some(mut tx) = self.tx.take() {
            if tx.send(Err(error)).await.is_err() {
                debug!("body consumer left before the failure could be delivered");
            }
        }
    }

    /// Marks a clean end of stream.
    pub async fn close(mut self) -> Result<(), BodyError> {
        match self.tx.take() {
            Some(mut tx) => {
                tx.send(Ok(QueueItem::End)).await.map_err(|_| BodyError::channel("body consumer released the stream"))
            }
            None => Ok(()),
        }
    }
}

/// Consumer half; wrapped into a [`ByteStream`] by [`byte_channel`].
struct ChannelStream {
    rx: mpsc::Receiver<Result<QueueItem, BodyError>>,
    terminated: bool,
}

impl Stream for ChannelStream {
    type Item = ChunkResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        match ready!(this.rx.poll_next_unpin(cx)) {
            Some(Ok(QueueItem::Chunk(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Some(Ok(QueueItem::End)) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                this.terminated = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.terminated = true;
                Poll::Ready(Some(Err(BodyError::channel("body producer went away before end of stream"))))
            }
        }
    }
}
