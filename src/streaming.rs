//! Bridge between a generation task pushing text fragments and an HTTP body
//! pulling bytes.
//!
//! The queue is unbounded: a slow client lets memory grow with the length of
//! the generated answer. Dropping the [`FragmentStream`] (client went away)
//! makes every later [`FragmentSink::send`] return `false`, which is how the
//! producer learns it should stop.

use axum::body::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Creates a connected sink/stream pair.
pub fn fragment_channel() -> (FragmentSink, FragmentStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        FragmentSink { tx },
        FragmentStream {
            rx,
            pending: Bytes::new(),
        },
    )
}

/// Producer half, handed to the generation backend.
#[derive(Clone, Debug)]
pub struct FragmentSink {
    tx: mpsc::UnboundedSender<String>,
}

impl FragmentSink {
    /// Queues a fragment. Returns `false` once the consumer is gone.
    pub fn send(&self, fragment: impl Into<String>) -> bool {
        self.tx.send(fragment.into()).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half. Yields fragments in FIFO order, either whole (as a
/// [`Stream`] of bytes for response bodies) or cut to the caller's buffer size
/// (as an [`AsyncRead`]).
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::UnboundedReceiver<String>,
    pending: Bytes,
}

impl FragmentStream {
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Poll::Ready(Some(std::mem::take(&mut self.pending)));
        }

        loop {
            match ready!(self.rx.poll_recv(cx)) {
                Some(fragment) if fragment.is_empty() => continue,
                Some(fragment) => return Poll::Ready(Some(Bytes::from(fragment))),
                None => return Poll::Ready(None),
            }
        }
    }
}

impl Stream for FragmentStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_chunk(cx).map(|chunk| chunk.map(Ok))
    }
}

impl AsyncRead for FragmentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        match ready!(this.poll_chunk(cx)) {
            // Nothing written means end of stream.
            None => Poll::Ready(Ok(())),
            Some(mut chunk) => {
                let take = chunk.len().min(buf.remaining());
                let head = chunk.split_to(take);
                buf.put_slice(&head);
                this.pending = chunk;
                Poll::Ready(Ok(()))
            }
        }
    }
}
