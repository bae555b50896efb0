//! Bounded byte-stream tee: one producer, two independent consumers, each
//! backpressured so neither sink can force unbounded buffering of the
//! source body (SPEC_FULL.md §9's "stream tee for parallel consumers").
//!
//! Grounded on the teacher's preference for `tokio::sync` primitives
//! (`parking_lot`/`dashmap` elsewhere); here the natural async-aware
//! analogue of a broadcast ring is a bounded `tokio::sync::mpsc` channel per
//! consumer, fed by a single pump task that only advances once both
//! channels have capacity.

use bytes::Bytes;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Channel depth per consumer. Each slot holds one chunk as handed to us by
/// the source stream (typically an S3 SDK default chunk size), so this caps
/// in-flight memory at a small multiple of one chunk per sink.
const TEE_CHANNEL_DEPTH: usize = 4;

/// The receiving half of a tee. Yields `Ok(chunk)` until the source is
/// exhausted, or `Err` if the pump observed a source read error (reported
/// once, to both receivers).
pub struct TeeReceiver {
    rx: mpsc::Receiver<Result<Bytes, TeeError>>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("source stream error: {0}")]
pub struct TeeError(pub String);

impl TeeReceiver {
    pub async fn recv(&mut self) -> Option<Result<Bytes, TeeError>> {
        self.rx.recv().await
    }
}

impl futures::Stream for TeeReceiver {
    type Item = Result<Bytes, TeeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl From<TeeError> for std::io::Error {
    fn from(e: TeeError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e.0)
    }
}

/// Splits a fallible chunk stream into two independently-paced receivers.
/// Call `drive` to run the pump; it completes once the source stream ends
/// or both receivers have been dropped.
pub struct ByteTee {
    a_tx: mpsc::Sender<Result<Bytes, TeeError>>,
    b_tx: mpsc::Sender<Result<Bytes, TeeError>>,
}

impl ByteTee {
    pub fn new() -> (Self, TeeReceiver, TeeReceiver) {
        let (a_tx, a_rx) = mpsc::channel(TEE_CHANNEL_DEPTH);
        let (b_tx, b_rx) = mpsc::channel(TEE_CHANNEL_DEPTH);
        (
            Self { a_tx, b_tx },
            TeeReceiver { rx: a_rx },
            TeeReceiver { rx: b_rx },
        )
    }

    /// Pumps a source stream to both sinks. `source` is awaited item by
    /// item so the tee applies backpressure transparently: this pump
    /// itself is driven by whichever caller polls it, and each `send`
    /// below blocks until both channels have room.
    pub async fn drive<S>(self, mut source: S)
    where
        S: futures::Stream<Item = Result<Bytes, TeeError>> + Unpin,
    {
        use futures::StreamExt;
        while let Some(item) = source.next().await {
            let a_send = self.a_tx.send(item.clone());
            let b_send = self.b_tx.send(item);
            let (a_res, b_res) = tokio::join!(a_send, b_send);
            if a_res.is_err() && b_res.is_err() {
                // Both consumers gone; nothing left to pump for.
                return;
            }
        }
    }
}
