//! Id-table chunk stream abstractions and channel adapters.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::Stream;
use quiver_common::Result;

use crate::id_table::IdTable;

/// A stream of [`IdTable`] chunks that also knows its column count.
pub trait IdTableStream: Stream<Item = Result<IdTable>> + Send {
    /// Column count of every chunk yielded by this stream.
    fn width(&self) -> usize;
}

/// The standard "stream you can return from operators".
pub type SendableIdTableStream = Pin<Box<dyn IdTableStream>>;

/// Adapter that attaches a column count to any `Stream<Item = Result<IdTable>>`.
pub struct StreamAdapter<S> {
    width: usize,
    inner: S,
}

impl<S> StreamAdapter<S> {
    /// Create a new width-attached stream adapter.
    pub fn new(width: usize, inner: S) -> Self {
        Self { width, inner }
    }
}

impl<S> IdTableStream for StreamAdapter<S>
where
    S: Stream<Item = Result<IdTable>> + Send + Unpin + 'static,
{
    fn width(&self) -> usize {
        self.width
    }
}

impl<S> Stream for StreamAdapter<S>
where
    S: Stream<Item = Result<IdTable>> + Unpin,
{
    type Item = Result<IdTable>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Create an empty stream (useful for stubs or early returns).
pub fn empty_stream(width: usize) -> SendableIdTableStream {
    let inner = futures::stream::empty::<Result<IdTable>>();
    Box::pin(StreamAdapter::new(width, inner))
}

/// Create a stream over already-computed chunks.
pub fn table_stream(width: usize, tables: Vec<IdTable>) -> SendableIdTableStream {
    let inner = futures::stream::iter(tables.into_iter().map(Ok));
    Box::pin(StreamAdapter::new(width, inner))
}

/// Create a stream backed by a bounded channel.
///
/// Backpressure: when the receiver is slow and the buffer fills up,
/// `sender.send(..).await` will wait until there is capacity again.
pub fn bounded_table_channel(
    width: usize,
    capacity: usize,
) -> (ChunkSender, SendableIdTableStream) {
    let (tx, rx) = mpsc::channel::<Result<IdTable>>(capacity);
    let stream = Box::pin(StreamAdapter::new(width, rx));
    (ChunkSender { tx }, stream)
}

/// Sender side for [`bounded_table_channel`].
#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<Result<IdTable>>,
}

impl ChunkSender {
    /// Send a chunk (awaits if the channel buffer is full).
    pub async fn send_table(&mut self, table: IdTable) -> Result<()> {
        use futures::SinkExt;
        self.tx.send(Ok(table)).await.map_err(|e| {
            quiver_common::QuiverError::ProducerFailed(format!("chunk channel closed: {e}"))
        })
    }

    /// Send an error and terminate downstream consumption.
    pub async fn send_error(&mut self, err: quiver_common::QuiverError) -> Result<()> {
        use futures::SinkExt;
        self.tx.send(Err(err)).await.map_err(|e| {
            quiver_common::QuiverError::ProducerFailed(format!("chunk channel closed: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use quiver_common::{Id, QuiverError};

    #[test]
    fn bounded_channel_delivers_chunks_then_the_error() {
        let (mut tx, mut rx) = bounded_table_channel(1, 4);
        let mut chunk = IdTable::new(1);
        chunk.push_row(&[Id(7)]);

        futures::executor::block_on(async {
            tx.send_table(chunk.clone()).await.expect("send chunk");
            tx.send_error(QuiverError::ProducerFailed("boom".to_string()))
                .await
                .expect("send error");
            drop(tx);

            assert_eq!(rx.width(), 1);
            let first = rx.next().await.expect("first item").expect("chunk");
            assert_eq!(first, chunk);
            assert!(matches!(
                rx.next().await,
                Some(Err(QuiverError::ProducerFailed(_)))
            ));
            assert!(rx.next().await.is_none());
        });
    }

    #[test]
    fn empty_stream_knows_its_width() {
        let mut stream = empty_stream(3);
        assert_eq!(stream.width(), 3);
        assert!(futures::executor::block_on(stream.next()).is_none());
    }
}
