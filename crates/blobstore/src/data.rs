use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::Metadata;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A chunked byte stream with an optional release hook.
///
/// The hook fires exactly once when the stream is dropped, whether or not it
/// was fully consumed — backends use it to relinquish read handles or leases
/// tied to the open object.
pub struct DataStream {
    inner: ByteStream,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DataStream {
    pub fn new(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Self {
        DataStream {
            inner: stream.boxed(),
            release: None,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::new(futures::stream::iter(if bytes.is_empty() {
            None
        } else {
            Some(Ok(bytes))
        }))
    }

    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// Attach a release hook, chaining after any hook already present.
    pub fn with_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = match self.release.take() {
            None => Some(Box::new(hook)),
            Some(prior) => Some(Box::new(move || {
                prior();
                hook();
            })),
        };
        self
    }

    /// Drain the stream into a single contiguous buffer.
    pub async fn read_to_bytes(mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for DataStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for DataStream {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl fmt::Debug for DataStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStream")
            .field("release", &self.release.is_some())
            .finish_non_exhaustive()
    }
}

/// A loaded payload stream paired with its stored metadata.
#[derive(Debug)]
pub struct DataWithMetadata {
    pub data: DataStream,
    pub metadata: Metadata,
}
