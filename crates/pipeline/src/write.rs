use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::io::AsyncWrite;
use futures::ready;

use crate::Transform;

pin_project_lite::pin_project! {
    /// Write-over-write adapter: lifts a [`Transform`] over a downstream
    /// `AsyncWrite`.
    ///
    /// Each write pushes bytes through the transform into a pending buffer,
    /// which is flushed to the downstream writer before the next push.
    /// Closing finishes the transform, drains its tail, and closes the
    /// downstream writer.
    pub struct TransformWriter<W> {
        #[pin]
        inner: W,
        transform: Box<dyn Transform>,
        pending: Vec<u8>,
        written: usize,
        finished: bool,
    }
}

impl<W> TransformWriter<W> {
    pub fn new(inner: W, transform: Box<dyn Transform>) -> Self {
        TransformWriter {
            inner,
            transform,
            pending: Vec::new(),
            written: 0,
            finished: false,
        }
    }

    /// Unwraps the downstream writer. Pending transform output not yet
    /// flushed (i.e. before `close` completed) is lost.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite> TransformWriter<W> {
    /// Drive the pending buffer into the downstream writer.
    fn poll_drain(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        while *this.written < this.pending.len() {
            let n = ready!(this
                .inner
                .as_mut()
                .poll_write(cx, &this.pending[*this.written..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            *this.written += n;
        }
        this.pending.clear();
        *this.written = 0;
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite> AsyncWrite for TransformWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        ready!(self.as_mut().poll_drain(cx))?;
        let this = self.project();
        this.transform.push(buf, this.pending)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_drain(cx))?;
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_drain(cx))?;
        if !*self.as_mut().project().finished {
            let this = self.as_mut().project();
            this.transform.finish(this.pending)?;
            *this.finished = true;
            ready!(self.as_mut().poll_drain(cx))?;
        }
        self.project().inner.poll_close(cx)
    }
}
