use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::io::AsyncRead;
use futures::ready;

use crate::{Transform, CHUNK_SIZE};

pin_project_lite::pin_project! {
    /// Read-over-read adapter: lifts a [`Transform`] over an upstream
    /// `AsyncRead`.
    ///
    /// Each time the output buffer runs dry, one chunk (at most
    /// [`CHUNK_SIZE`] bytes) is pulled from upstream and pushed through the
    /// transform; upstream EOF finishes the transform exactly once and the
    /// buffered tail then drains to the caller. The scratch chunk is
    /// allocated once and reused.
    pub struct TransformReader<R> {
        #[pin]
        inner: R,
        transform: Box<dyn Transform>,
        scratch: Box<[u8]>,
        out: Vec<u8>,
        pos: usize,
        finished: bool,
    }
}

impl<R> TransformReader<R> {
    pub fn new(inner: R, transform: Box<dyn Transform>) -> Self {
        TransformReader {
            inner,
            transform,
            scratch: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            out: Vec::new(),
            pos: 0,
            finished: false,
        }
    }
}

impl<R: AsyncRead> AsyncRead for TransformReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();

        loop {
            // Serve buffered output first.
            if *this.pos < this.out.len() {
                let n = buf.len().min(this.out.len() - *this.pos);
                buf[..n].copy_from_slice(&this.out[*this.pos..*this.pos + n]);
                *this.pos += n;
                if *this.pos == this.out.len() {
                    this.out.clear();
                    *this.pos = 0;
                }
                return Poll::Ready(Ok(n));
            }
            if *this.finished {
                return Poll::Ready(Ok(0));
            }

            let n = ready!(this.inner.as_mut().poll_read(cx, &mut this.scratch[..]))?;
            if n == 0 {
                this.transform.finish(this.out)?;
                *this.finished = true;
            } else {
                this.transform.push(&this.scratch[..n], this.out)?;
            }
            // The transform may be buffering (an encryptor mid-frame); loop
            // until it yields output or upstream is exhausted.
        }
    }
}
