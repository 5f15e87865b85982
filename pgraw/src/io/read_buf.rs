use bytes::{Buf, BytesMut};
use std::{
    io,
    task::{Context, Poll},
};

use crate::Result;

#[cfg(feature = "tokio")]
const DEFAULT_READ_CAPACITY: usize = 1024;

/// Buffer between the inbound transport stream and the frame parser.
///
/// Bytes a caller has consumed via [`advance`][1] are not handed back to the
/// allocator immediately. They are released in one batch on the next refill,
/// so committing many small frames does not pay a release-then-reacquire
/// round trip per frame, while outstanding memory stays bounded by roughly
/// the largest in-flight frame.
///
/// [1]: ReadBuffer::advance
#[derive(Debug)]
pub struct ReadBuffer {
    buf: BytesMut,
    /// consumed by the caller, not yet released
    pos: usize,
}

impl ReadBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), pos: 0 }
    }

    /// Unconsumed buffered bytes.
    pub fn window(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Number of unconsumed buffered bytes.
    pub fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Commit `min` bytes as consumed.
    ///
    /// The bytes stay addressable through previously obtained windows until
    /// the next refill.
    ///
    /// # Panics
    ///
    /// Panics when advancing past the buffered data.
    pub fn advance(&mut self, n: usize) {
        assert!(
            self.pos + n <= self.buf.len(),
            "advanced past the buffered data",
        );
        self.pos += n;
    }

    /// Commit `n` bytes as consumed and return exactly that span.
    pub(crate) fn take(&mut self, n: usize) -> &[u8] {
        let start = self.pos;
        self.advance(n);
        &self.buf[start..self.pos]
    }

    /// Returns a window of at least `min` unconsumed bytes, without io.
    ///
    /// On miss, the consumed prefix is released back to the allocator so the
    /// next refill can reuse it, and `None` is returned.
    pub fn try_read(&mut self, min: usize) -> Option<&[u8]> {
        if self.available() >= min {
            return Some(&self.buf[self.pos..]);
        }
        self.release();
        None
    }

    /// Hand the consumed prefix back.
    fn release(&mut self) {
        if self.pos > 0 {
            self.buf.advance(self.pos);
            self.pos = 0;
        }
    }

    /// Read from the transport once.
    ///
    /// Releases the consumed prefix first, then reserves enough room for the
    /// `min` unmet bytes before a single `poll_read`.
    #[cfg(feature = "tokio")]
    pub fn poll_fill<R>(
        &mut self,
        io: &mut R,
        min: usize,
        cx: &mut Context,
    ) -> Poll<io::Result<usize>>
    where
        R: tokio::io::AsyncRead + Unpin + ?Sized,
    {
        self.release();
        let unmet = min.saturating_sub(self.buf.len());
        self.buf.reserve(unmet.max(DEFAULT_READ_CAPACITY));
        super::poll::poll_read(io, &mut self.buf, cx)
    }

    #[cfg(not(feature = "tokio"))]
    pub fn poll_fill<R>(
        &mut self,
        io: &mut R,
        min: usize,
        cx: &mut Context,
    ) -> Poll<io::Result<usize>> {
        let _ = (io, min, cx);
        panic!("runtime disabled")
    }

    /// Suspend until at least `min` unconsumed bytes are buffered.
    ///
    /// Fails with [`ConnectionClosed`] when the transport reaches
    /// end-of-stream first. Dropping the future aborts the wait; buffered
    /// state stays valid, no partial frame is ever exposed.
    #[cfg(feature = "tokio")]
    pub async fn wait_for_data<R>(&mut self, io: &mut R, min: usize) -> Result<()>
    where
        R: tokio::io::AsyncRead + Unpin + ?Sized,
    {
        use crate::error::ConnectionClosed;

        while self.available() < min {
            let n = std::future::poll_fn(|cx| self.poll_fill(io, min, cx)).await?;
            if n == 0 {
                return Err(ConnectionClosed.into());
            }
        }
        Ok(())
    }

    #[cfg(not(feature = "tokio"))]
    pub async fn wait_for_data<R>(&mut self, io: &mut R, min: usize) -> Result<()> {
        let _ = (io, min);
        panic!("runtime disabled")
    }

    #[cfg(test)]
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn lazy_release() {
        let mut buf = ReadBuffer::with_capacity(64);
        buf.feed(b"0123456789");

        assert_eq!(buf.try_read(5), Some(&b"0123456789"[..]));

        // committed bytes stay addressable until the next refill
        buf.advance(4);
        assert_eq!(buf.available(), 6);
        assert_eq!(buf.take(2), b"45");
        assert_eq!(buf.window(), b"6789");

        // miss releases the consumed prefix
        assert_eq!(buf.try_read(100), None);
        assert_eq!(buf.window(), b"6789");

        buf.feed(b"ab");
        assert_eq!(buf.try_read(6), Some(&b"6789ab"[..]));
    }

    #[tokio::test]
    async fn eof_is_connection_closed() {
        let (mut rx, tx) = tokio::io::duplex(64);
        drop(tx);

        let mut buf = ReadBuffer::with_capacity(64);
        let err = buf.wait_for_data(&mut rx, 5).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed(_)));
    }

    #[tokio::test]
    async fn waits_across_partial_deliveries() {
        let (mut rx, mut tx) = tokio::io::duplex(64);

        let write = async {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"01").await.unwrap();
            tx.flush().await.unwrap();
            tokio::task::yield_now().await;
            tx.write_all(b"23456").await.unwrap();
            tx.flush().await.unwrap();
        };

        let mut buf = ReadBuffer::with_capacity(64);
        let (read, ()) = tokio::join!(buf.wait_for_data(&mut rx, 7), write);
        read.unwrap();
        assert_eq!(buf.window(), b"0123456");
    }
}
