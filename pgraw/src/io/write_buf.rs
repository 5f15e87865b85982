use bytes::Buf;
use std::{
    fmt, io,
    marker::PhantomPinned,
    pin::Pin,
    task::{Context, Poll},
};

use crate::{
    ext::UsizeExt,
    postgres::frontend::{FrontendProtocol, Startup},
};

/// Scratch region where outbound frames accumulate before a single flush.
///
/// The region has fixed capacity. Writes that do not fit fail with
/// [`WriteOverflow`] and leave the region untouched; nothing is written
/// piecewise. Batching several frames before one [`flush`][1] is what turns
/// the five extended-query messages into a single network write.
///
/// [1]: WriteBuffer::flush
pub struct WriteBuffer {
    buf: Box<[u8]>,
    /// committed frame bytes
    pos: usize,
    /// already handed to the transport by an in-progress flush
    flushed: usize,
}

impl WriteBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: vec![0u8; capacity].into_boxed_slice(), pos: 0, flushed: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Space left for more frames.
    pub fn spare_capacity(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    /// The unwritten remainder of the region.
    ///
    /// Callers may build payload bytes in place here, then commit them with
    /// [`add_len`][WriteBuffer::add_len], avoiding an intermediate copy.
    pub fn unfilled(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..]
    }

    /// Commit `n` bytes written directly into [`unfilled`][WriteBuffer::unfilled].
    ///
    /// # Panics
    ///
    /// Panics when advancing past the region capacity.
    pub fn add_len(&mut self, n: usize) {
        assert!(self.pos + n <= self.buf.len(), "advanced past the region capacity");
        self.pos += n;
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, byte: u8) -> Result<(), WriteOverflow> {
        self.put_slice(&[byte])
    }

    /// Append a big-endian 32-bit integer.
    pub fn put_u32(&mut self, int: u32) -> Result<(), WriteOverflow> {
        self.put_slice(&int.to_be_bytes())
    }

    /// Append raw bytes.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<(), WriteOverflow> {
        let Some(dst) = self.buf.get_mut(self.pos..self.pos + bytes.len()) else {
            return Err(WriteOverflow { required: bytes.len(), spare: self.buf.len() - self.pos });
        };
        dst.copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Append one frontend message: code byte, big-endian length, body.
    pub fn write_msg<F: FrontendProtocol>(&mut self, msg: F) -> Result<(), WriteOverflow> {
        let body = msg.size_hint() as usize;
        let total = 1 + 4 + body;
        if total > self.spare_capacity() {
            return Err(WriteOverflow { required: total, spare: self.spare_capacity() });
        }

        use bytes::BufMut;
        let mut dst = &mut self.buf[self.pos..self.pos + total];
        dst.put_u8(F::MSGTYPE);
        dst.put_u32((4 + body).to_u32());
        msg.encode(&mut dst);
        assert!(dst.is_empty(), "frontend message body not equal to its size hint");

        self.pos += total;
        Ok(())
    }

    /// Append the startup message, which carries no code byte.
    pub fn write_startup(&mut self, msg: Startup) -> Result<(), WriteOverflow> {
        let total = msg.wire_len() as usize;
        if total > self.spare_capacity() {
            return Err(WriteOverflow { required: total, spare: self.spare_capacity() });
        }

        let mut dst = &mut self.buf[self.pos..self.pos + total];
        msg.encode(&mut dst);
        assert!(dst.is_empty(), "startup message body not equal to its size hint");

        self.pos += total;
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.pos = 0;
        self.flushed = 0;
    }

    /// Hand every committed byte to the transport, then reset the cursor.
    pub fn flush<'a, W>(&'a mut self, io: &'a mut W) -> Flush<'a, W> {
        Flush { io, buf: self, _pin: PhantomPinned }
    }
}

/// The unflushed region. `advance` tracks flush progress.
impl Buf for WriteBuffer {
    fn remaining(&self) -> usize {
        self.pos - self.flushed
    }

    fn chunk(&self) -> &[u8] {
        &self.buf[self.flushed..self.pos]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(self.flushed + cnt <= self.pos, "advanced past the committed data");
        self.flushed += cnt;
    }
}

impl fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("len", &self.pos)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

/// A committed batch did not fit the fixed write region.
pub struct WriteOverflow {
    required: usize,
    spare: usize,
}

impl std::error::Error for WriteOverflow { }

impl fmt::Display for WriteOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message of {} bytes exceeds write buffer space ({} left)",
            self.required, self.spare,
        )
    }
}

impl fmt::Debug for WriteOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

pin_project_lite::pin_project! {
    /// Future to write every committed byte to the transport.
    #[derive(Debug)]
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct Flush<'a, W> {
        io: &'a mut W,
        buf: &'a mut WriteBuffer,
        #[pin]
        _pin: PhantomPinned,
    }
}

#[cfg(feature = "tokio")]
impl<W> Future for Flush<'_, W>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        use std::task::ready;

        let me = self.project();
        ready!(super::poll::poll_write_all(&mut **me.io, &mut **me.buf, cx))?;
        ready!(Pin::new(&mut **me.io).poll_flush(cx))?;
        me.buf.reset();
        Poll::Ready(Ok(()))
    }
}

#[cfg(not(feature = "tokio"))]
impl<W> Future for Flush<'_, W> {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        panic!("runtime disabled")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::postgres::frontend;
    use bytes::Buf;

    #[test]
    fn direct_region_write() {
        let mut buf = WriteBuffer::with_capacity(16);
        buf.put_u8(b'Q').unwrap();
        buf.put_u32(9).unwrap();

        let n = {
            let region = buf.unfilled();
            region[..5].copy_from_slice(b"PING\0");
            5
        };
        buf.add_len(n);

        assert_eq!(buf.chunk(), b"Q\0\0\0\x09PING\0");
        assert!(buf.put_slice(&[0; 16]).is_err());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn overflow_leaves_region_untouched() {
        let mut buf = WriteBuffer::with_capacity(8);
        let err = buf.write_msg(frontend::Query { sql: "SELECT 1" }).unwrap_err();
        assert_eq!(err.required, 14);
        assert!(buf.is_empty());

        // Sync is 5 bytes and fits
        buf.write_msg(frontend::Sync).unwrap();
        assert_eq!(buf.len(), 5);
        buf.write_msg(frontend::Sync).unwrap_err();
        assert_eq!(buf.len(), 5);
    }

    #[tokio::test]
    async fn flush_writes_all_then_resets() {
        let (mut tx, mut rx) = tokio::io::duplex(64);

        let mut buf = WriteBuffer::with_capacity(64);
        buf.write_msg(frontend::Query { sql: "SELECT 1" }).unwrap();
        buf.flush(&mut tx).await.unwrap();
        assert!(buf.is_empty());

        use tokio::io::AsyncReadExt;
        let mut wire = vec![0u8; 14];
        rx.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire[0], b'Q');
        assert_eq!(&wire[1..5], &13u32.to_be_bytes());
        assert_eq!(&wire[5..], b"SELECT 1\0");
    }
}
