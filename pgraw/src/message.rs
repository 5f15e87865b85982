//! Peek-batch-then-commit access to buffered backend messages.
use std::ops::Range;

use crate::{
    frame::{BackendCode, Frame, FrameReader, HEADER_LEN},
    io::ReadBuffer,
    postgres::ProtocolError,
};

/// Cursor over the backend messages a connection has already buffered.
///
/// Obtained from [`Connection::try_message_reader`][1]: walk as many
/// complete frames as are buffered without any io, then [`commit`][2] the
/// walked bytes back to the read buffer, exactly once. The commit is
/// enforced by ownership: `commit` consumes the reader, and dropping the
/// reader without committing consumes nothing, so a peek can always be
/// retried after more bytes arrive.
///
/// [1]: crate::Connection::try_message_reader
/// [2]: MessageReader::commit
#[derive(Debug)]
pub struct MessageReader<'c> {
    buf: &'c mut ReadBuffer,
    consumed: usize,
    current: Option<(BackendCode, Range<usize>)>,
}

impl<'c> MessageReader<'c> {
    pub(crate) fn new(buf: &'c mut ReadBuffer) -> Self {
        Self { buf, consumed: 0, current: None }
    }

    /// Advance past the next frame when it is completely buffered.
    ///
    /// Returns `false` when the remaining bytes hold no complete frame; the
    /// cursor is left untouched and the caller resumes with
    /// [`Connection::wait_message`][crate::Connection::wait_message].
    pub fn move_next(&mut self) -> Result<bool, ProtocolError> {
        let window = &self.buf.window()[self.consumed..];
        let mut frames = FrameReader::new(window);
        if !frames.move_next()? {
            self.current = None;
            return Ok(false);
        }

        let frame = frames.current().expect("move_next returned true");
        let total = frame.total_len();
        self.current = Some((frame.code, self.consumed + HEADER_LEN..self.consumed + total));
        self.consumed += total;
        Ok(true)
    }

    /// The frame [`move_next`][MessageReader::move_next] last advanced past.
    pub fn current(&self) -> Option<Frame<'_>> {
        let (code, body) = self.current.clone()?;
        Some(Frame { code, body: &self.buf.window()[body] })
    }

    /// Bytes the cursor advanced past; what [`commit`][MessageReader::commit]
    /// will consume.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Commit every walked frame back to the read buffer.
    pub fn commit(self) {
        self.buf.advance(self.consumed);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn msg(code: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![code];
        out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn walks_buffered_frames_then_commits_once() {
        let mut buf = ReadBuffer::with_capacity(64);
        let mut wire = msg(b'1', b"");
        wire.extend(msg(b'2', b""));
        let complete = wire.len();
        wire.extend_from_slice(b"D\0\0");
        buf.feed(&wire);

        let mut messages = MessageReader::new(&mut buf);
        assert!(messages.move_next().unwrap());
        assert_eq!(messages.current().unwrap().code, BackendCode::ParseComplete);
        assert!(messages.move_next().unwrap());
        assert_eq!(messages.current().unwrap().code, BackendCode::BindComplete);
        assert!(!messages.move_next().unwrap());
        assert_eq!(messages.consumed(), complete);
        messages.commit();

        // only the partial header bytes remain
        assert_eq!(buf.window(), b"D\0\0");
    }

    #[test]
    fn dropping_without_commit_consumes_nothing() {
        let mut buf = ReadBuffer::with_capacity(64);
        buf.feed(&msg(b'Z', b"I"));

        let mut messages = MessageReader::new(&mut buf);
        assert!(messages.move_next().unwrap());
        drop(messages);
        assert_eq!(buf.available(), 6);

        // the same frames parse again on the next peek
        let mut messages = MessageReader::new(&mut buf);
        assert!(messages.move_next().unwrap());
        assert_eq!(messages.current().unwrap().code, BackendCode::ReadyForQuery);
        assert_eq!(messages.current().unwrap().body, b"I");
        messages.commit();
        assert_eq!(buf.available(), 0);
    }
}
