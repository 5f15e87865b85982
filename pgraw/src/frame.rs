//! Zero-copy parsing of backend frames out of a byte window.
use std::fmt;

use crate::postgres::ProtocolError;

/// Bytes a frame header occupies: 1 code byte + 4 length bytes.
pub const HEADER_LEN: usize = 5;

/// Sane upper bound on the total on-wire size of one backend frame.
///
/// A header declaring a frame at or beyond this bound is rejected as a
/// protocol violation instead of buffered.
pub const MAX_FRAME_LEN: usize = 8192;

macro_rules! backend_code {
    ($(
        $(#[$doc:meta])* $name:ident = $code:literal,
    )*) => {
        /// Message code of every recognized backend message.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum BackendCode {
            $($(#[$doc])* $name = $code,)*
        }

        impl BackendCode {
            /// Translate a wire code, rejecting anything unrecognized.
            pub fn from_u8(code: u8) -> Result<Self, ProtocolError> {
                match code {
                    $($code => Ok(Self::$name),)*
                    _ => Err(ProtocolError::unknown(code)),
                }
            }

            /// Message name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)*
                }
            }
        }
    };
}

backend_code! {
    Authentication = b'R',
    BackendKeyData = b'K',
    BindComplete = b'2',
    CloseComplete = b'3',
    CommandComplete = b'C',
    CopyData = b'd',
    CopyDone = b'c',
    CopyBothResponse = b'W',
    CopyInResponse = b'G',
    CopyOutResponse = b'H',
    DataRow = b'D',
    EmptyQueryResponse = b'I',
    ErrorResponse = b'E',
    FunctionCall = b'F',
    FunctionCallResponse = b'V',
    NoData = b'n',
    NoticeResponse = b'N',
    NotificationResponse = b'A',
    ParameterDescription = b't',
    ParameterStatus = b'S',
    ParseComplete = b'1',
    PortalSuspended = b's',
    ReadyForQuery = b'Z',
    RowDescription = b'T',
}

impl fmt::Display for BackendCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One complete backend message borrowed from a byte window.
///
/// The body is only valid while the window is; anything that must outlive
/// the window has to be copied out before the buffer is advanced.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub code: BackendCode,
    /// Payload bytes, header excluded.
    pub body: &'a [u8],
}

impl Frame<'_> {
    /// Bytes the frame occupies on the wire.
    ///
    /// The wire's length field counts itself and the payload but not the
    /// code byte, so this is the declared length plus one.
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }
}

/// Walks complete frames out of a byte window, without io.
///
/// The cursor never advances past a partial frame: [`move_next`][1] either
/// consumes a whole frame or leaves the reader untouched. Constructing a new
/// reader over the same window region as more bytes arrive is cheap, nothing
/// is allocated.
///
/// [1]: FrameReader::move_next
#[derive(Debug)]
pub struct FrameReader<'a> {
    window: &'a [u8],
    offset: usize,
    current: Option<Frame<'a>>,
}

impl<'a> FrameReader<'a> {
    pub fn new(window: &'a [u8]) -> Self {
        Self { window, offset: 0, current: None }
    }

    /// Peek the next header without consuming.
    ///
    /// Returns `None` when fewer than [`HEADER_LEN`] bytes remain. On
    /// success returns the message code and the total on-wire frame length.
    pub fn try_parse_header(&self) -> Result<Option<(BackendCode, usize)>, ProtocolError> {
        let rest = &self.window[self.offset..];
        let Some(header) = rest.first_chunk::<HEADER_LEN>() else {
            return Ok(None);
        };

        let code = BackendCode::from_u8(header[0])?;
        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let total = length + 1;
        if !(HEADER_LEN..MAX_FRAME_LEN).contains(&total) {
            return Err(ProtocolError::frame_length(code, length));
        }

        Ok(Some((code, total)))
    }

    /// Advance past the next frame when it is completely in the window.
    ///
    /// Returns `false`, leaving the cursor untouched, when the header or any
    /// part of the frame is missing.
    pub fn move_next(&mut self) -> Result<bool, ProtocolError> {
        let Some((code, total)) = self.try_parse_header()? else {
            self.current = None;
            return Ok(false);
        };

        let rest = &self.window[self.offset..];
        if rest.len() < total {
            self.current = None;
            return Ok(false);
        }

        self.current = Some(Frame { code, body: &rest[HEADER_LEN..total] });
        self.offset += total;
        Ok(true)
    }

    /// The frame [`move_next`][FrameReader::move_next] last advanced past.
    pub fn current(&self) -> Option<Frame<'a>> {
        self.current
    }

    /// Bytes the cursor has advanced past within the window.
    ///
    /// This is what the owning buffer gets told to commit.
    pub fn consumed(&self) -> usize {
        self.offset
    }

    /// Bytes left in the window, complete or not.
    pub fn remaining(&self) -> usize {
        self.window.len() - self.offset
    }
}
