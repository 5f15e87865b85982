//! Protocol error
use std::fmt;

use crate::frame::BackendCode;

/// An error when translating buffer from postgres
pub enum ProtocolError {
    /// The wire carried a message code no backend message uses.
    UnknownCode {
        found: u8,
    },
    /// A declared frame length outside the sane bounds.
    FrameLength {
        code: BackendCode,
        length: usize,
    },
    /// A recognized message at a point the protocol does not allow it.
    Unexpected {
        expect: Option<BackendCode>,
        found: BackendCode,
        phase: Option<&'static str>,
    },
    /// A frame payload shorter than its message layout requires.
    Truncated {
        code: BackendCode,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::UnknownCode { found } => {
                write!(f, "Unknown message code 0x{found:02x}")
            },
            ProtocolError::FrameLength { code, length } => {
                write!(f, "Frame length {length} out of bounds in `{code}`")
            },
            ProtocolError::Unexpected { expect, found, phase } => {
                match expect {
                    Some(m) => write!(f, "Expected message `{m}` found `{found}`")?,
                    None => write!(f, "Unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::Truncated { code } => {
                write!(f, "Truncated `{code}` message")
            },
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::UnknownCode { found }
    }

    pub(crate) fn frame_length(code: BackendCode, length: usize) -> ProtocolError {
        Self::FrameLength { code, length }
    }

    pub(crate) fn unexpected(expect: BackendCode, found: BackendCode) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: BackendCode, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn truncated(code: BackendCode) -> ProtocolError {
        Self::Truncated { code }
    }
}

/// An error when decoding an `ErrorResponse` or `NoticeResponse` payload.
pub enum DecodeError {
    /// A mandatory field never arrived before the terminator.
    MissingField(&'static str),
    /// The payload ended before its terminator.
    UnexpectedEnd,
}

impl std::error::Error for DecodeError { }

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MissingField(field) => {
                write!(f, "{field} not received in server error message")
            },
            DecodeError::UnexpectedEnd => {
                write!(f, "server error message ended before its terminator")
            },
        }
    }
}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
