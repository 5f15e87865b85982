//! `pgraw` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    connection::{AuthError, ParseError},
    io::WriteOverflow,
    postgres::{DatabaseError, DecodeError, ProtocolError},
};

/// A specialized [`Result`] type for `pgraw` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgraw` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

/// All possible error kind from `pgraw` library.
pub enum ErrorKind {
    /// Url or environment configuration could not be parsed.
    Config(ParseError),
    /// The backend violated the wire protocol; the connection is unusable.
    Protocol(ProtocolError),
    /// The transport failed.
    Io(io::Error),
    /// The backend reported an error for the submitted work.
    Database(DatabaseError),
    /// Authentication was unsupported or rejected.
    Auth(AuthError),
    /// A mandatory field was missing from a server error message.
    Decode(DecodeError),
    /// The transport reached end-of-stream, or the connection was already
    /// torn down by an earlier failure.
    Closed(ConnectionClosed),
    /// A frame batch did not fit the fixed write region.
    Overflow(WriteOverflow),
}

/// The transport is gone; no further operation can succeed.
pub struct ConnectionClosed;

impl std::error::Error for ConnectionClosed { }

impl fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection closed")
    }
}

impl fmt::Debug for ConnectionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<DatabaseError>e => ErrorKind::Database(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<ConnectionClosed>e => ErrorKind::Closed(e));
from!(<WriteOverflow>e => ErrorKind::Overflow(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Closed(e) => e.fmt(f),
            Self::Overflow(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
