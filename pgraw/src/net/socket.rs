use std::io;

#[cfg(feature = "tokio")]
use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// A byte-stream transport, either tcp or a unix domain socket.
///
/// Implements `AsyncRead` and `AsyncWrite` transparently.
///
/// require `tokio` feature, otherwise panic at runtime
pub struct Socket {
    kind: Kind,
}

enum Kind {
    #[cfg(feature = "tokio")]
    Tcp(tokio::net::TcpStream),
    #[cfg(all(feature = "tokio", unix))]
    Unix(tokio::net::UnixStream),
}

/// Dispatch an expression over every socket kind.
macro_rules! dispatch {
    ($self:expr, $pat:pat => $body:expr) => {
        match $self.kind {
            #[cfg(feature = "tokio")]
            Kind::Tcp($pat) => $body,
            #[cfg(all(feature = "tokio", unix))]
            Kind::Unix($pat) => $body,
        }
    };
}

impl Socket {
    /// Open a tcp connection with `TCP_NODELAY` set.
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        #[cfg(feature = "tokio")]
        {
            let tcp = tokio::net::TcpStream::connect((host, port)).await?;
            tcp.set_nodelay(true)?;
            Ok(Socket { kind: Kind::Tcp(tcp) })
        }

        #[cfg(not(feature = "tokio"))]
        {
            let _ = (host, port);
            panic!("runtime disabled")
        }
    }

    /// Open a unix domain socket connection.
    pub async fn connect_socket(path: &str) -> io::Result<Socket> {
        #[cfg(all(feature = "tokio", unix))]
        {
            let unix = tokio::net::UnixStream::connect(path).await?;
            Ok(Socket { kind: Kind::Unix(unix) })
        }

        #[cfg(not(all(feature = "tokio", unix)))]
        {
            let _ = path;
            panic!("runtime disabled")
        }
    }
}

#[cfg(feature = "tokio")]
impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        dispatch!(self, ref mut io => Pin::new(io).poll_read(cx, buf))
    }
}

#[cfg(feature = "tokio")]
impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        dispatch!(self, ref mut io => Pin::new(io).poll_write(cx, buf))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        dispatch!(self, ref mut io => Pin::new(io).poll_flush(cx))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        dispatch!(self, ref mut io => Pin::new(io).poll_shutdown(cx))
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        dispatch!(self, ref io => std::fmt::Debug::fmt(io, _f))
    }
}
