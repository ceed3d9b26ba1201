//! Transport abstraction used by the ICAP server.
//!
//! This module exposes a single enum [`Conn`] that abstracts over the
//! underlying byte stream:
//!
//! - plain TCP (`TcpStream`)
//! - TLS over **rustls** (`tokio_rustls::server::TlsStream<TcpStream>`) —
//!   when the `tls-rustls` feature is enabled
//!
//! The exact shape of the enum depends on enabled Cargo features. To keep
//! the same name regardless of features, the enum is defined inside a
//! `conn_def` module selected by `#[cfg(...)]` and re-exported below.
//!
//! The enum implements `AsyncRead`/`AsyncWrite` by delegating to the inner
//! stream; `pin_project_lite` projects the pinned variants safely.

use tokio::io::{BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// Buffered read half of a connection; the parser and body reader consume it.
pub(crate) type ConnReader = BufReader<ReadHalf<Conn>>;
/// Buffered write half of a connection; the response writer owns it per request.
pub(crate) type ConnWriter = BufWriter<WriteHalf<Conn>>;

#[cfg(feature = "tls-rustls")]
mod conn_def {
    use pin_project_lite::pin_project;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::TcpStream;

    pin_project! {
        /// Transport connection when the rustls TLS backend is compiled in.
        #[project = ConnProj]
        #[derive(Debug)]
        pub enum Conn {
            /// Plain TCP connection (no TLS).
            Plain  { #[pin] inner: TcpStream },
            /// Server-side TLS connection using rustls.
            Rustls { #[pin] inner: tokio_rustls::server::TlsStream<TcpStream> },
        }
    }

    impl AsyncRead for Conn {
        fn poll_read(
            self: core::pin::Pin<&mut Self>,
            cx: &mut core::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> core::task::Poll<std::io::Result<()>> {
            match self.project() {
                ConnProj::Plain { inner } => inner.poll_read(cx, buf),
                ConnProj::Rustls { inner } => inner.poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for Conn {
        fn poll_write(
            self: core::pin::Pin<&mut Self>,
            cx: &mut core::task::Context<'_>,
            buf: &[u8],
        ) -> core::task::Poll<std::io::Result<usize>> {
            match self.project() {
                ConnProj::Plain { inner } => inner.poll_write(cx, buf),
                ConnProj::Rustls { inner } => inner.poll_write(cx, buf),
            }
        }
        fn poll_flush(
            self: core::pin::Pin<&mut Self>,
            cx: &mut core::task::Context<'_>,
        ) -> core::task::Poll<std::io::Result<()>> {
            match self.project() {
                ConnProj::Plain { inner } => inner.poll_flush(cx),
                ConnProj::Rustls { inner } => inner.poll_flush(cx),
            }
        }
        fn poll_shutdown(
            self: core::pin::Pin<&mut Self>,
            cx: &mut core::task::Context<'_>,
        ) -> core::task::Poll<std::io::Result<()>> {
            match self.project() {
                ConnProj::Plain { inner } => inner.poll_shutdown(cx),
                ConnProj::Rustls { inner } => inner.poll_shutdown(cx),
            }
        }
    }
}

#[cfg(not(feature = "tls-rustls"))]
mod conn_def {
    use pin_project_lite::pin_project;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::TcpStream;

    pin_project! {
        /// Transport connection when no TLS backend is compiled in.
        #[project = ConnProj]
        #[derive(Debug)]
        pub enum Conn {
            /// Plain TCP connection (no TLS).
            Plain { #[pin] inner: TcpStream },
        }
    }

    impl AsyncRead for Conn {
        fn poll_read(
            self: core::pin::Pin<&mut Self>,
            cx: &mut core::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> core::task::Poll<std::io::Result<()>> {
            match self.project() {
                ConnProj::Plain { inner } => inner.poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for Conn {
        fn poll_write(
            self: core::pin::Pin<&mut Self>,
            cx: &mut core::task::Context<'_>,
            buf: &[u8],
        ) -> core::task::Poll<std::io::Result<usize>> {
            match self.project() {
                ConnProj::Plain { inner } => inner.poll_write(cx, buf),
            }
        }
        fn poll_flush(
            self: core::pin::Pin<&mut Self>,
            cx: &mut core::task::Context<'_>,
        ) -> core::task::Poll<std::io::Result<()>> {
            match self.project() {
                ConnProj::Plain { inner } => inner.poll_flush(cx),
            }
        }
        fn poll_shutdown(
            self: core::pin::Pin<&mut Self>,
            cx: &mut core::task::Context<'_>,
        ) -> core::task::Poll<std::io::Result<()>> {
            match self.project() {
                ConnProj::Plain { inner } => inner.poll_shutdown(cx),
            }
        }
    }
}

pub(crate) use conn_def::Conn;

impl Conn {
    pub(crate) fn plain(inner: TcpStream) -> Self {
        Conn::Plain { inner }
    }

    #[cfg(feature = "tls-rustls")]
    pub(crate) fn rustls(inner: tokio_rustls::server::TlsStream<TcpStream>) -> Self {
        Conn::Rustls { inner }
    }
}
