//! Connection lifecycle and the accept loop.
//!
//! One spawned task per accepted connection. Within a connection, requests
//! are strictly sequential: the next request is not read until the current
//! handler has returned and its response has been finished, which keeps the
//! chunked body on the wire contiguous.

use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tracing::{error, trace, warn};

use crate::DEFAULT_ADDR;
use crate::error::{Error, IcapResult};
use crate::net::{Conn, ConnReader, ConnWriter};
use crate::parser;
use crate::request::Request;
use crate::response::ResponseWriter;

/// An ICAP request handler.
///
/// `serve_icap` writes reply headers and body to the [`ResponseWriter`] and
/// returns; the connection loop finishes the response. A returned error is
/// logged and tears down the connection (with a `500` when nothing was
/// committed yet); replying with an error status instead is the handler's
/// prerogative and is never second-guessed.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve_icap(
        &self,
        w: &mut ResponseWriter<'_>,
        req: &mut Request<'_>,
    ) -> IcapResult<()>;
}

#[derive(Clone, Copy)]
struct ConnConfig {
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    keepalive: bool,
}

/// An ICAP server: a root handler plus listener parameters.
pub struct Server {
    addr: String,
    handler: Arc<dyn Handler>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    keepalive: bool,
}

impl Server {
    /// Server with default parameters, dispatching to `handler`.
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Server {
            addr: DEFAULT_ADDR.to_string(),
            handler,
            read_timeout: None,
            write_timeout: None,
            keepalive: true,
        }
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn listen_and_serve(&self) -> IcapResult<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener`, spawning one task per connection.
    /// Transient accept errors are retried after 5 ms; permanent ones
    /// terminate the loop.
    pub async fn serve(&self, listener: TcpListener) -> IcapResult<()> {
        let local = listener.local_addr()?;
        trace!("ICAP server listening on {}", local);
        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) if is_transient(&e) => {
                    warn!("accept error (retrying): {}", e);
                    sleep(Duration::from_millis(5)).await;
                    continue;
                }
                Err(e) => {
                    error!("accept error: {}", e);
                    return Err(e.into());
                }
            };
            trace!("new connection from {}", addr);
            let handler = Arc::clone(&self.handler);
            let cfg = self.conn_config();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(Conn::plain(socket), addr, handler, cfg).await {
                    error!("error serving connection {}: {}", addr, e);
                }
            });
        }
    }

    /// TLS variant of [`listen_and_serve`](Self::listen_and_serve): wrap
    /// every accepted socket in a rustls handshake. Identical downstream.
    #[cfg(feature = "tls-rustls")]
    pub async fn listen_and_serve_tls(
        &self,
        cert: impl AsRef<std::path::Path>,
        key: impl AsRef<std::path::Path>,
    ) -> IcapResult<()> {
        let acceptor = tls::acceptor(cert.as_ref(), key.as_ref())?;
        let listener = TcpListener::bind(&self.addr).await?;
        let local = listener.local_addr()?;
        trace!("ICAP server listening on {} (TLS)", local);
        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) if is_transient(&e) => {
                    warn!("accept error (retrying): {}", e);
                    sleep(Duration::from_millis(5)).await;
                    continue;
                }
                Err(e) => {
                    error!("accept error: {}", e);
                    return Err(e.into());
                }
            };
            let handler = Arc::clone(&self.handler);
            let cfg = self.conn_config();
            let acceptor = acceptor.clone();
            // Handshake inside the task so a slow peer cannot stall accepts.
            tokio::spawn(async move {
                let stream = match acceptor.accept(socket).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("TLS handshake with {} failed: {}", addr, e);
                        return;
                    }
                };
                if let Err(e) = serve_connection(Conn::rustls(stream), addr, handler, cfg).await {
                    error!("error serving connection {}: {}", addr, e);
                }
            });
        }
    }

    fn conn_config(&self) -> ConnConfig {
        ConnConfig {
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            keepalive: self.keepalive,
        }
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    addr: String,
    handler: Option<Arc<dyn Handler>>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    keepalive: bool,
}

impl ServerBuilder {
    pub fn new() -> Self {
        ServerBuilder {
            addr: DEFAULT_ADDR.to_string(),
            handler: None,
            read_timeout: None,
            write_timeout: None,
            keepalive: true,
        }
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.addr = addr.to_string();
        self
    }

    /// Root handler; defaults to the process-wide mux when not set.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Deadline for reading each request (also bounds keep-alive idle
    /// time). Expiry closes the connection.
    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = Some(d);
        self
    }

    /// Deadline for flushing each response.
    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.write_timeout = Some(d);
        self
    }

    /// Disable to answer every request with `Connection: close`.
    pub fn keepalive(mut self, on: bool) -> Self {
        self.keepalive = on;
        self
    }

    pub fn build(self) -> Server {
        Server {
            addr: self.addr,
            handler: self.handler.unwrap_or_else(|| crate::mux::default_mux()),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            keepalive: self.keepalive,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve one connection: read request, dispatch, finish, repeat.
async fn serve_connection(
    conn: Conn,
    remote: SocketAddr,
    handler: Arc<dyn Handler>,
    cfg: ConnConfig,
) -> IcapResult<()> {
    let (rd, wr) = tokio::io::split(conn);
    let mut reader: ConnReader = BufReader::new(rd);
    let mut writer: ConnWriter = BufWriter::new(wr);

    loop {
        let read = parser::read_request(&mut reader, remote);
        let read = match cfg.read_timeout {
            Some(t) => match timeout(t, read).await {
                Ok(res) => res,
                Err(_) => Err(Error::Network(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "read timed out",
                ))),
            },
            None => read.await,
        };
        let mut req = match read {
            Ok(Some(req)) => req,
            // Clean shutdown between requests.
            Ok(None) => break,
            Err(e) if e.is_protocol() => {
                warn!("protocol error from {}: {}", remote, e);
                // Nothing of a response is committed yet; answer 400.
                let mut w = ResponseWriter::new(&mut writer, true);
                let _ = w.write_header(400, None, false).await;
                let _ = w.finish().await;
                break;
            }
            Err(e) => {
                warn!("error while reading request from {}: {}", remote, e);
                break;
            }
        };

        let close_hint = !cfg.keepalive || wants_close(&req.headers);
        let mut w = ResponseWriter::new(&mut writer, close_hint);
        match AssertUnwindSafe(handler.serve_icap(&mut w, &mut req))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("handler error serving {}: {}", remote, e);
                if !w.wrote_header() {
                    let _ = w.write_header(500, None, false).await;
                    let _ = w.finish().await;
                }
                break;
            }
            Err(panic) => {
                error!("icap: panic serving {}: {}", remote, panic_message(&*panic));
                break;
            }
        }

        let finish = w.finish();
        match cfg.write_timeout {
            Some(t) => timeout(t, finish).await.map_err(|_| {
                Error::Network(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
            })??,
            None => finish.await?,
        }
        if w.should_close() {
            break;
        }
    }
    Ok(())
}

fn wants_close(headers: &http::HeaderMap) -> bool {
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

/// Accept ICAP connections on `listener`, dispatching to `handler`.
pub async fn serve(listener: TcpListener, handler: Arc<dyn Handler>) -> IcapResult<()> {
    Server::new(handler).serve(listener).await
}

/// Listen on `addr` and dispatch to `handler`. Pair with
/// [`default_mux`](crate::default_mux) and [`handle`](crate::handle) for
/// module-level registration.
pub async fn listen_and_serve(addr: &str, handler: Arc<dyn Handler>) -> IcapResult<()> {
    Server::builder()
        .bind(addr)
        .handler(handler)
        .build()
        .listen_and_serve()
        .await
}

/// TLS variant of [`listen_and_serve`].
#[cfg(feature = "tls-rustls")]
pub async fn listen_and_serve_tls(
    addr: &str,
    cert: impl AsRef<std::path::Path>,
    key: impl AsRef<std::path::Path>,
    handler: Arc<dyn Handler>,
) -> IcapResult<()> {
    Server::builder()
        .bind(addr)
        .handler(handler)
        .build()
        .listen_and_serve_tls(cert, key)
        .await
}

#[cfg(feature = "tls-rustls")]
mod tls {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;
    use std::sync::Arc;

    use tokio_rustls::TlsAcceptor;
    use tokio_rustls::rustls::ServerConfig;
    use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

    use crate::error::{Error, IcapResult};

    /// Build a rustls acceptor from PEM certificate-chain and key files.
    pub(super) fn acceptor(cert: &Path, key: &Path) -> IcapResult<TlsAcceptor> {
        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(File::open(cert)?))
                .collect::<Result<_, _>>()?;
        let key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut BufReader::new(File::open(key)?))?
                .ok_or_else(|| Error::Configuration("no private key in key file".to_string()))?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}
