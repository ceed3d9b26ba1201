//! The ICAP request model handed to handlers.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use http::{HeaderMap, Uri};

use crate::chunked::ChunkDecoder;
use crate::net::ConnReader;

/// ICAP request method.
///
/// Methods are case-sensitive per RFC 3507. Unknown tokens are carried as
/// [`Method::Extension`] and forwarded to the handler, which is expected to
/// reply `405`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    ReqMod,
    RespMod,
    Extension(String),
}

impl Method {
    pub(crate) fn from_token(token: &str) -> Self {
        match token {
            "OPTIONS" => Method::Options,
            "REQMOD" => Method::ReqMod,
            "RESPMOD" => Method::RespMod,
            other => Method::Extension(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Options => "OPTIONS",
            Method::ReqMod => "REQMOD",
            Method::RespMod => "RESPMOD",
            Method::Extension(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One label of the `Encapsulated` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    ReqHdr,
    ResHdr,
    ReqBody,
    ResBody,
    OptBody,
    NullBody,
}

impl Section {
    pub fn label(&self) -> &'static str {
        match self {
            Section::ReqHdr => "req-hdr",
            Section::ResHdr => "res-hdr",
            Section::ReqBody => "req-body",
            Section::ResBody => "res-body",
            Section::OptBody => "opt-body",
            Section::NullBody => "null-body",
        }
    }

    pub(crate) fn from_label(label: &str) -> Option<Self> {
        match label {
            "req-hdr" => Some(Section::ReqHdr),
            "res-hdr" => Some(Section::ResHdr),
            "req-body" => Some(Section::ReqBody),
            "res-body" => Some(Section::ResBody),
            "opt-body" => Some(Section::OptBody),
            "null-body" => Some(Section::NullBody),
            _ => None,
        }
    }

    /// True for the labels that announce a chunked body on the wire.
    pub fn is_body(&self) -> bool {
        matches!(self, Section::ReqBody | Section::ResBody | Section::OptBody)
    }
}

/// A parsed ICAP request.
///
/// The encapsulated HTTP heads are plain `http` values without bodies; the
/// encapsulated body stays on the connection and is consumed lazily through
/// [`Request::body`].
pub struct Request<'c> {
    pub method: Method,
    /// The ICAP target URI exactly as it appeared on the request line.
    pub raw_url: String,
    pub uri: Uri,
    /// Protocol token from the request line, normally `ICAP/1.0`.
    pub protocol: String,
    pub headers: HeaderMap,
    pub remote_addr: SocketAddr,
    /// Value of the `Preview` header, when present.
    pub preview_size: Option<usize>,
    /// The `Encapsulated` directive as an ordered `(label, offset)` list.
    pub encapsulated: Vec<(Section, usize)>,
    /// Embedded HTTP request head (`req-hdr` section).
    pub http_request: Option<http::Request<()>>,
    /// Embedded HTTP response head (`res-hdr` section).
    pub http_response: Option<http::Response<()>>,
    /// The de-chunked encapsulated body, bound to this connection.
    pub body: BodyReader<'c>,
}

impl Request<'_> {
    pub fn is_options(&self) -> bool {
        self.method == Method::Options
    }

    pub fn is_reqmod(&self) -> bool {
        self.method == Method::ReqMod
    }

    pub fn is_respmod(&self) -> bool {
        self.method == Method::RespMod
    }

    /// Whether the client advertised `Allow: 204`, permitting a
    /// `204 No Modifications` reply outside a preview.
    pub fn allows_204(&self) -> bool {
        self.headers
            .get_all(http::header::ALLOW)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.split(',').any(|p| p.trim() == "204"))
    }
}

enum Inner<'c> {
    Chunked {
        r: &'c mut ConnReader,
        dec: ChunkDecoder,
    },
    Empty,
}

/// Lazy reader over the de-chunked encapsulated body.
///
/// When there is no body section the reader yields zero bytes. In preview
/// mode it yields the preview bytes and then reports end-of-stream; see
/// [`BodyReader::preview_exhausted`] and [`BodyReader::resume`] for how to
/// obtain the remainder after a `100 Continue`.
pub struct BodyReader<'c> {
    inner: Inner<'c>,
}

impl<'c> BodyReader<'c> {
    pub(crate) fn chunked(r: &'c mut ConnReader, dec: ChunkDecoder) -> Self {
        BodyReader {
            inner: Inner::Chunked { r, dec },
        }
    }

    pub(crate) fn empty() -> Self {
        BodyReader { inner: Inner::Empty }
    }

    /// Read decoded body bytes. `Ok(0)` means end-of-stream (or an
    /// exhausted preview).
    pub async fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Chunked { r, dec } => dec.read(r, out).await,
            Inner::Empty => Ok(0),
        }
    }

    /// Read the remaining body into `out`; returns the number of bytes
    /// appended.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        let mut total = 0;
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    /// True once a preview body has been consumed up to its terminator and
    /// the client is waiting for `100 Continue`.
    pub fn preview_exhausted(&self) -> bool {
        match &self.inner {
            Inner::Chunked { dec, .. } => dec.paused(),
            Inner::Empty => false,
        }
    }

    /// Re-arm the reader after [`ResponseWriter::send_continue`] so the
    /// remainder of the body can be read. No-op unless the preview is
    /// exhausted.
    ///
    /// [`ResponseWriter::send_continue`]: crate::ResponseWriter::send_continue
    pub fn resume(&mut self) {
        if let Inner::Chunked { dec, .. } = &mut self.inner {
            dec.resume();
        }
    }
}
