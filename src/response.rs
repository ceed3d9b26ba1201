//! The ICAP response writer.
//!
//! Handlers talk to [`ResponseWriter`]: set ICAP headers, commit the status
//! with [`write_header`], then stream the body with [`write`]. The
//! `Encapsulated` header is always recomputed from what the handler
//! actually supplies, never echoed: embedded heads are materialized to a
//! buffer, measured, and only then does any header byte hit the wire.
//!
//! [`write_header`]: ResponseWriter::write_header
//! [`write`]: ResponseWriter::write

use std::fmt::Write as _;
use std::time::SystemTime;

use http::{HeaderMap, HeaderName, HeaderValue, header};
use tokio::io::AsyncWriteExt;

use crate::chunked;
use crate::error::{Error, IcapResult};
use crate::net::ConnWriter;
use crate::parser::{canon_header, serialize_request_head, serialize_response_head};

/// The HTTP message a handler embeds in its reply.
///
/// `Pair` covers the rare combined form where a request head travels along
/// with the response head.
pub enum Embedded<'a> {
    Req(&'a http::Request<()>),
    Resp(&'a http::Response<()>),
    Pair(&'a http::Request<()>, &'a http::Response<()>),
}

/// Writer for one ICAP response, borrowing the connection's write half.
pub struct ResponseWriter<'c> {
    w: &'c mut ConnWriter,
    headers: HeaderMap,
    wrote_header: bool,
    has_body: bool,
    close: bool,
}

impl<'c> ResponseWriter<'c> {
    pub(crate) fn new(w: &'c mut ConnWriter, close: bool) -> Self {
        ResponseWriter {
            w,
            headers: HeaderMap::new(),
            wrote_header: false,
            has_body: false,
            close,
        }
    }

    /// Mutable view of the outgoing ICAP headers. Changes after
    /// [`write_header`](Self::write_header) have no effect.
    pub fn header(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn wrote_header(&self) -> bool {
        self.wrote_header
    }

    /// Whether the connection must be torn down after this response.
    pub(crate) fn should_close(&self) -> bool {
        self.close
    }

    /// Send the interim `100 Continue` message asking the client for the
    /// body bytes beyond the preview. Does not latch the header state; the
    /// final response is still written with
    /// [`write_header`](Self::write_header).
    pub async fn send_continue(&mut self) -> IcapResult<()> {
        if self.wrote_header {
            return Err(Error::usage("write_header already called"));
        }
        self.w.write_all(b"ICAP/1.0 100 Continue\r\n\r\n").await?;
        self.w.flush().await?;
        Ok(())
    }

    /// Commit the response: status line, ICAP headers with a recomputed
    /// `Encapsulated`, and the serialized embedded head(s).
    ///
    /// Codes 100 and 204 never carry an encapsulated section or a body,
    /// regardless of the arguments.
    pub async fn write_header(
        &mut self,
        code: u16,
        embedded: Option<Embedded<'_>>,
        has_body: bool,
    ) -> IcapResult<()> {
        if self.wrote_header {
            return Err(Error::usage("write_header called twice"));
        }
        if !(100..=599).contains(&code) {
            return Err(Error::usage(format!("status code out of range: {code}")));
        }
        self.wrote_header = true;

        let status_only = code == 100 || code == 204;
        let embedded = if status_only { None } else { embedded };
        self.has_body = has_body && !status_only;

        let (head_bytes, encapsulated) = encode_embedded(embedded, self.has_body);

        if !self.headers.contains_key(header::DATE) {
            let now = httpdate::fmt_http_date(SystemTime::now());
            self.headers.insert(header::DATE, HeaderValue::from_str(&now)?);
        }
        // RFC 3507 requires ISTag on every response; a placeholder keeps
        // the reply well-formed when the handler did not set one.
        if !self.headers.contains_key("istag") {
            self.headers.insert("istag", HeaderValue::from_static("-"));
        }
        if self.close {
            self.headers
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        } else if wants_close(&self.headers) {
            self.close = true;
        }
        self.headers
            .insert("encapsulated", HeaderValue::from_str(&encapsulated)?);

        let mut head = String::new();
        let _ = write!(&mut head, "ICAP/1.0 {} {}\r\n", code, status_reason(code));
        let mut names: Vec<&HeaderName> = self.headers.keys().collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        for name in names {
            let canon = canon_header(name.as_str());
            for value in self.headers.get_all(name) {
                let _ = write!(&mut head, "{}: {}\r\n", canon, value.to_str().unwrap_or_default());
            }
        }
        head.push_str("\r\n");

        self.w.write_all(head.as_bytes()).await?;
        if !head_bytes.is_empty() {
            self.w.write_all(&head_bytes).await?;
        }
        Ok(())
    }

    /// Append body bytes, chunk-framed. Valid only after a
    /// `write_header(.., has_body: true)`.
    pub async fn write(&mut self, buf: &[u8]) -> IcapResult<usize> {
        if !self.wrote_header {
            return Err(Error::usage("header not written"));
        }
        if !self.has_body {
            return Err(Error::usage("write on a response declared bodyless"));
        }
        chunked::write_chunk(self.w, buf).await?;
        Ok(buf.len())
    }

    /// Close the response: emit the chunked terminator and trailing CRLF
    /// when a body was open, then flush. Supplies an implicit
    /// `write_header(200, None, false)` when the handler never committed
    /// one. Called by the connection loop after the handler returns.
    pub(crate) async fn finish(&mut self) -> IcapResult<()> {
        if !self.wrote_header {
            self.write_header(200, None, false).await?;
        }
        if self.has_body {
            chunked::write_terminator(self.w).await?;
            self.w.write_all(b"\r\n").await?;
        }
        self.w.flush().await?;
        Ok(())
    }
}

fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
}

/// Serialize the embedded head(s) and derive the matching `Encapsulated`
/// value. Offsets are measured over the serialized bytes.
fn encode_embedded(embedded: Option<Embedded<'_>>, has_body: bool) -> (Vec<u8>, String) {
    match embedded {
        None => {
            let label = if has_body { "opt-body" } else { "null-body" };
            (Vec::new(), format!("{label}=0"))
        }
        Some(Embedded::Req(r)) => {
            let head = serialize_request_head(r);
            let label = if has_body { "req-body" } else { "null-body" };
            let enc = format!("req-hdr=0, {label}={}", head.len());
            (head, enc)
        }
        Some(Embedded::Resp(r)) => {
            let head = serialize_response_head(r);
            let label = if has_body { "res-body" } else { "null-body" };
            let enc = format!("res-hdr=0, {label}={}", head.len());
            (head, enc)
        }
        Some(Embedded::Pair(rq, rs)) => {
            let mut head = serialize_request_head(rq);
            let mid = head.len();
            head.extend_from_slice(&serialize_response_head(rs));
            let label = if has_body { "res-body" } else { "null-body" };
            let enc = format!("req-hdr=0, res-hdr={mid}, {label}={}", head.len());
            (head, enc)
        }
    }
}

/// Reason phrases from RFC 3507 §4.3.
pub(crate) fn status_reason(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        200 => "OK",
        204 => "No Modifications",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "ICAP Service Not Found",
        405 => "Method Not Allowed For Service",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        501 => "Method Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Overloaded",
        505 => "ICAP Version Not Supported",
        _ => "Unknown",
    }
}
