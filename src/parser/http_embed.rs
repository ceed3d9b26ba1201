//! Parse and serialize the HTTP message heads embedded in ICAP bodies.
//!
//! The ICAP reader hands this module an exact byte slice delimited by the
//! `Encapsulated` offsets; the body never appears here, it stays on the
//! surrounding chunked stream.

use std::fmt::Write as _;

use http::{
    HeaderMap, HeaderName, HeaderValue, Request as HttpRequest, Response as HttpResponse,
    StatusCode as HttpStatus, Uri, Version,
};

use crate::error::{Error, IcapResult};
use crate::parser::canon_header;

pub(crate) fn http_version_str(v: Version) -> &'static str {
    match v {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        _ => "HTTP/1.1",
    }
}

fn parse_version(token: &str) -> Version {
    match token {
        "HTTP/0.9" => Version::HTTP_09,
        "HTTP/1.0" => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

fn bad(detail: impl std::fmt::Display) -> Error {
    Error::http_parse(format!("bad embedded http: {detail}"))
}

/// Split a head buffer into its start line and header lines.
fn head_lines(buf: &[u8]) -> IcapResult<(String, HeaderMap)> {
    let text = std::str::from_utf8(buf).map_err(bad)?;
    let mut lines = text.split("\r\n");
    let start = lines.next().ok_or_else(|| bad("empty head"))?.to_string();

    let mut headers = HeaderMap::new();
    let mut last: Option<HeaderName> = None;
    for line in lines {
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // RFC 2616 folding: continuation of the previous value.
            let name = last.clone().ok_or_else(|| bad("continuation before any header"))?;
            let folded = match headers.get_all(&name).iter().next_back() {
                Some(prev) => format!("{} {}", prev.to_str().map_err(bad)?, line.trim()),
                None => line.trim().to_string(),
            };
            replace_last(&mut headers, &name, &folded)?;
            continue;
        }
        let colon = line.find(':').ok_or_else(|| bad("malformed header line"))?;
        let name = HeaderName::from_bytes(line[..colon].trim().as_bytes()).map_err(bad)?;
        let value = HeaderValue::from_str(line[colon + 1..].trim()).map_err(bad)?;
        headers.append(name.clone(), value);
        last = Some(name);
    }
    Ok((start, headers))
}

/// Replace the last value stored under `name` with `folded`.
fn replace_last(headers: &mut HeaderMap, name: &HeaderName, folded: &str) -> IcapResult<()> {
    let mut values: Vec<HeaderValue> = headers.get_all(name).iter().cloned().collect();
    let new = HeaderValue::from_str(folded).map_err(bad)?;
    match values.last_mut() {
        Some(slot) => *slot = new,
        None => values.push(new),
    }
    headers.remove(name);
    for v in values {
        headers.append(name.clone(), v);
    }
    Ok(())
}

/// Parse an embedded HTTP request head into an `http::Request` with no body.
pub(crate) fn parse_request_head(buf: &[u8]) -> IcapResult<HttpRequest<()>> {
    let (start, headers) = head_lines(buf)?;
    let mut parts = start.split_whitespace();
    let method = parts.next().ok_or_else(|| bad("missing method"))?;
    let target = parts.next().ok_or_else(|| bad("missing request target"))?;
    let version = parse_version(parts.next().unwrap_or("HTTP/1.1"));

    let uri: Uri = target.parse().map_err(bad)?;
    let mut builder = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .version(version);
    if let Some(h) = builder.headers_mut() {
        h.extend(headers);
    }
    builder.body(()).map_err(bad)
}

/// Parse an embedded HTTP response head into an `http::Response` with no body.
pub(crate) fn parse_response_head(buf: &[u8]) -> IcapResult<HttpResponse<()>> {
    let (start, headers) = head_lines(buf)?;
    let mut parts = start.split_whitespace();
    let version_token = parts.next().ok_or_else(|| bad("missing version"))?;
    if !version_token.starts_with("HTTP/") {
        return Err(bad("missing HTTP version"));
    }
    let code = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| bad("missing status code"))?;

    let mut builder = HttpResponse::builder()
        .status(HttpStatus::from_u16(code).map_err(bad)?)
        .version(parse_version(version_token));
    if let Some(h) = builder.headers_mut() {
        h.extend(headers);
    }
    builder.body(()).map_err(bad)
}

/// Serialize headers in ascending canonical-name order; stable across calls
/// so recomputed `Encapsulated` offsets are deterministic.
fn write_sorted_headers(out: &mut String, headers: &HeaderMap) {
    let mut names: Vec<&HeaderName> = headers.keys().collect();
    names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    for name in names {
        let canon = canon_header(name.as_str());
        for value in headers.get_all(name) {
            let _ = write!(out, "{}: {}\r\n", canon, value.to_str().unwrap_or_default());
        }
    }
}

/// Serialize an HTTP request head for embedding into an ICAP response.
///
/// The request line keeps the URI exactly as parsed, so an absolute-form
/// target survives the round trip.
pub(crate) fn serialize_request_head(req: &HttpRequest<()>) -> Vec<u8> {
    let mut out = String::new();
    let _ = write!(
        &mut out,
        "{} {} {}\r\n",
        req.method(),
        req.uri(),
        http_version_str(req.version())
    );
    write_sorted_headers(&mut out, req.headers());
    out.push_str("\r\n");
    out.into_bytes()
}

/// Serialize an HTTP response head for embedding into an ICAP response.
pub(crate) fn serialize_response_head(resp: &HttpResponse<()>) -> Vec<u8> {
    let mut out = String::new();
    let code = resp.status();
    let _ = write!(
        &mut out,
        "{} {} {}\r\n",
        http_version_str(resp.version()),
        code.as_u16(),
        code.canonical_reason().unwrap_or("")
    );
    write_sorted_headers(&mut out, resp.headers());
    out.push_str("\r\n");
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_head_with_duplicates() {
        let head = b"GET /example.html HTTP/1.1\r\n\
                     Host: www.example.com\r\n\
                     Accept: text/html\r\n\
                     Accept: text/plain\r\n\
                     \r\n";
        let req = parse_request_head(head).unwrap();
        assert_eq!(req.method(), "GET");
        assert_eq!(req.uri().path(), "/example.html");
        let accepts: Vec<_> = req.headers().get_all("accept").iter().collect();
        assert_eq!(accepts.len(), 2);
    }

    #[test]
    fn parses_response_head() {
        let head = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let resp = parse_response_head(head).unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        assert_eq!(resp.headers()["content-length"], "0");
    }

    #[test]
    fn folded_value_is_joined() {
        let head = b"HTTP/1.1 200 OK\r\n\
                     X-Note: first\r\n\
                     \tsecond\r\n\
                     \r\n";
        let resp = parse_response_head(head).unwrap();
        assert_eq!(resp.headers()["x-note"], "first second");
    }

    #[test]
    fn request_line_garbage_is_rejected() {
        let err = parse_request_head(b"GET\r\n\r\n").unwrap_err();
        assert!(err.to_string().contains("bad embedded http"));
    }

    #[test]
    fn serialization_sorts_headers_and_keeps_absolute_uri() {
        let req = HttpRequest::builder()
            .method("GET")
            .uri("http://www.example.com/index.html")
            .version(Version::HTTP_11)
            .header("Via", "1.0 icap.example.net")
            .header("Accept", "text/html")
            .body(())
            .unwrap();
        let head = serialize_request_head(&req);
        assert_eq!(
            head,
            b"GET http://www.example.com/index.html HTTP/1.1\r\n\
              Accept: text/html\r\n\
              Via: 1.0 icap.example.net\r\n\
              \r\n"
        );
    }

    #[test]
    fn parse_then_serialize_is_stable() {
        let head = b"HTTP/1.1 200 OK\r\n\
                     Content-Length: 29\r\n\
                     Content-Type: text/plain\r\n\
                     \r\n";
        let resp = parse_response_head(head).unwrap();
        let out = serialize_response_head(&resp);
        assert_eq!(out, head);
        let again = serialize_response_head(&parse_response_head(&out).unwrap());
        assert_eq!(again, out);
    }
}
