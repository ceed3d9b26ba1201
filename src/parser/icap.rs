//! Reader for ICAP requests: start line, header block, the `Encapsulated`
//! directive, embedded HTTP heads, and body binding.

use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;

use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use tokio::io::AsyncReadExt;
use tracing::trace;

use crate::chunked::{self, ChunkDecoder};
use crate::error::{Error, IcapResult};
use crate::net::ConnReader;
use crate::parser::{parse_request_head, parse_response_head};
use crate::request::{BodyReader, Method, Request, Section};

/// Lift an IO error out of the line/chunk layer. `InvalidData` carries a
/// protocol-violation message and becomes a parse error; everything else is
/// a plain network failure.
fn from_io(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::InvalidData {
        Error::Parse(e.to_string())
    } else {
        Error::Network(e)
    }
}

/// Read one ICAP request off the connection.
///
/// Returns `Ok(None)` on a clean EOF between messages. The returned
/// [`Request`] borrows the connection reader through its body.
pub(crate) async fn read_request<'c>(
    r: &'c mut ConnReader,
    remote_addr: SocketAddr,
) -> IcapResult<Option<Request<'c>>> {
    // Start line. Stray blank lines between messages are tolerated so a
    // fully drained chunked body does not desynchronize keep-alive.
    let line = loop {
        match chunked::read_line(r).await.map_err(from_io)? {
            None => return Ok(None),
            Some(l) if l.is_empty() => continue,
            Some(l) => break l,
        }
    };
    let line =
        String::from_utf8(line).map_err(|_| Error::parse("malformed ICAP request line"))?;
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(protocol), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::parse("malformed ICAP request line"));
    };
    if !protocol.starts_with("ICAP/") {
        return Err(Error::parse(format!("unsupported protocol: {protocol}")));
    }
    let method = Method::from_token(method);
    let uri: Uri = target
        .parse()
        .map_err(|_| Error::parse("malformed ICAP URI"))?;
    trace!("read_request: {} {} from {}", method, target, remote_addr);

    let headers = read_header_block(r).await?;

    let encapsulated = {
        let mut values = headers.get_all("encapsulated").iter();
        match (values.next(), values.next()) {
            (Some(_), Some(_)) => return Err(Error::parse("duplicate Encapsulated header")),
            (Some(v), None) => parse_encapsulated(
                v.to_str()
                    .map_err(|_| Error::parse("bad Encapsulated header"))?,
            )?,
            (None, _) => Vec::new(),
        }
    };

    let preview_size = match headers.get("preview") {
        Some(v) => Some(
            v.to_str()
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .ok_or_else(|| Error::parse("bad Preview value"))?,
        ),
        None => None,
    };

    // Embedded heads, in declared order. A head followed by another section
    // spans exactly the offset difference; a trailing head runs to its
    // blank line.
    let mut http_request = None;
    let mut http_response = None;
    for (i, &(section, offset)) in encapsulated.iter().enumerate() {
        if !matches!(section, Section::ReqHdr | Section::ResHdr) {
            continue;
        }
        let head = match encapsulated.get(i + 1) {
            Some(&(_, next)) => read_exact_head(r, next - offset).await?,
            None => read_head_to_blank_line(r).await?,
        };
        if section == Section::ReqHdr {
            http_request = Some(parse_request_head(&head)?);
        } else {
            http_response = Some(parse_response_head(&head)?);
        }
    }

    let body = if encapsulated.iter().any(|(s, _)| s.is_body()) {
        let mut dec = ChunkDecoder::new(preview_size.is_some());
        // Surface chunk framing errors before the handler runs.
        dec.prime(r).await.map_err(from_io)?;
        BodyReader::chunked(r, dec)
    } else {
        BodyReader::empty()
    };

    Ok(Some(Request {
        method,
        raw_url: target.to_string(),
        uri,
        protocol: protocol.to_string(),
        headers,
        remote_addr,
        preview_size,
        encapsulated,
        http_request,
        http_response,
        body,
    }))
}

/// Read header lines up to the blank line, applying RFC 2616 folding and
/// accumulating duplicates as multi-values.
async fn read_header_block(r: &mut ConnReader) -> IcapResult<HeaderMap> {
    let mut raw: Vec<(String, String)> = Vec::new();
    loop {
        let line = chunked::read_line(r)
            .await
            .map_err(from_io)?
            .ok_or_else(|| Error::parse("unexpected EOF in ICAP headers"))?;
        if line.is_empty() {
            break;
        }
        let text =
            std::str::from_utf8(&line).map_err(|_| Error::parse("malformed header line"))?;
        if line[0] == b' ' || line[0] == b'\t' {
            let Some(prev) = raw.last_mut() else {
                return Err(Error::parse("continuation line before any header"));
            };
            prev.1.push(' ');
            prev.1.push_str(text.trim());
            continue;
        }
        let Some(colon) = text.find(':') else {
            return Err(Error::parse("malformed header line"));
        };
        raw.push((
            text[..colon].trim().to_string(),
            text[colon + 1..].trim().to_string(),
        ));
    }

    let mut headers = HeaderMap::with_capacity(raw.len());
    for (name, value) in raw {
        headers.append(
            HeaderName::from_bytes(name.as_bytes())?,
            HeaderValue::from_str(&value)?,
        );
    }
    Ok(headers)
}

/// Parse an `Encapsulated` value into its ordered `(label, offset)` list.
pub(crate) fn parse_encapsulated(value: &str) -> IcapResult<Vec<(Section, usize)>> {
    let mut sections: Vec<(Section, usize)> = Vec::new();
    for token in value.split(',') {
        let token = token.trim();
        let Some((label, offset)) = token.split_once('=') else {
            return Err(Error::parse(format!("bad Encapsulated token: {token}")));
        };
        let Some(section) = Section::from_label(label.trim()) else {
            return Err(Error::parse(format!("bad Encapsulated label: {label}")));
        };
        let offset: usize = offset
            .trim()
            .parse()
            .map_err(|_| Error::parse(format!("bad Encapsulated offset: {offset}")))?;
        if let Some(&(prev, prev_off)) = sections.last() {
            if prev == Section::NullBody {
                return Err(Error::parse("null-body must be the final Encapsulated section"));
            }
            if offset < prev_off {
                return Err(Error::parse("Encapsulated offsets must not decrease"));
            }
        }
        sections.push((section, offset));
    }
    Ok(sections)
}

async fn read_exact_head(r: &mut ConnReader, len: usize) -> IcapResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::parse("truncated encapsulated head")
        } else {
            Error::Network(e)
        }
    })?;
    Ok(buf)
}

/// Read a trailing head section, whose length the `Encapsulated` header
/// does not pin down, through its terminating blank line.
async fn read_head_to_blank_line(r: &mut ConnReader) -> IcapResult<Vec<u8>> {
    let mut buf = Vec::new();
    loop {
        let line = chunked::read_line(r)
            .await
            .map_err(from_io)?
            .ok_or_else(|| Error::parse("unexpected EOF in encapsulated head"))?;
        let done = line.is_empty();
        buf.extend_from_slice(&line);
        buf.extend_from_slice(b"\r\n");
        if done {
            return Ok(buf);
        }
    }
}

/// Return the canonical ICAP header name (title-cased, with special cases).
/// Input should be lowercased (`http::HeaderName::as_str()` already is).
pub(crate) fn canon_header(name: &str) -> Cow<'_, str> {
    match name {
        // ICAP core / common headers
        "methods" => Cow::Borrowed("Methods"),
        "istag" => Cow::Borrowed("ISTag"),
        "encapsulated" => Cow::Borrowed("Encapsulated"),
        "service" => Cow::Borrowed("Service"),
        "max-connections" => Cow::Borrowed("Max-Connections"),
        "options-ttl" => Cow::Borrowed("Options-TTL"),
        "preview" => Cow::Borrowed("Preview"),
        "allow" => Cow::Borrowed("Allow"),
        "service-id" => Cow::Borrowed("Service-ID"),
        // Transfer-* group used by some servers
        "transfer-preview" => Cow::Borrowed("Transfer-Preview"),
        "transfer-ignore" => Cow::Borrowed("Transfer-Ignore"),
        "transfer-complete" => Cow::Borrowed("Transfer-Complete"),
        // Generic/HTTP-ish ones that appear in both directions
        "date" => Cow::Borrowed("Date"),
        "server" => Cow::Borrowed("Server"),
        "connection" => Cow::Borrowed("Connection"),
        "content-length" => Cow::Borrowed("Content-Length"),
        "content-type" => Cow::Borrowed("Content-Type"),
        "cache-control" => Cow::Borrowed("Cache-Control"),
        "expires" => Cow::Borrowed("Expires"),
        // Fallback: Title-Case each hyphen-separated token.
        _ => {
            let mut out = String::with_capacity(name.len());
            for (i, seg) in name.split('-').enumerate() {
                if i > 0 {
                    out.push('-');
                }
                let mut chars = seg.chars();
                if let Some(c0) = chars.next() {
                    out.extend(c0.to_uppercase());
                    for c in chars {
                        out.extend(c.to_lowercase());
                    }
                }
            }
            Cow::Owned(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_encapsulated_variants() {
        let e = parse_encapsulated("req-hdr=0, req-body=123").unwrap();
        assert_eq!(e, vec![(Section::ReqHdr, 0), (Section::ReqBody, 123)]);

        let e = parse_encapsulated("req-hdr=0, res-hdr=75, res-body=200").unwrap();
        assert_eq!(
            e,
            vec![
                (Section::ReqHdr, 0),
                (Section::ResHdr, 75),
                (Section::ResBody, 200)
            ]
        );

        let e = parse_encapsulated("null-body=0").unwrap();
        assert_eq!(e, vec![(Section::NullBody, 0)]);
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = parse_encapsulated("totally-wrong=0").unwrap_err();
        assert!(err.to_string().contains("Encapsulated label"));
    }

    #[test]
    fn negative_or_garbage_offset_is_rejected() {
        assert!(parse_encapsulated("res-body=-5").is_err());
        assert!(parse_encapsulated("res-body=abc").is_err());
        assert!(parse_encapsulated("res-body").is_err());
    }

    #[test]
    fn decreasing_offsets_are_rejected() {
        let err = parse_encapsulated("res-hdr=50, res-body=10").unwrap_err();
        assert!(err.to_string().contains("must not decrease"));
    }

    #[test]
    fn sections_after_null_body_are_rejected() {
        let err = parse_encapsulated("null-body=0, res-body=10").unwrap_err();
        assert!(err.to_string().contains("null-body"));
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canon_header("istag"), "ISTag");
        assert_eq!(canon_header("encapsulated"), "Encapsulated");
        assert_eq!(canon_header("x-icap-modified"), "X-Icap-Modified");
        assert_eq!(canon_header("via"), "Via");
    }
}
