//! The wire codec for HTTP "chunked" transfer encoding, as used for ICAP
//! encapsulated bodies.
//!
//! The reader side is a small state machine driven by the connection's
//! buffered reader; it understands chunk extensions (notably the `ieof`
//! marker a preview uses to say "the whole message fit") and consumes
//! trailer lines through the terminating blank line, leaving the stream
//! positioned at the next ICAP message.
//!
//! The writer side is two free functions. `write_terminator` emits only
//! `0\r\n`; the response writer appends the final bare CRLF itself when it
//! closes the ICAP message.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_LINE_BYTES;

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn eof(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg)
}

/// Read one CRLF-terminated line, capped at [`MAX_LINE_BYTES`].
///
/// Returns `None` on a clean EOF (no bytes read). Trailing CR/LF and
/// whitespace are stripped; leading whitespace is preserved so callers can
/// recognize folded header continuations.
pub(crate) async fn read_line<R>(r: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line: Vec<u8> = Vec::new();
    loop {
        let (used, done) = {
            let buf = r.fill_buf().await?;
            if buf.is_empty() {
                return if line.is_empty() {
                    Ok(None)
                } else {
                    Err(eof("unexpected EOF in line"))
                };
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    line.extend_from_slice(&buf[..pos]);
                    (pos + 1, true)
                }
                None => {
                    line.extend_from_slice(buf);
                    (buf.len(), false)
                }
            }
        };
        r.consume(used);
        if line.len() > MAX_LINE_BYTES {
            return Err(invalid("header line too long"));
        }
        if done {
            while let Some(&b) = line.last() {
                if b == b'\r' || b == b' ' || b == b'\t' {
                    line.pop();
                } else {
                    break;
                }
            }
            return Ok(Some(line));
        }
    }
}

/// Parse a `hex-size[;ext]` chunk-size line. Returns the size and whether
/// the `ieof` extension was present.
fn parse_chunk_size(line: &[u8]) -> io::Result<(u64, bool)> {
    let text = std::str::from_utf8(line).map_err(|_| invalid("malformed chunk size"))?;
    let (size_part, ext) = match text.split_once(';') {
        Some((s, e)) => (s, e),
        None => (text, ""),
    };
    let size =
        u64::from_str_radix(size_part.trim(), 16).map_err(|_| invalid("malformed chunk size"))?;
    let ieof = ext
        .split(';')
        .any(|t| t.trim().eq_ignore_ascii_case("ieof"));
    Ok((size, ieof))
}

#[derive(Debug, Clone, Copy)]
enum State {
    /// Positioned at a chunk-size line.
    Size,
    /// Inside chunk data with `remaining` payload bytes left.
    Data { remaining: u64 },
    /// Preview terminator seen without `ieof`; waiting for a 100 Continue.
    Paused,
    Eof,
}

/// Decoder for a chunked body read off a buffered stream.
///
/// In preview mode a zero chunk without the `ieof` extension pauses the
/// decoder instead of ending the stream; [`ChunkDecoder::resume`] re-arms
/// it once the peer has been told to continue.
#[derive(Debug)]
pub(crate) struct ChunkDecoder {
    state: State,
    preview: bool,
}

impl ChunkDecoder {
    pub(crate) fn new(preview: bool) -> Self {
        ChunkDecoder {
            state: State::Size,
            preview,
        }
    }

    pub(crate) fn paused(&self) -> bool {
        matches!(self.state, State::Paused)
    }

    /// Re-arm a paused decoder. The continuation the client sends is a
    /// plain chunk stream, so preview handling is switched off.
    pub(crate) fn resume(&mut self) {
        if matches!(self.state, State::Paused) {
            self.state = State::Size;
            self.preview = false;
        }
    }

    /// Consume the next chunk-size line (and, for the terminator, the
    /// trailer block through its blank line).
    async fn next_chunk<R>(&mut self, r: &mut R) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let line = read_line(r)
            .await?
            .ok_or_else(|| eof("unexpected EOF before chunk size"))?;
        let (size, ieof) = parse_chunk_size(&line)?;
        if size == 0 {
            loop {
                let l = read_line(r)
                    .await?
                    .ok_or_else(|| eof("unexpected EOF in chunk trailer"))?;
                if l.is_empty() {
                    break;
                }
            }
            self.state = if self.preview && !ieof {
                State::Paused
            } else {
                State::Eof
            };
        } else {
            self.state = State::Data { remaining: size };
        }
        Ok(())
    }

    /// Advance to the first chunk so that framing errors surface before a
    /// handler runs. No payload bytes are consumed.
    pub(crate) async fn prime<R>(&mut self, r: &mut R) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        if matches!(self.state, State::Size) {
            self.next_chunk(r).await?;
        }
        Ok(())
    }

    pub(crate) async fn read<R>(&mut self, r: &mut R, out: &mut [u8]) -> io::Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            match self.state {
                State::Eof | State::Paused => return Ok(0),
                State::Size => self.next_chunk(r).await?,
                State::Data { remaining } => {
                    if out.is_empty() {
                        return Ok(0);
                    }
                    let want = remaining.min(out.len() as u64) as usize;
                    let got = r.read(&mut out[..want]).await?;
                    if got == 0 {
                        return Err(eof("unexpected EOF in chunk data"));
                    }
                    let left = remaining - got as u64;
                    if left == 0 {
                        let mut crlf = [0u8; 2];
                        r.read_exact(&mut crlf).await?;
                        if &crlf != b"\r\n" {
                            return Err(invalid("missing chunk CRLF"));
                        }
                        self.state = State::Size;
                    } else {
                        self.state = State::Data { remaining: left };
                    }
                    return Ok(got);
                }
            }
        }
    }
}

/// Write one chunk. Zero-length writes are dropped: an empty chunk would
/// read as the end-of-stream terminator.
pub(crate) async fn write_chunk<W>(w: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    let header = format!("{:x}\r\n", data.len());
    w.write_all(header.as_bytes()).await?;
    w.write_all(data).await?;
    w.write_all(b"\r\n").await
}

/// Write the `0\r\n` terminator. The final CRLF that closes the ICAP
/// message is appended by the response writer, not here.
pub(crate) async fn write_terminator<W>(w: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(b"0\r\n").await
}
