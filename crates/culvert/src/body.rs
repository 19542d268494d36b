//! Streaming response bodies.
//!
//! [`ResponseBody`] owns the pipe connection for the rest of the exchange
//! and applies the response's framing while the caller reads. Dropping it
//! closes the connection.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use http::{header, HeaderMap, Method, StatusCode};
use tokio::io::{AsyncBufRead, AsyncRead, BufReader, ReadBuf};

use crate::error::TransportError;
use crate::pipe::PipeStream;

/// Longest accepted chunk-size or trailer line.
const MAX_CHUNK_LINE: usize = 1024;

/// How the remaining body bytes are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Framing {
    /// The head is the whole message.
    None,
    /// Exactly `remaining` bytes follow.
    Length { remaining: u64 },
    /// Chunked transfer coding.
    Chunked(ChunkState),
    /// The body runs until the peer closes the connection.
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ChunkState {
    /// Reading a chunk-size line.
    Size,
    /// Inside chunk data with `remaining` bytes left.
    Data { remaining: u64 },
    /// Consuming the CRLF that terminates a chunk.
    TrailingCrlf { seen: u8 },
    /// Skipping trailer lines after the last chunk.
    Trailers,
    /// Final chunk and trailers consumed.
    Done,
}

/// Picks the body framing for a response per RFC 7230 section 3.3.3.
///
/// `method` is the request method the response answers; HEAD responses and
/// the bodiless status codes frame as [`Framing::None`] no matter what the
/// headers claim.
pub(crate) fn framing_for(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<Framing, TransportError> {
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || (method == Method::CONNECT && status.is_success())
    {
        return Ok(Framing::None);
    }

    let mut last_coding: Option<String> = None;
    for value in headers.get_all(header::TRANSFER_ENCODING) {
        let value = value.to_str().map_err(|_| {
            TransportError::MalformedResponse("invalid transfer-encoding value".into())
        })?;
        for token in value.split(',') {
            let token = token.trim();
            if !token.is_empty() {
                last_coding = Some(token.to_ascii_lowercase());
            }
        }
    }
    if let Some(coding) = last_coding {
        if coding == "chunked" {
            return Ok(Framing::Chunked(ChunkState::Size));
        }
        return Err(TransportError::MalformedResponse(format!(
            "unsupported transfer encoding: {coding}"
        )));
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all(header::CONTENT_LENGTH) {
        let value = value.to_str().map_err(|_| {
            TransportError::MalformedResponse("invalid content-length value".into())
        })?;
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let parsed: u64 = token.parse().map_err(|_| {
                TransportError::MalformedResponse(format!("invalid content-length {token:?}"))
            })?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(TransportError::MalformedResponse(
                        "conflicting content-length values".into(),
                    ));
                }
                _ => length = Some(parsed),
            }
        }
    }
    if let Some(remaining) = length {
        return Ok(Framing::Length { remaining });
    }

    Ok(Framing::Eof)
}

/// Streaming body of a response, owning the connection it arrives on.
///
/// Reading yields the decoded body bytes (chunk framing stripped, lengths
/// enforced). A length-framed body cut short by the peer surfaces
/// [`io::ErrorKind::UnexpectedEof`]. Dropping the body closes the
/// connection; the transport itself never does.
pub struct ResponseBody {
    conn: BufReader<PipeStream>,
    /// Bytes the head parser over-read, served before the connection.
    prefix: BytesMut,
    framing: Framing,
    /// Scratch for chunk-size and trailer lines.
    line: BytesMut,
}

impl ResponseBody {
    pub(crate) fn new(conn: BufReader<PipeStream>, prefix: BytesMut, framing: Framing) -> Self {
        Self {
            conn,
            prefix,
            framing,
            line: BytesMut::new(),
        }
    }

    fn poll_source<'a>(
        prefix: &'a mut BytesMut,
        conn: &'a mut BufReader<PipeStream>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<&'a [u8]>> {
        if !prefix.is_empty() {
            return Poll::Ready(Ok(&prefix[..]));
        }
        Pin::new(conn).poll_fill_buf(cx)
    }

    fn consume_source(prefix: &mut BytesMut, conn: &mut BufReader<PipeStream>, amt: usize) {
        if !prefix.is_empty() {
            prefix.advance(amt);
        } else {
            Pin::new(conn).consume(amt);
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("framing", &self.framing)
            .field("buffered", &self.prefix.len())
            .finish()
    }
}

fn fill_from(buf: &mut ReadBuf<'_>, available: &[u8], limit: usize) -> usize {
    let n = available.len().min(limit).min(buf.remaining());
    buf.put_slice(&available[..n]);
    n
}

fn eof_err(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg)
}

fn data_err(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl AsyncRead for ResponseBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match &mut this.framing {
                Framing::None => return Poll::Ready(Ok(())),

                Framing::Length { remaining } => {
                    if *remaining == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    let available =
                        ready!(Self::poll_source(&mut this.prefix, &mut this.conn, cx))?;
                    if available.is_empty() {
                        return Poll::Ready(Err(eof_err(
                            "connection closed with body bytes outstanding",
                        )));
                    }
                    let limit = usize::try_from(*remaining).unwrap_or(usize::MAX);
                    let n = fill_from(buf, available, limit);
                    Self::consume_source(&mut this.prefix, &mut this.conn, n);
                    *remaining -= n as u64;
                    return Poll::Ready(Ok(()));
                }

                Framing::Eof => {
                    let available =
                        ready!(Self::poll_source(&mut this.prefix, &mut this.conn, cx))?;
                    if available.is_empty() {
                        return Poll::Ready(Ok(()));
                    }
                    let n = fill_from(buf, available, usize::MAX);
                    Self::consume_source(&mut this.prefix, &mut this.conn, n);
                    return Poll::Ready(Ok(()));
                }

                Framing::Chunked(state) => match state {
                    ChunkState::Size => {
                        let available =
                            ready!(Self::poll_source(&mut this.prefix, &mut this.conn, cx))?;
                        if available.is_empty() {
                            return Poll::Ready(Err(eof_err(
                                "connection closed in chunk size line",
                            )));
                        }
                        let upto = match available.iter().position(|&b| b == b'\n') {
                            Some(pos) => pos + 1,
                            None => available.len(),
                        };
                        this.line.extend_from_slice(&available[..upto]);
                        Self::consume_source(&mut this.prefix, &mut this.conn, upto);
                        if this.line.len() > MAX_CHUNK_LINE {
                            return Poll::Ready(Err(data_err("chunk size line too long")));
                        }
                        if this.line.last() != Some(&b'\n') {
                            continue;
                        }
                        match httparse::parse_chunk_size(&this.line) {
                            Ok(httparse::Status::Complete((_, 0))) => {
                                this.line.clear();
                                *state = ChunkState::Trailers;
                            }
                            Ok(httparse::Status::Complete((_, size))) => {
                                this.line.clear();
                                *state = ChunkState::Data { remaining: size };
                            }
                            _ => {
                                return Poll::Ready(Err(data_err("invalid chunk size line")));
                            }
                        }
                    }

                    ChunkState::Data { remaining } => {
                        let available =
                            ready!(Self::poll_source(&mut this.prefix, &mut this.conn, cx))?;
                        if available.is_empty() {
                            return Poll::Ready(Err(eof_err("connection closed mid chunk")));
                        }
                        let limit = usize::try_from(*remaining).unwrap_or(usize::MAX);
                        let n = fill_from(buf, available, limit);
                        Self::consume_source(&mut this.prefix, &mut this.conn, n);
                        *remaining -= n as u64;
                        if *remaining == 0 {
                            *state = ChunkState::TrailingCrlf { seen: 0 };
                        }
                        return Poll::Ready(Ok(()));
                    }

                    ChunkState::TrailingCrlf { seen } => {
                        let available =
                            ready!(Self::poll_source(&mut this.prefix, &mut this.conn, cx))?;
                        if available.is_empty() {
                            return Poll::Ready(Err(eof_err(
                                "connection closed before chunk terminator",
                            )));
                        }
                        let expected: &[u8] = if *seen == 0 { b"\r\n" } else { b"\n" };
                        let take = available.len().min(expected.len());
                        if available[..take] != expected[..take] {
                            return Poll::Ready(Err(data_err("missing CRLF after chunk data")));
                        }
                        Self::consume_source(&mut this.prefix, &mut this.conn, take);
                        *seen += take as u8;
                        if *seen == 2 {
                            *state = ChunkState::Size;
                        }
                    }

                    ChunkState::Trailers => {
                        let available =
                            ready!(Self::poll_source(&mut this.prefix, &mut this.conn, cx))?;
                        if available.is_empty() {
                            return Poll::Ready(Err(eof_err("connection closed in trailers")));
                        }
                        let upto = match available.iter().position(|&b| b == b'\n') {
                            Some(pos) => pos + 1,
                            None => available.len(),
                        };
                        this.line.extend_from_slice(&available[..upto]);
                        Self::consume_source(&mut this.prefix, &mut this.conn, upto);
                        if this.line.len() > MAX_CHUNK_LINE {
                            return Poll::Ready(Err(data_err("trailer line too long")));
                        }
                        if this.line.last() != Some(&b'\n') {
                            continue;
                        }
                        let blank = matches!(&this.line[..], [b'\r', b'\n'] | [b'\n']);
                        this.line.clear();
                        if blank {
                            *state = ChunkState::Done;
                        }
                    }

                    ChunkState::Done => return Poll::Ready(Ok(())),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                http::header::HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_head_response_has_no_body() {
        let framing = framing_for(
            &Method::HEAD,
            StatusCode::OK,
            &headers(&[("content-length", "42")]),
        )
        .unwrap();
        assert_eq!(framing, Framing::None);
    }

    #[test]
    fn test_bodiless_statuses() {
        for status in [
            StatusCode::CONTINUE,
            StatusCode::NO_CONTENT,
            StatusCode::NOT_MODIFIED,
        ] {
            let framing = framing_for(&Method::GET, status, &HeaderMap::new()).unwrap();
            assert_eq!(framing, Framing::None, "status {status}");
        }
    }

    #[test]
    fn test_chunked_wins_over_length() {
        let framing = framing_for(
            &Method::GET,
            StatusCode::OK,
            &headers(&[("transfer-encoding", "chunked"), ("content-length", "10")]),
        )
        .unwrap();
        assert_eq!(framing, Framing::Chunked(ChunkState::Size));
    }

    #[test]
    fn test_non_chunked_transfer_encoding_rejected() {
        let err = framing_for(
            &Method::GET,
            StatusCode::OK,
            &headers(&[("transfer-encoding", "gzip, chunked, gzip")]),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse(_)), "{err}");
    }

    #[test]
    fn test_duplicate_content_lengths_must_agree() {
        let framing = framing_for(
            &Method::GET,
            StatusCode::OK,
            &headers(&[("content-length", "7"), ("content-length", "7")]),
        )
        .unwrap();
        assert_eq!(framing, Framing::Length { remaining: 7 });

        let err = framing_for(
            &Method::GET,
            StatusCode::OK,
            &headers(&[("content-length", "7"), ("content-length", "8")]),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse(_)), "{err}");
    }

    #[test]
    fn test_no_framing_headers_means_read_to_eof() {
        let framing = framing_for(&Method::GET, StatusCode::OK, &HeaderMap::new()).unwrap();
        assert_eq!(framing, Framing::Eof);
    }
}

#[cfg(all(test, unix))]
mod stream_tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn body_over_wire(prefix: &[u8], wire: &'static [u8], framing: Framing) -> ResponseBody {
        let (client, mut server) = tokio::net::UnixStream::pair().unwrap();
        tokio::spawn(async move {
            // The reader may drop early (bodiless framing); that is fine.
            let _ = server.write_all(wire).await;
        });
        let conn = BufReader::new(PipeStream::from_unix(client));
        ResponseBody::new(conn, BytesMut::from(prefix), framing)
    }

    #[tokio::test]
    async fn test_length_body_serves_prefix_first() {
        let mut body =
            body_over_wire(b"he", b"llo", Framing::Length { remaining: 5 }).await;
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_length_body_stops_at_limit() {
        // Peer sends more than the declared length; the excess is not ours.
        let mut body = body_over_wire(b"", b"hello extra", Framing::Length { remaining: 5 }).await;
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_truncated_length_body_errors() {
        let mut body = body_over_wire(b"", b"he", Framing::Length { remaining: 5 }).await;
        let mut out = Vec::new();
        let err = body.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_chunked_body_reassembles() {
        let wire = b"5\r\nhello\r\n6;note=1\r\n world\r\n0\r\nexpires: never\r\n\r\n";
        let mut body = body_over_wire(b"", wire, Framing::Chunked(ChunkState::Size)).await;
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_chunked_body_truncated_errors() {
        let mut body = body_over_wire(b"", b"5\r\nhe", Framing::Chunked(ChunkState::Size)).await;
        let mut out = Vec::new();
        let err = body.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_invalid_chunk_size_errors() {
        let mut body =
            body_over_wire(b"", b"zz\r\nhello\r\n", Framing::Chunked(ChunkState::Size)).await;
        let mut out = Vec::new();
        let err = body.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_eof_body_reads_until_close() {
        let mut body = body_over_wire(b"head", b" and tail", Framing::Eof).await;
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"head and tail");
    }

    #[tokio::test]
    async fn test_none_body_is_immediately_empty() {
        let mut body = body_over_wire(b"stray", b"bytes", Framing::None).await;
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }
}
