//! HTTP/1.1 wire hookup: request serialization and response head parsing.
//!
//! Only the glue lives here. Message types come from the `http` crate and
//! the parsing itself is done by `httparse`; this module drives them over
//! an async byte stream.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{header, HeaderMap, Method, Request, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Header slots offered to the parser; more than this is rejected.
const MAX_RESPONSE_HEADERS: usize = 64;

/// Growth cap for an incomplete response head.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// A parsed response head plus any bytes read past it.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) status: StatusCode,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    /// Body bytes that arrived in the same reads as the head.
    pub(crate) leftover: BytesMut,
}

/// Writes `req` onto `writer` as an HTTP/1.1 message and flushes.
///
/// The target is written in origin form; a `host` header derived from the
/// URI authority is added unless the caller set one, and `content-length`
/// is added for requests that carry or imply a body. Caller headers pass
/// through untouched. Bodies are never chunk-encoded on the way out.
pub(crate) async fn write_request<W>(writer: &mut W, req: &Request<Bytes>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = encode_request_head(req);
    writer.write_all(&head).await?;
    if !req.body().is_empty() {
        writer.write_all(req.body()).await?;
    }
    writer.flush().await
}

fn encode_request_head(req: &Request<Bytes>) -> BytesMut {
    let mut head = BytesMut::with_capacity(256);

    let target = match req.uri().path_and_query() {
        Some(pq) if !pq.as_str().is_empty() => pq.as_str(),
        _ => "/",
    };
    head.extend_from_slice(req.method().as_str().as_bytes());
    head.extend_from_slice(b" ");
    head.extend_from_slice(target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    if !req.headers().contains_key(header::HOST) {
        if let Some(authority) = req.uri().authority() {
            head.extend_from_slice(b"host: ");
            head.extend_from_slice(authority.as_str().as_bytes());
            head.extend_from_slice(b"\r\n");
        }
    }

    for (name, value) in req.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    let implies_body = !req.body().is_empty()
        || req.method() == Method::POST
        || req.method() == Method::PUT
        || req.method() == Method::PATCH;
    if implies_body
        && !req.headers().contains_key(header::CONTENT_LENGTH)
        && !req.headers().contains_key(header::TRANSFER_ENCODING)
    {
        head.extend_from_slice(format!("content-length: {}\r\n", req.body().len()).as_bytes());
    }

    head.extend_from_slice(b"\r\n");
    head
}

/// Reads from `reader` until a complete status line and header block has
/// been parsed.
///
/// Over-read bytes are returned in [`ResponseHead::leftover`] so the body
/// reader can serve them first.
pub(crate) async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let n = reader
            .read_buf(&mut buf)
            .await
            .map_err(TransportError::ReadResponse)?;
        if n == 0 {
            return Err(TransportError::ReadResponse(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response head completed",
            )));
        }

        let mut storage = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
        let mut response = httparse::Response::new(&mut storage);
        match response.parse(&buf)? {
            httparse::Status::Complete(head_len) => {
                let code = response.code.unwrap_or(0);
                let status = StatusCode::from_u16(code).map_err(|_| {
                    TransportError::MalformedResponse(format!("invalid status code {code}"))
                })?;
                let version = match response.version {
                    Some(0) => Version::HTTP_10,
                    _ => Version::HTTP_11,
                };

                let mut headers = HeaderMap::with_capacity(response.headers.len());
                for h in response.headers.iter() {
                    let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| {
                        TransportError::MalformedResponse(format!("invalid header name {:?}", h.name))
                    })?;
                    let value = HeaderValue::from_bytes(h.value).map_err(|_| {
                        TransportError::MalformedResponse(format!("invalid value for {}", h.name))
                    })?;
                    headers.append(name, value);
                }

                buf.advance(head_len);
                return Ok(ResponseHead {
                    status,
                    version,
                    headers,
                    leftover: buf,
                });
            }
            httparse::Status::Partial => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(TransportError::MalformedResponse(format!(
                        "response head exceeds {MAX_HEAD_BYTES} bytes"
                    )));
                }
            }
        }
    }
}
