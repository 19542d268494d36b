//! Transport error types

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while executing a request over a pipe.
///
/// Each failing phase of a round trip has its own variants, so callers can
/// tell a dial failure from a write failure from a response that never
/// arrived. Timeouts are separate variants carrying the configured limit;
/// see [`TransportError::is_timeout`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// Request URI is relative (no scheme)
    #[error("request URI has no scheme")]
    MissingScheme,

    /// Request URI scheme is not the scheme this transport serves
    #[error("unsupported protocol scheme: {0}")]
    UnsupportedScheme(String),

    /// Request URI has no host component
    #[error("no host in request URI")]
    MissingHost,

    /// Host does not name a registered service
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Connecting to the pipe failed
    #[error("dial {path}: {source}")]
    Dial {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Connecting to the pipe did not complete within the dial timeout
    #[error("dial {path}: timed out after {limit:?}")]
    DialTimeout { path: String, limit: Duration },

    /// Writing the serialized request failed
    #[error("write request: {0}")]
    WriteRequest(#[source] io::Error),

    /// Writing the request did not complete within the request timeout
    #[error("write request: timed out after {limit:?}")]
    WriteTimeout { limit: Duration },

    /// Reading the response head failed
    #[error("read response: {0}")]
    ReadResponse(#[source] io::Error),

    /// Status line and headers did not arrive within the response header timeout
    #[error("read response header: timed out after {limit:?}")]
    ResponseHeaderTimeout { limit: Duration },

    /// The peer sent bytes that do not form a valid HTTP/1.1 response
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    /// Whether this error is a phase deadline expiring rather than a
    /// failure reported by the OS or the peer.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::DialTimeout { .. }
                | TransportError::WriteTimeout { .. }
                | TransportError::ResponseHeaderTimeout { .. }
        )
    }
}

impl From<httparse::Error> for TransportError {
    fn from(err: httparse::Error) -> Self {
        TransportError::MalformedResponse(err.to_string())
    }
}
