//! The transport: one HTTP exchange per call, over a registered pipe.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use tokio::io::BufReader;

use crate::body::{framing_for, ResponseBody};
use crate::error::TransportError;
use crate::http1;
use crate::pipe::PipeStream;
use crate::registry::ServiceRegistry;
use crate::SCHEME;

/// HTTP transport that dials named pipes instead of TCP sockets.
///
/// Services are registered up front with [`register_service`]; requests
/// then address them as `http+pipe://SERVICE/PATH`. Every round trip dials
/// a fresh connection, and the returned response's body owns it until the
/// caller drops the body.
///
/// Cloning is cheap and clones share one registry. A single transport may
/// serve any number of concurrent round trips; the registry lock is held
/// only for map access.
///
/// [`register_service`]: Transport::register_service
#[derive(Debug, Clone, Default)]
pub struct Transport {
    dial_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    response_header_timeout: Option<Duration>,
    registry: Arc<ServiceRegistry>,
}

impl Transport {
    /// Creates a transport with no timeouts configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds how long a dial may take, waiting out a busy pipe included.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Bounds how long writing the serialized request may take.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Bounds how long the status line and headers may take to arrive.
    pub fn with_response_header_timeout(mut self, timeout: Duration) -> Self {
        self.response_header_timeout = Some(timeout);
        self
    }

    /// Maps `service_name` to the pipe at `pipe_path`.
    ///
    /// Requests whose URI host equals `service_name` dial that pipe. A
    /// port in the URI is ignored; the host alone is the key.
    ///
    /// # Panics
    ///
    /// Panics if `service_name` is already registered on this transport.
    /// Registering a service twice is a programming error.
    pub fn register_service(&self, service_name: &str, pipe_path: &str) {
        self.registry.register(service_name, pipe_path);
    }

    /// Executes a single HTTP exchange.
    ///
    /// The request URI must be absolute with the [`SCHEME`](crate::SCHEME)
    /// scheme and a registered host; any violation fails before any I/O
    /// happens. The pipe is dialed fresh, the request written, and the
    /// response head parsed, each phase bounded by its configured timeout.
    ///
    /// On success the connection lives on inside the returned
    /// [`ResponseBody`]; drop the body to close it. Failures after the
    /// head has been returned surface as I/O errors from body reads.
    pub async fn round_trip(
        &self,
        req: Request<Bytes>,
    ) -> Result<Response<ResponseBody>, TransportError> {
        let scheme = req
            .uri()
            .scheme_str()
            .ok_or(TransportError::MissingScheme)?;
        if scheme != SCHEME {
            return Err(TransportError::UnsupportedScheme(scheme.to_string()));
        }
        let host = req
            .uri()
            .host()
            .filter(|host| !host.is_empty())
            .ok_or(TransportError::MissingHost)?;

        let pipe_path = self
            .registry
            .lookup(host)
            .ok_or_else(|| TransportError::UnknownService(host.to_string()))?;

        tracing::debug!("Dialing {} for service {}", pipe_path, host);
        let stream = PipeStream::connect(&pipe_path, self.dial_timeout)
            .await
            .map_err(|err| {
                match self.dial_timeout {
                    Some(limit) if err.kind() == io::ErrorKind::TimedOut => {
                        TransportError::DialTimeout {
                            path: pipe_path.clone(),
                            limit,
                        }
                    }
                    _ => TransportError::Dial {
                        path: pipe_path.clone(),
                        source: err,
                    },
                }
            })?;

        // Read side is buffered; writes pass straight through.
        let mut conn = BufReader::new(stream);

        match deadline(self.request_timeout, http1::write_request(&mut conn, &req)).await {
            Ok(result) => result.map_err(TransportError::WriteRequest)?,
            Err(limit) => return Err(TransportError::WriteTimeout { limit }),
        }

        let head = match deadline(
            self.response_header_timeout,
            http1::read_response_head(&mut conn),
        )
        .await
        {
            Ok(result) => result?,
            Err(limit) => return Err(TransportError::ResponseHeaderTimeout { limit }),
        };
        tracing::debug!("Service {} answered {}", host, head.status);

        let framing = framing_for(req.method(), head.status, &head.headers)?;

        let mut response = Response::new(ResponseBody::new(conn, head.leftover, framing));
        *response.status_mut() = head.status;
        *response.version_mut() = head.version;
        *response.headers_mut() = head.headers;
        Ok(response)
    }
}

/// `tower::Service` front for the transport, for client stacks that take
/// any pluggable HTTP service.
impl tower::Service<Request<Bytes>> for Transport {
    type Response = Response<ResponseBody>;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Bytes>) -> Self::Future {
        let transport = self.clone();
        Box::pin(async move { transport.round_trip(req).await })
    }
}

async fn deadline<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, Duration> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| limit),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str) -> Request<Bytes> {
        Request::builder().uri(uri).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_relative_uri_rejected_without_io() {
        let transport = Transport::new();
        let err = transport.round_trip(get("/v1/info")).await.unwrap_err();
        assert!(matches!(err, TransportError::MissingScheme), "{err}");
    }

    #[tokio::test]
    async fn test_foreign_scheme_rejected_without_io() {
        let transport = Transport::new();
        // A registered service must not be dialed under the wrong scheme;
        // the path is unconnectable, so a dial attempt would change the error.
        transport.register_service("engine", "/nonexistent/culvert/engine.sock");

        let err = transport
            .round_trip(get("http://engine/v1/info"))
            .await
            .unwrap_err();
        match err {
            TransportError::UnsupportedScheme(scheme) => assert_eq!(scheme, "http"),
            other => panic!("expected UnsupportedScheme, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_host_rejected_without_io() {
        let transport = Transport::new();
        // A port-only authority parses with an empty host.
        let err = transport
            .round_trip(get("http+pipe://:8080/v1/info"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::MissingHost), "{err}");
    }

    #[tokio::test]
    async fn test_unregistered_service_rejected_without_io() {
        let transport = Transport::new();
        let err = transport
            .round_trip(get("http+pipe://ghost/v1/info"))
            .await
            .unwrap_err();
        match err {
            TransportError::UnknownService(name) => assert_eq!(name, "ghost"),
            other => panic!("expected UnknownService, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_ignores_port() {
        let transport = Transport::new();
        let err = transport
            .round_trip(get("http+pipe://engine:8080/v1/info"))
            .await
            .unwrap_err();
        // Resolved by host alone, so the port does not change the name
        // reported back.
        match err {
            TransportError::UnknownService(name) => assert_eq!(name, "engine"),
            other => panic!("expected UnknownService, got {other}"),
        }
    }

    #[test]
    #[should_panic(expected = "service engine already registered")]
    fn test_duplicate_service_registration_panics() {
        let transport = Transport::new();
        transport.register_service("engine", "/run/a.sock");
        transport.register_service("engine", "/run/b.sock");
    }

    #[test]
    fn test_clones_share_one_registry() {
        let transport = Transport::new();
        let clone = transport.clone();
        transport.register_service("engine", "/run/a.sock");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            clone.register_service("engine", "/run/b.sock");
        }));
        assert!(result.is_err(), "clone must see the original registration");
    }
}
