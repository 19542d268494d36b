//! culvert: HTTP over local named pipes
//!
//! An HTTP transport that reaches services over named pipes (Unix domain
//! sockets, or `\\.\pipe\...` on Windows) rather than TCP. Services are
//! addressed by symbolic name:
//!
//! ```text
//! http+pipe://SERVICE/PATH_ETC
//! ```
//!
//! `SERVICE` is resolved to a pipe path through a registry populated with
//! [`Transport::register_service`]; `PATH_ETC` follows ordinary `http:`
//! conventions. Each [`Transport::round_trip`] dials a fresh connection,
//! writes the request, parses the response head, and hands the connection
//! over to the returned body for streaming.
//!
//! ```no_run
//! use bytes::Bytes;
//! use culvert::Transport;
//! use http::Request;
//! use tokio::io::AsyncReadExt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Transport::new()
//!     .with_dial_timeout(std::time::Duration::from_secs(2));
//! transport.register_service("engine", "/run/engine.sock");
//!
//! let request = Request::builder()
//!     .uri("http+pipe://engine/v1/info")
//!     .body(Bytes::new())?;
//! let response = transport.round_trip(request).await?;
//!
//! let mut body = String::new();
//! response.into_body().read_to_string(&mut body).await?;
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod error;
pub mod pipe;
pub mod transport;

mod http1;
mod registry;

/// URL scheme served by the transport.
pub const SCHEME: &str = "http+pipe";

pub use body::ResponseBody;
pub use error::TransportError;
pub use pipe::{PipeListener, PipeStream};
pub use transport::Transport;
