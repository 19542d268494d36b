//! Platform pipe primitives.
//!
//! - Unix: Unix domain socket
//! - Windows: Named pipe (`\\.\pipe\NAME`)
//!
//! [`PipeStream`] is the dial side the transport uses; [`PipeListener`] is
//! the accept side for hosting a pipe service in-process.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, timeout_at, Instant};

/// Delay between connect attempts while the pipe reports busy.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// A connected bidirectional pipe stream.
#[derive(Debug)]
pub struct PipeStream {
    inner: imp::Stream,
}

impl PipeStream {
    /// Connects to the pipe at `path`.
    ///
    /// With a timeout, a pipe that reports busy (every server instance in
    /// use, or a full socket backlog) is re-dialed every few milliseconds
    /// until the deadline; expiry surfaces as [`io::ErrorKind::TimedOut`].
    /// Without one, a single attempt is made and its error returned
    /// verbatim.
    pub async fn connect(path: &str, timeout: Option<Duration>) -> io::Result<PipeStream> {
        let Some(limit) = timeout else {
            let inner = imp::connect(path).await?;
            return Ok(PipeStream { inner });
        };

        let deadline = Instant::now() + limit;
        loop {
            match timeout_at(deadline, imp::connect(path)).await {
                Ok(Ok(inner)) => return Ok(PipeStream { inner }),
                Ok(Err(err)) if imp::is_busy(&err) => {
                    if timeout_at(deadline, sleep(BUSY_RETRY_DELAY)).await.is_err() {
                        return Err(io::Error::from(io::ErrorKind::TimedOut));
                    }
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(io::Error::from(io::ErrorKind::TimedOut)),
            }
        }
    }
}

#[cfg(all(test, unix))]
impl PipeStream {
    pub(crate) fn from_unix(stream: tokio::net::UnixStream) -> PipeStream {
        PipeStream { inner: stream }
    }
}

impl AsyncRead for PipeStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Accept side of a pipe, bound to a path.
#[derive(Debug)]
pub struct PipeListener {
    inner: imp::Listener,
}

impl PipeListener {
    /// Binds a listener at `path`.
    ///
    /// On Unix a stale socket file left at the path is removed first.
    ///
    /// # Panics
    ///
    /// The listener registers with the runtime's reactor at bind time,
    /// so this panics when called outside a Tokio runtime with I/O
    /// enabled.
    pub fn bind(path: &str) -> io::Result<PipeListener> {
        let inner = imp::bind(path)?;
        Ok(PipeListener { inner })
    }

    /// Accepts one connection.
    pub async fn accept(&self) -> io::Result<PipeStream> {
        let inner = imp::accept(&self.inner).await?;
        Ok(PipeStream { inner })
    }

    /// The path this listener is bound to.
    pub fn path(&self) -> &str {
        self.inner.path()
    }
}

#[cfg(unix)]
mod imp {
    use std::io;
    use std::path::Path;

    use tokio::net::{UnixListener, UnixStream};

    pub(super) type Stream = UnixStream;

    pub(super) async fn connect(path: &str) -> io::Result<Stream> {
        UnixStream::connect(path).await
    }

    /// A full listen backlog reports `EAGAIN` from a nonblocking connect.
    pub(super) fn is_busy(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::WouldBlock
    }

    #[derive(Debug)]
    pub(super) struct Listener {
        listener: UnixListener,
        path: String,
    }

    impl Listener {
        pub(super) fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    pub(super) fn bind(path: &str) -> io::Result<Listener> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        Ok(Listener {
            listener,
            path: path.to_string(),
        })
    }

    pub(super) async fn accept(listener: &Listener) -> io::Result<Stream> {
        let (stream, _addr) = listener.listener.accept().await?;
        Ok(stream)
    }
}

#[cfg(windows)]
mod imp {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };
    use tokio::sync::Mutex;

    /// `ERROR_PIPE_BUSY`: every instance of the pipe is in use.
    const ERROR_PIPE_BUSY: i32 = 231;

    #[derive(Debug)]
    pub(super) enum Stream {
        Client(NamedPipeClient),
        Server(NamedPipeServer),
    }

    pub(super) async fn connect(path: &str) -> io::Result<Stream> {
        let client = ClientOptions::new().open(path)?;
        Ok(Stream::Client(client))
    }

    pub(super) fn is_busy(err: &io::Error) -> bool {
        err.raw_os_error() == Some(ERROR_PIPE_BUSY)
    }

    #[derive(Debug)]
    pub(super) struct Listener {
        path: String,
        // Next server instance, created ahead of time so the pipe name
        // stays dialable between accepts.
        server: Mutex<Option<NamedPipeServer>>,
    }

    impl Listener {
        pub(super) fn path(&self) -> &str {
            &self.path
        }
    }

    pub(super) fn bind(path: &str) -> io::Result<Listener> {
        let first = ServerOptions::new().first_pipe_instance(true).create(path)?;
        Ok(Listener {
            path: path.to_string(),
            server: Mutex::new(Some(first)),
        })
    }

    pub(super) async fn accept(listener: &Listener) -> io::Result<Stream> {
        let mut slot = listener.server.lock().await;
        let server = match slot.take() {
            Some(server) => server,
            None => ServerOptions::new().create(&listener.path)?,
        };
        server.connect().await?;
        // Recreated on the next accept if this fails.
        *slot = ServerOptions::new().create(&listener.path).ok();
        Ok(Stream::Server(server))
    }

    impl AsyncRead for Stream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.get_mut() {
                Stream::Client(pipe) => Pin::new(pipe).poll_read(cx, buf),
                Stream::Server(pipe) => Pin::new(pipe).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for Stream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            match self.get_mut() {
                Stream::Client(pipe) => Pin::new(pipe).poll_write(cx, buf),
                Stream::Server(pipe) => Pin::new(pipe).poll_write(cx, buf),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            match self.get_mut() {
                Stream::Client(pipe) => Pin::new(pipe).poll_flush(cx),
                Stream::Server(pipe) => Pin::new(pipe).poll_flush(cx),
            }
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            match self.get_mut() {
                Stream::Client(pipe) => Pin::new(pipe).poll_shutdown(cx),
                Stream::Server(pipe) => Pin::new(pipe).poll_shutdown(cx),
            }
        }
    }
}
