//! TCP endpoints.

use crate::address::Destination;
use crate::buffer::Buffer;
use crate::copy::{CopyError, copy_extended};
use crate::endpoint::{Closer, Endpoint, Headroom, SelfFilling, Sink, Source};
use crate::io::StreamParts;
use async_trait::async_trait;
use socket2::SockRef;
use std::io;
use std::net::{Shutdown, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

/// Connected TCP stream with a close action usable from any half.
#[derive(Debug)]
pub struct TcpEndpoint {
    stream: TcpStream,
    closer: Closer,
}

impl TcpEndpoint {
    /// Take over `stream`, enabling keepalive and disabling Nagle.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be duplicated for the close action.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let std_stream = stream.into_std()?;
        let handle = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;

        let sock = SockRef::from(&stream);
        sock.set_keepalive(true)?;
        sock.set_tcp_nodelay(true)?;

        let closer = Closer::new(move || {
            if let Err(e) = handle.shutdown(Shutdown::Both) {
                debug!(error = %e, "tcp shutdown on close");
            }
        });
        Ok(Self { stream, closer })
    }

    /// Dial `destination`, resolving domain names.
    ///
    /// # Errors
    ///
    /// Returns resolver or connect failures.
    pub async fn connect(destination: &Destination) -> io::Result<Self> {
        let stream = match destination {
            Destination::Ip(addr) => TcpStream::connect(addr).await?,
            Destination::Domain(name, port) => TcpStream::connect((name.as_str(), *port)).await?,
        };
        Self::new(stream)
    }

    /// Remote address.
    ///
    /// # Errors
    ///
    /// Fails if the socket is no longer connected.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Close action shared with every half.
    #[must_use]
    pub fn closer(&self) -> Closer {
        self.closer.clone()
    }

    /// Split into a raw source, a raw sink and the close action.
    pub fn into_split(self) -> (TcpSource, TcpSink, Closer) {
        let (read, write) = self.stream.into_split();
        (TcpSource { read }, TcpSink { write }, self.closer)
    }

    /// View as a relay endpoint.
    pub fn into_endpoint(self) -> Endpoint {
        let (source, sink, closer) = self.into_split();
        Endpoint::new(Box::new(source), Box::new(sink), closer)
    }

    /// View as plain stream halves, for protocol layers.
    pub fn into_parts(self) -> StreamParts {
        let (read, write) = self.stream.into_split();
        StreamParts::new(Box::new(read), Box::new(write), self.closer)
    }
}

/// Read half of a TCP stream.
#[derive(Debug)]
pub struct TcpSource {
    read: OwnedReadHalf,
}

#[async_trait]
impl Source for TcpSource {
    async fn read_buffer(&mut self, buffer: &mut Buffer) -> io::Result<usize> {
        let n = self.read.read(buffer.writable()).await?;
        buffer.commit(n).map_err(io::Error::other)?;
        Ok(n)
    }

    fn is_raw(&self) -> bool {
        true
    }

    fn as_async_read(&mut self) -> Option<&mut (dyn AsyncRead + Unpin + Send)> {
        Some(&mut self.read)
    }
}

/// Write half of a TCP stream.
///
/// Pulls straight from sources that expose their reader, leaving buffer
/// management to tokio.
#[derive(Debug)]
pub struct TcpSink {
    write: OwnedWriteHalf,
}

impl Headroom for TcpSink {}

#[async_trait]
impl Sink for TcpSink {
    async fn write_buffer(&mut self, buffer: &mut Buffer) -> io::Result<()> {
        self.write.write_all(buffer.bytes()).await
    }

    fn is_raw(&self) -> bool {
        true
    }

    fn as_self_filling(&mut self) -> Option<&mut dyn SelfFilling> {
        Some(self)
    }

    fn can_half_close(&self) -> bool {
        true
    }

    async fn close_write(&mut self) -> io::Result<()> {
        self.write.shutdown().await
    }
}

#[async_trait]
impl SelfFilling for TcpSink {
    async fn fill_from(&mut self, source: &mut dyn Source) -> Result<u64, CopyError> {
        if let Some(reader) = source.as_async_read() {
            return Ok(tokio::io::copy(reader, &mut self.write).await?);
        }
        copy_extended(self, source).await
    }
}
