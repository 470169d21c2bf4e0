//! Tokio UDP transport and the packet endpoint built on it.

use crate::address::Destination;
use crate::buffer::Buffer;
use crate::endpoint::{Closer, Headroom, PacketEndpoint, PacketSink, PacketSource};
use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

const SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

/// UDP socket with traffic counters and a close that wakes receivers.
///
/// Clones share the socket, the counters and the closed state.
#[derive(Debug, Clone)]
pub struct AsyncUdpTransport {
    socket: Arc<UdpSocket>,
    closed: CancellationToken,
    counters: Arc<Counters>,
}

impl AsyncUdpTransport {
    /// Bind a socket with 2 MiB kernel buffers.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the socket cannot be
    /// created, tuned or bound.
    pub async fn bind<A: Into<SocketAddr>>(addr: A) -> TransportResult<Self> {
        let addr = addr.into();
        let bind_failed = |source| TransportError::BindFailed { addr, source };

        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let socket =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(bind_failed)?;
        socket
            .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(bind_failed)?;
        socket
            .set_send_buffer_size(SOCKET_BUFFER_SIZE)
            .map_err(bind_failed)?;
        socket.bind(&addr.into()).map_err(bind_failed)?;
        socket.set_nonblocking(true).map_err(bind_failed)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(bind_failed)?;
        Ok(Self::from_socket(socket))
    }

    /// Bind an ephemeral port in the same family as `peer`.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub async fn bind_for(peer: &SocketAddr) -> TransportResult<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Self::bind(local).await
    }

    /// Wrap an already bound socket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            closed: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
        }
    }
}

#[async_trait]
impl Transport for AsyncUdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        match self.socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.counters
                    .bytes_sent
                    .fetch_add(sent as u64, Ordering::Relaxed);
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let received = tokio::select! {
            () = self.closed.cancelled() => return Err(TransportError::Closed),
            received = self.socket.recv_from(buf) => received,
        };

        match received {
            Ok((size, from)) => {
                self.counters
                    .bytes_received
                    .fetch_add(size as u64, Ordering::Relaxed);
                self.counters
                    .packets_received
                    .fetch_add(1, Ordering::Relaxed);
                Ok((size, from))
            }
            Err(e) => {
                self.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn stats(&self) -> TransportStats {
        let c = &self.counters;
        TransportStats {
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            packets_received: c.packets_received.load(Ordering::Relaxed),
            send_errors: c.send_errors.load(Ordering::Relaxed),
            recv_errors: c.recv_errors.load(Ordering::Relaxed),
        }
    }
}

/// Receive half of a UDP packet endpoint.
pub struct UdpPacketSource {
    transport: Arc<dyn Transport>,
}

#[async_trait]
impl PacketSource for UdpPacketSource {
    async fn read_packet(&mut self, buffer: &mut Buffer) -> io::Result<Option<Destination>> {
        match self.transport.recv_from(buffer.writable()).await {
            Ok((n, from)) => {
                buffer.commit(n).map_err(io::Error::other)?;
                Ok(Some(Destination::Ip(from)))
            }
            Err(TransportError::Closed) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Send half of a UDP packet endpoint. Domain destinations are resolved
/// per packet.
pub struct UdpPacketSink {
    transport: Arc<dyn Transport>,
}

impl Headroom for UdpPacketSink {}

#[async_trait]
impl PacketSink for UdpPacketSink {
    async fn write_packet(
        &mut self,
        buffer: &mut Buffer,
        destination: &Destination,
    ) -> io::Result<()> {
        let addr = destination.resolve().await?;
        self.transport.send_to(buffer.bytes(), addr).await?;
        Ok(())
    }
}

/// Packet endpoint over any [`Transport`], closed by closing the transport.
pub struct UdpPacketEndpoint;

impl UdpPacketEndpoint {
    /// Build the relay endpoint.
    pub fn new(transport: Arc<dyn Transport>) -> PacketEndpoint {
        let closing = transport.clone();
        PacketEndpoint::new(
            Box::new(UdpPacketSource {
                transport: transport.clone(),
            }),
            Box::new(UdpPacketSink { transport }),
            Closer::new(move || closing.close()),
        )
    }

    /// Bind an ephemeral socket suited to reach `peer` and wrap it.
    ///
    /// # Errors
    ///
    /// See [`AsyncUdpTransport::bind`].
    pub async fn bind_for(peer: &SocketAddr) -> TransportResult<PacketEndpoint> {
        let transport = AsyncUdpTransport::bind_for(peer).await?;
        Ok(Self::new(Arc::new(transport)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn loopback() -> AsyncUdpTransport {
        AsyncUdpTransport::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_recv_counts() {
        let server = loopback().await;
        let client = loopback().await;
        let server_addr = server.local_addr().unwrap();

        assert_eq!(client.send_to(b"datagram", server_addr).await.unwrap(), 8);
        let mut buf = [0u8; 64];
        let (n, from) = timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(&buf[..n], b"datagram");
        assert_eq!(from, client.local_addr().unwrap());

        assert_eq!(client.stats().packets_sent, 1);
        assert_eq!(server.stats().bytes_received, 8);
    }

    #[tokio::test]
    async fn test_close_wakes_receiver() {
        let transport = loopback().await;
        let waiter = transport.clone();
        let recv = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            waiter.recv_from(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.close();
        let result = timeout(Duration::from_secs(1), recv).await.unwrap().unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(matches!(
            transport.send_to(b"x", "127.0.0.1:9".parse().unwrap()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_packet_endpoint_roundtrip() {
        let echo = loopback().await;
        let echo_addr = echo.local_addr().unwrap();
        let endpoint = UdpPacketEndpoint::bind_for(&echo_addr).await.unwrap();
        let (mut source, mut sink) = (endpoint.source.unwrap(), endpoint.sink.unwrap());

        let mut out = Buffer::from_slice(b"ping");
        sink.write_packet(&mut out, &Destination::Ip(echo_addr))
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = echo.recv_from(&mut buf).await.unwrap();
        echo.send_to(&buf[..n], from).await.unwrap();

        let mut inbound = Buffer::new(64);
        let origin = timeout(Duration::from_secs(1), source.read_packet(&mut inbound))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(origin, Some(Destination::Ip(echo_addr)));
        assert_eq!(inbound.bytes(), b"ping");

        endpoint.closer.close();
        assert_eq!(source.read_packet(&mut inbound).await.unwrap(), None);
    }
}
