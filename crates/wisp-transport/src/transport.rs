//! Datagram transport abstraction.
//!
//! The server's UDP listener and the outbound packet endpoints talk to the
//! network through [`Transport`], so protocol code can be driven by a real
//! socket or by an in-memory double in tests.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Datagram transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport was closed
    #[error("transport is closed")]
    Closed,

    /// Binding the local address failed
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// Requested address
        addr: SocketAddr,
        /// Socket error
        source: io::Error,
    },
}

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(e) => e,
            TransportError::Closed => io::Error::new(io::ErrorKind::NotConnected, err),
            TransportError::BindFailed { source, .. } => source,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Async datagram transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `addr`, returning the bytes sent.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] after [`close`](Self::close), otherwise
    /// the socket error.
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize>;

    /// Receive one datagram into `buf`, returning its length and sender.
    ///
    /// A receive blocked when the transport closes returns
    /// [`TransportError::Closed`].
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] or the socket error.
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Bound local address.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Stop the transport and wake blocked receivers.
    fn close(&self);

    /// Whether [`close`](Self::close) was called.
    fn is_closed(&self) -> bool;

    /// Traffic counters.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Traffic counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Datagrams sent
    pub packets_sent: u64,
    /// Datagrams received
    pub packets_received: u64,
    /// Failed sends
    pub send_errors: u64,
    /// Failed receives
    pub recv_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_maps_to_not_connected() {
        let err: io::Error = TransportError::Closed.into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_io_error_passes_through() {
        let err: io::Error =
            TransportError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")).into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_bind_failure_display() {
        let err = TransportError::BindFailed {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:1"));
    }
}
