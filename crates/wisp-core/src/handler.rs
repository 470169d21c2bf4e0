//! Upstream handler interface.
//!
//! The service authenticates and decrypts; what happens to the resulting
//! connections is up to the [`Handler`] it was built with.

use crate::error::Error;
use crate::nat::NatConn;
use crate::server_conn::ServerConn;
use async_trait::async_trait;
use std::net::SocketAddr;
use tracing::warn;
use wisp_transport::Destination;

/// Where an accepted connection or packet flow came from and is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Protocol that accepted it
    pub protocol: &'static str,
    /// Peer address
    pub source: SocketAddr,
    /// Requested destination
    pub destination: Destination,
}

impl Metadata {
    /// Metadata for a flow from `source` that has no destination yet.
    #[must_use]
    pub fn inbound(protocol: &'static str, source: SocketAddr) -> Self {
        Self {
            protocol,
            source,
            destination: Destination::Ip(source),
        }
    }
}

/// Consumer of authenticated connections.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Serve one authenticated stream connection.
    async fn new_connection(&self, conn: ServerConn, metadata: Metadata) -> Result<(), Error>;

    /// Serve one datagram session, called once on its first packet.
    async fn new_packet_connection(&self, conn: NatConn, metadata: Metadata)
    -> Result<(), Error>;

    /// Report a failure that has no caller to return to.
    fn handle_error(&self, error: Error) {
        warn!(error = %error, "connection failed");
    }
}
