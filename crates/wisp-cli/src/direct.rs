//! Handler that relays authenticated connections straight to their
//! destination.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wisp_core::{Error, Handler, Metadata, NatConn, ServerConn};
use wisp_transport::{TcpEndpoint, UdpPacketEndpoint, copy_conn, copy_packet_conn};

/// Direct outbound: TCP connect for streams, one UDP socket per datagram
/// session.
pub struct DirectHandler {
    token: CancellationToken,
}

impl DirectHandler {
    /// Handler whose relays stop when `token` fires.
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Handler for DirectHandler {
    async fn new_connection(&self, conn: ServerConn, metadata: Metadata) -> Result<(), Error> {
        let conn = conn.into_endpoint();
        let outbound = match TcpEndpoint::connect(&metadata.destination).await {
            Ok(outbound) => outbound,
            Err(e) => {
                conn.closer.close();
                return Err(e.into());
            }
        };

        let relayed = copy_conn(&self.token, conn, outbound.into_endpoint()).await?;
        debug!(
            source = %metadata.source,
            destination = %metadata.destination,
            relayed,
            "stream finished"
        );
        Ok(())
    }

    async fn new_packet_connection(
        &self,
        conn: NatConn,
        metadata: Metadata,
    ) -> Result<(), Error> {
        let session = conn.session_id();
        let conn = conn.into_endpoint();
        let outbound = match metadata.destination.resolve().await {
            Ok(peer) => UdpPacketEndpoint::bind_for(&peer).await.map_err(Error::from),
            Err(e) => Err(e.into()),
        };
        let outbound = match outbound {
            Ok(outbound) => outbound,
            Err(e) => {
                conn.closer.close();
                return Err(e);
            }
        };

        let relayed = copy_packet_conn(&self.token, conn, outbound).await?;
        debug!(
            session = %format_args!("{session:016x}"),
            source = %metadata.source,
            relayed,
            "packet session finished"
        );
        Ok(())
    }
}
