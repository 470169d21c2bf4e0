//! Server protocol engine.
//!
//! [`Service`] authenticates inbound streams and datagrams with the
//! pre-shared key and hands the decrypted connections to its [`Handler`].
//! Rejections are never answered on the wire; the caller logs them and
//! drops the connection or packet.

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::handler::{Handler, Metadata};
use crate::nat::UdpNat;
use crate::protocol::{
    HEADER_TYPE_CLIENT, PROTOCOL_NAME, session_cipher, unix_now, validate_timestamp,
};
use crate::server_conn::{ServerConn, ServerSink};
use crate::session_table::SessionTable;
use crate::stream::AeadReader;
use crate::udp::{
    DatagramCipher, PACKET_ID_HEADER_SIZE, ServerPacketWriter, UdpContext, UdpSession,
};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use wisp_crypto::salt_filter::{SALT_WINDOW, SaltFilter};
use wisp_crypto::{Method, PSK_SIZE, SALT_SIZE};
use wisp_transport::{
    Buffer, BufferPool, Destination, StreamParts, Transport, TransportError, UDP_BUFFER_SIZE,
};
use zeroize::Zeroizing;

/// Shortest interval between two janitor sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Server side of the protocol for one pre-shared key.
pub struct Service {
    method: Method,
    psk: Arc<Zeroizing<Vec<u8>>>,
    salt_filter: Mutex<SaltFilter>,
    udp: Arc<UdpContext>,
    nat: UdpNat,
    handler: Arc<dyn Handler>,
}

impl Service {
    /// Build a service that hands authenticated connections to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadKeyLength`] unless the key is 32 bytes.
    pub fn new(config: ServiceConfig, handler: Arc<dyn Handler>) -> Result<Self> {
        if config.psk.len() != PSK_SIZE {
            return Err(Error::BadKeyLength {
                expected: PSK_SIZE,
                actual: config.psk.len(),
            });
        }

        let cipher = DatagramCipher::new(config.method, &config.psk)?;
        info!(
            method = config.method.name(),
            udp_timeout = ?config.udp_timeout,
            "service ready"
        );
        Ok(Self {
            method: config.method,
            psk: Arc::new(config.psk),
            salt_filter: Mutex::new(SaltFilter::new(SALT_WINDOW)),
            udp: Arc::new(UdpContext {
                cipher,
                sessions: SessionTable::new(config.udp_timeout),
            }),
            nat: UdpNat::new(),
            handler,
        })
    }

    /// Cipher family.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Authenticate one inbound stream and pass it to the handler.
    ///
    /// The stream is closed if the handshake fails.
    ///
    /// # Errors
    ///
    /// The handshake rejection, or whatever the handler returns.
    pub async fn new_connection(&self, parts: StreamParts, source: SocketAddr) -> Result<()> {
        let closer = parts.closer.clone();
        let conn = match self.handshake(parts).await {
            Ok(conn) => conn,
            Err(err) => {
                closer.close();
                return Err(err);
            }
        };

        let metadata = Metadata {
            protocol: PROTOCOL_NAME,
            source,
            destination: conn.destination().clone(),
        };
        debug!(source = %source, destination = %metadata.destination, "stream accepted");
        self.handler.new_connection(conn, metadata).await
    }

    /// Run the stream handshake: salt, fixed header, destination, padding.
    ///
    /// # Errors
    ///
    /// [`Error::ReplayDetected`] for a recently seen salt,
    /// [`Error::BadHeaderType`], [`Error::BadTimestamp`], a decrypt or
    /// address failure, or [`Error::Closed`] if the peer hangs up early.
    pub async fn handshake(&self, parts: StreamParts) -> Result<ServerConn> {
        let StreamParts {
            mut reader,
            writer,
            closer,
        } = parts;

        let mut salt = [0u8; SALT_SIZE];
        reader.read_exact(&mut salt).await.map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::Closed,
            _ => Error::Io(err),
        })?;
        if !self.check_salt(&salt) {
            return Err(Error::ReplayDetected);
        }

        let cipher = session_cipher(self.method, &self.psk, &salt)?;
        let mut source = AeadReader::new(reader, cipher);

        let header_type = source.read_u8().await?;
        if header_type != HEADER_TYPE_CLIENT {
            return Err(Error::BadHeaderType(header_type));
        }
        validate_timestamp(source.read_u64().await?, unix_now())?;
        let destination = source.read_destination().await?;
        let padding = source.read_u16().await?;
        source.discard(usize::from(padding)).await?;

        trace!(destination = %destination, padding, "handshake complete");
        let sink = ServerSink::new(self.method, self.psk.clone(), writer, salt);
        Ok(ServerConn::new(destination, source, sink, closer))
    }

    fn check_salt(&self, salt: &[u8]) -> bool {
        self.salt_filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check(salt)
    }

    /// Authenticate one inbound datagram received from `source` on
    /// `transport` and route its payload to the session's connection.
    ///
    /// A session created by this packet is removed again if any later check
    /// fails, so rejected packets leave no state behind.
    ///
    /// # Errors
    ///
    /// [`Error::PacketTooShort`], [`Error::DecryptFailure`],
    /// [`Error::ReplayDetected`], [`Error::BadHeaderType`],
    /// [`Error::BadTimestamp`] or an address decode failure.
    pub fn new_packet(
        &self,
        transport: Arc<dyn Transport>,
        mut buffer: Buffer,
        source: SocketAddr,
    ) -> Result<()> {
        let context = &self.udp;
        let (session_id, packet_id) = context.cipher.open_header(&mut buffer)?;

        let (session, created) = context.sessions.load_or_create(session_id, || {
            UdpSession::accept(
                self.method,
                &self.psk,
                context.cipher.is_split(),
                session_id,
                source,
            )
        })?;
        let guard = NewSession::new(&context.sessions, session_id, &session, created);

        if !session.probe_packet_id(packet_id) {
            return Err(Error::ReplayDetected);
        }
        context.cipher.open_body(session.remote_cipher(), &mut buffer)?;
        buffer.advance(PACKET_ID_HEADER_SIZE)?;

        let destination = parse_client_body(&mut buffer)?;
        session.commit_packet_id(packet_id)?;
        session.set_remote_addr(source);
        guard.keep();
        context.sessions.touch(&session_id);

        let metadata = Metadata {
            protocol: PROTOCOL_NAME,
            source,
            destination,
        };
        let udp = self.udp.clone();
        self.nat.dispatch(
            &self.handler,
            session_id,
            session,
            buffer,
            metadata,
            move |session| ServerPacketWriter::new(udp, session, transport),
        );
        Ok(())
    }

    /// Receive datagrams on `transport` until it closes or `token` fires.
    ///
    /// Rejected packets are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns a socket error other than the transport being closed.
    pub async fn serve_packets(
        &self,
        transport: Arc<dyn Transport>,
        token: &CancellationToken,
    ) -> Result<()> {
        loop {
            let mut buffer = BufferPool::global().get(UDP_BUFFER_SIZE);
            let received = tokio::select! {
                () = token.cancelled() => return Ok(()),
                received = transport.recv_from(buffer.writable()) => received,
            };
            let (n, source) = match received {
                Ok(received) => received,
                Err(TransportError::Closed) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            buffer.commit(n)?;

            if let Err(err) = self.new_packet(transport.clone(), buffer, source) {
                debug!(source = %source, error = %err, "packet rejected");
            }
        }
    }

    /// Evict idle datagram sessions and close their connections.
    ///
    /// Returns how many sessions were evicted.
    pub fn evict_idle(&self) -> usize {
        let evicted = self.udp.sessions.evict_expired();
        let sessions = &self.udp.sessions;
        self.nat.retain(|id| sessions.contains(&id));
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "idle sessions evicted");
        }
        evicted
    }

    /// Sweep idle sessions periodically until `token` fires.
    pub fn spawn_janitor(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = (service.udp.sessions.timeout() / 4).max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        service.evict_idle();
                    }
                }
            }
        })
    }

    /// Live datagram session for a client session id.
    #[must_use]
    pub fn session(&self, session_id: u64) -> Option<Arc<UdpSession>> {
        self.udp.sessions.get(&session_id)
    }

    /// Stored datagram sessions, expired ones included until evicted.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.udp.sessions.len()
    }

    /// Open datagram connections.
    #[must_use]
    pub fn packet_connection_count(&self) -> usize {
        self.nat.len()
    }
}

/// `type | timestamp | padding length | padding | destination`; leaves the
/// window on the payload.
fn parse_client_body(buffer: &mut Buffer) -> Result<Destination> {
    let header_type = buffer.read_u8()?;
    if header_type != HEADER_TYPE_CLIENT {
        return Err(Error::BadHeaderType(header_type));
    }
    validate_timestamp(buffer.read_u64()?, unix_now())?;
    let padding = buffer.read_u16()?;
    buffer.advance(usize::from(padding))?;
    let (destination, consumed) = Destination::decode(buffer.bytes())?;
    buffer.advance(consumed)?;
    Ok(destination)
}

/// Removes a session created by the current packet unless kept.
struct NewSession<'a> {
    sessions: &'a SessionTable<u64, UdpSession>,
    session_id: u64,
    session: &'a Arc<UdpSession>,
    armed: bool,
}

impl<'a> NewSession<'a> {
    fn new(
        sessions: &'a SessionTable<u64, UdpSession>,
        session_id: u64,
        session: &'a Arc<UdpSession>,
        created: bool,
    ) -> Self {
        Self {
            sessions,
            session_id,
            session,
            armed: created,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for NewSession<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.sessions.remove_value(&self.session_id, self.session);
        }
    }
}
