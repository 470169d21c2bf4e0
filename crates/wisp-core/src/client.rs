//! Client side of the protocol.
//!
//! [`ClientConn`] sends the request header together with the first payload
//! and reads the response header lazily on the first read. The response is
//! only accepted if it echoes the request salt. [`ClientPacketCodec`] seals
//! client datagrams and opens server datagrams for one client session.

use crate::error::{Error, Result};
use crate::protocol::{
    CHUNK_LENGTH_SIZE, HEADER_TYPE_CLIENT, HEADER_TYPE_SERVER, MAX_CHUNK_SIZE, session_cipher,
    unix_now, validate_timestamp,
};
use crate::stream::{AeadReader, AeadWriter};
use crate::udp::{DatagramCipher, PACKET_ID_HEADER_SIZE};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::AsyncReadExt;
use tracing::trace;
use wisp_crypto::random::{fill_random, random_32, random_u64};
use wisp_crypto::replay::ReplayProtection;
use wisp_crypto::{AeadCipher, Method, PSK_SIZE, SALT_SIZE, TAG_SIZE, XCHACHA_NONCE_SIZE};
use wisp_transport::endpoint::SelfDraining;
use wisp_transport::io::{BoxReader, BoxWriter};
use wisp_transport::{Buffer, Closer, Destination, Endpoint, Headroom, Sink, Source, StreamParts};
use zeroize::Zeroizing;

fn check_psk(psk: &[u8]) -> Result<()> {
    if psk.len() != PSK_SIZE {
        return Err(Error::BadKeyLength {
            expected: PSK_SIZE,
            actual: psk.len(),
        });
    }
    Ok(())
}

/// Parameters of one stream request.
#[derive(Debug, Clone)]
pub struct Request {
    destination: Destination,
    padding: u16,
    timestamp: Option<u64>,
    salt: Option<[u8; SALT_SIZE]>,
}

impl Request {
    /// Request for `destination` without padding.
    #[must_use]
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            padding: 0,
            timestamp: None,
            salt: None,
        }
    }

    /// Add `len` bytes of random padding to the header.
    #[must_use]
    pub fn with_padding(mut self, len: u16) -> Self {
        self.padding = len;
        self
    }

    /// Send `timestamp` instead of the current time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Use a fixed salt instead of a random one.
    #[must_use]
    pub fn with_salt(mut self, salt: [u8; SALT_SIZE]) -> Self {
        self.salt = Some(salt);
        self
    }

    /// Requested destination.
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    fn header(&self) -> Result<Vec<u8>> {
        let mut header = Vec::with_capacity(
            1 + 8 + self.destination.encoded_len() + 2 + usize::from(self.padding),
        );
        header.push(HEADER_TYPE_CLIENT);
        header.extend_from_slice(&self.timestamp.unwrap_or_else(unix_now).to_be_bytes());
        self.destination.encode(&mut header);
        header.extend_from_slice(&self.padding.to_be_bytes());
        let start = header.len();
        header.resize(start + usize::from(self.padding), 0);
        fill_random(&mut header[start..])?;
        Ok(header)
    }
}

enum RequestState {
    Pending {
        writer: BoxWriter,
        header: Vec<u8>,
    },
    Established(AeadWriter<BoxWriter>),
    Failed,
}

/// Encrypting half of a client connection; the request header rides on the
/// first write.
pub struct ClientSink {
    cipher: Option<AeadCipher>,
    salt: [u8; SALT_SIZE],
    state: RequestState,
}

impl ClientSink {
    /// Whether the request header has been sent.
    #[must_use]
    pub fn is_established(&self) -> bool {
        matches!(self.state, RequestState::Established(_))
    }

    /// Encrypt and send `data`, preceded by the request header on first use.
    ///
    /// # Errors
    ///
    /// Returns the write failure; after a failed first write every further
    /// write fails with [`Error::Closed`].
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.state {
            RequestState::Established(writer) => writer.write_all(data).await,
            _ => self.establish(data).await,
        }
    }

    async fn establish(&mut self, payload: &[u8]) -> Result<()> {
        let (
            RequestState::Pending { writer, mut header },
            Some(cipher),
        ) = (
            std::mem::replace(&mut self.state, RequestState::Failed),
            self.cipher.take(),
        )
        else {
            return Err(Error::Closed);
        };

        header.extend_from_slice(payload);
        let mut writer = AeadWriter::new(writer, cipher);
        writer.write_with_prefix(&self.salt, &header).await?;
        trace!(payload = payload.len(), "request header sent");
        self.state = RequestState::Established(writer);
        Ok(())
    }
}

impl Headroom for ClientSink {
    fn front_headroom(&self) -> usize {
        CHUNK_LENGTH_SIZE
    }

    fn rear_headroom(&self) -> usize {
        TAG_SIZE
    }

    fn mtu(&self) -> Option<usize> {
        Some(MAX_CHUNK_SIZE)
    }
}

#[async_trait]
impl Sink for ClientSink {
    async fn write_buffer(&mut self, buffer: &mut Buffer) -> io::Result<()> {
        match &mut self.state {
            RequestState::Established(writer) => writer.write_buffer(buffer).await,
            _ => Ok(self.establish(buffer.bytes()).await?),
        }
    }

    fn can_half_close(&self) -> bool {
        true
    }

    async fn close_write(&mut self) -> io::Result<()> {
        if matches!(self.state, RequestState::Pending { .. }) {
            self.establish(&[]).await?;
        }
        match &mut self.state {
            RequestState::Established(writer) => Ok(writer.shutdown().await?),
            _ => Ok(()),
        }
    }
}

enum ResponseState {
    Pending(BoxReader),
    Established(AeadReader<BoxReader>),
    Failed,
}

/// Decrypting half of a client connection; the response header is read and
/// checked before the first payload byte is returned.
pub struct ClientSource {
    method: Method,
    psk: Arc<Zeroizing<Vec<u8>>>,
    request_salt: [u8; SALT_SIZE],
    state: ResponseState,
}

impl ClientSource {
    async fn established(&mut self) -> Result<&mut AeadReader<BoxReader>> {
        match std::mem::replace(&mut self.state, ResponseState::Failed) {
            ResponseState::Pending(reader) => {
                let reader = Self::read_response(
                    self.method,
                    Arc::clone(&self.psk),
                    self.request_salt,
                    reader,
                )
                .await?;
                self.state = ResponseState::Established(reader);
            }
            other => self.state = other,
        }
        match &mut self.state {
            ResponseState::Established(reader) => Ok(reader),
            _ => Err(Error::Closed),
        }
    }

    // Takes owned inputs so the future stays `Send` while `ClientSource` is not `Sync`.
    async fn read_response(
        method: Method,
        psk: Arc<Zeroizing<Vec<u8>>>,
        request_salt: [u8; SALT_SIZE],
        mut reader: BoxReader,
    ) -> Result<AeadReader<BoxReader>> {
        let mut salt = [0u8; SALT_SIZE];
        reader.read_exact(&mut salt).await.map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::Closed,
            _ => Error::Io(err),
        })?;
        let cipher = session_cipher(method, &psk, &salt)?;
        let mut reader = AeadReader::new(reader, cipher);

        let header_type = reader.read_u8().await?;
        if header_type != HEADER_TYPE_SERVER {
            return Err(Error::BadHeaderType(header_type));
        }
        validate_timestamp(reader.read_u64().await?, unix_now())?;
        let mut echoed = [0u8; SALT_SIZE];
        reader.read_exact(&mut echoed).await?;
        if !bool::from(echoed.ct_eq(&request_salt)) {
            return Err(Error::BadRequestSalt);
        }
        trace!("response header accepted");
        Ok(reader)
    }

    /// Whether the response header has been read.
    #[must_use]
    pub fn is_established(&self) -> bool {
        matches!(self.state, ResponseState::Established(_))
    }

    /// Fill `out` with response payload.
    ///
    /// # Errors
    ///
    /// A response header rejection, a decrypt failure, or [`Error::Closed`]
    /// if the stream ends first.
    pub async fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        self.established().await?.read_exact(out).await
    }

    /// Read the next chunk of response payload into `buffer`; `0` at a clean
    /// end of stream.
    ///
    /// # Errors
    ///
    /// As [`read_exact`](Self::read_exact), except that a clean end is `Ok(0)`.
    pub async fn read_chunk(&mut self, buffer: &mut Buffer) -> Result<usize> {
        self.established().await?.read_chunk(buffer).await
    }
}

#[async_trait]
impl Source for ClientSource {
    async fn read_buffer(&mut self, buffer: &mut Buffer) -> io::Result<usize> {
        Ok(self.read_chunk(buffer).await?)
    }

    fn read_mtu(&self) -> Option<usize> {
        Some(MAX_CHUNK_SIZE)
    }

    fn as_self_draining(&mut self) -> Option<&mut dyn SelfDraining> {
        match &mut self.state {
            ResponseState::Established(reader) => Some(reader),
            _ => None,
        }
    }
}

/// A client stream connection.
pub struct ClientConn {
    source: ClientSource,
    sink: ClientSink,
    closer: Closer,
}

impl ClientConn {
    /// Connect to `destination` over `parts` with a fresh salt.
    ///
    /// Nothing is sent until the first write or half-close.
    ///
    /// # Errors
    ///
    /// [`Error::BadKeyLength`] unless the key is 32 bytes.
    pub fn new(
        method: Method,
        psk: &[u8],
        parts: StreamParts,
        destination: Destination,
    ) -> Result<Self> {
        Self::with_request(method, psk, parts, Request::new(destination))
    }

    /// Connect with explicit request parameters.
    ///
    /// # Errors
    ///
    /// [`Error::BadKeyLength`] unless the key is 32 bytes, or a random source
    /// failure.
    pub fn with_request(
        method: Method,
        psk: &[u8],
        parts: StreamParts,
        request: Request,
    ) -> Result<Self> {
        check_psk(psk)?;
        let salt = match request.salt {
            Some(salt) => salt,
            None => random_32()?,
        };
        let cipher = session_cipher(method, psk, &salt)?;
        let header = request.header()?;
        let StreamParts {
            reader,
            writer,
            closer,
        } = parts;

        Ok(Self {
            source: ClientSource {
                method,
                psk: Arc::new(Zeroizing::new(psk.to_vec())),
                request_salt: salt,
                state: ResponseState::Pending(reader),
            },
            sink: ClientSink {
                cipher: Some(cipher),
                salt,
                state: RequestState::Pending { writer, header },
            },
            closer,
        })
    }

    /// Salt that the server must echo.
    #[must_use]
    pub fn request_salt(&self) -> &[u8; SALT_SIZE] {
        &self.source.request_salt
    }

    /// See [`ClientSink::write_all`].
    ///
    /// # Errors
    ///
    /// Returns the write failure.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.sink.write_all(data).await
    }

    /// See [`ClientSource::read_exact`].
    ///
    /// # Errors
    ///
    /// Returns the read or response header failure.
    pub async fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        self.source.read_exact(out).await
    }

    /// Half-close the request direction, sending the header if nothing was
    /// written yet.
    ///
    /// # Errors
    ///
    /// Returns the write failure.
    pub async fn shutdown(&mut self) -> Result<()> {
        Ok(self.sink.close_write().await?)
    }

    /// Split into the decrypting half, the encrypting half and the close.
    pub fn into_parts(self) -> (ClientSource, ClientSink, Closer) {
        (self.source, self.sink, self.closer)
    }

    /// View as a relay endpoint.
    pub fn into_endpoint(self) -> Endpoint {
        Endpoint::new(Box::new(self.source), Box::new(self.sink), self.closer)
    }
}

struct ServerSession {
    session_id: u64,
    cipher: Option<AeadCipher>,
    replay: ReplayProtection,
}

/// Datagram codec for one client session.
pub struct ClientPacketCodec {
    method: Method,
    psk: Zeroizing<Vec<u8>>,
    cipher: DatagramCipher,
    session_id: u64,
    packet_id: u64,
    body_cipher: Option<AeadCipher>,
    padding: u16,
    server: Option<ServerSession>,
}

impl ClientPacketCodec {
    /// Codec with a fresh random session id.
    ///
    /// # Errors
    ///
    /// [`Error::BadKeyLength`] unless the key is 32 bytes, or a random source
    /// failure.
    pub fn new(method: Method, psk: &[u8]) -> Result<Self> {
        check_psk(psk)?;
        let cipher = DatagramCipher::new(method, psk)?;
        let session_id = random_u64()?;
        let body_cipher = if cipher.is_split() {
            Some(session_cipher(method, psk, &session_id.to_be_bytes())?)
        } else {
            None
        };
        Ok(Self {
            method,
            psk: Zeroizing::new(psk.to_vec()),
            cipher,
            session_id,
            packet_id: 0,
            body_cipher,
            padding: 0,
            server: None,
        })
    }

    /// Pad every client packet body with `len` random bytes.
    #[must_use]
    pub fn with_padding(mut self, len: u16) -> Self {
        self.padding = len;
        self
    }

    /// Own session id.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Server session id, once a server packet has been accepted.
    #[must_use]
    pub fn server_session_id(&self) -> Option<u64> {
        self.server.as_ref().map(|s| s.session_id)
    }

    /// Seal `payload` for `destination` with the next packet id.
    ///
    /// # Errors
    ///
    /// Fails only if sealing fails.
    pub fn encode(&mut self, destination: &Destination, payload: &[u8]) -> Result<Vec<u8>> {
        let packet_id = self.packet_id;
        self.packet_id = self.packet_id.wrapping_add(1);
        self.encode_packet(packet_id, unix_now(), destination, payload)
    }

    /// Seal a packet with an explicit packet id and timestamp.
    ///
    /// # Errors
    ///
    /// Fails only if sealing fails.
    pub fn encode_packet(
        &self,
        packet_id: u64,
        timestamp: u64,
        destination: &Destination,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let padding = usize::from(self.padding);
        let mut plain = Vec::with_capacity(
            PACKET_ID_HEADER_SIZE + 11 + padding + destination.encoded_len() + payload.len(),
        );
        plain.extend_from_slice(&self.session_id.to_be_bytes());
        plain.extend_from_slice(&packet_id.to_be_bytes());
        plain.push(HEADER_TYPE_CLIENT);
        plain.extend_from_slice(&timestamp.to_be_bytes());
        plain.extend_from_slice(&self.padding.to_be_bytes());
        let start = plain.len();
        plain.resize(start + padding, 0);
        fill_random(&mut plain[start..])?;
        destination.encode(&mut plain);
        plain.extend_from_slice(payload);

        let mut buffer = Buffer::with_headroom(XCHACHA_NONCE_SIZE, &plain, TAG_SIZE);
        self.cipher.seal(self.body_cipher.as_ref(), &mut buffer)?;
        Ok(buffer.bytes().to_vec())
    }

    /// Open a server packet, returning the source it came from and the
    /// payload.
    ///
    /// # Errors
    ///
    /// [`Error::DecryptFailure`], [`Error::ReplayDetected`],
    /// [`Error::BadHeaderType`], [`Error::BadTimestamp`],
    /// [`Error::BadSessionId`] if it answers another client session, or a
    /// length or address failure.
    pub fn decode(&mut self, packet: &[u8]) -> Result<(Destination, Vec<u8>)> {
        let mut buffer = Buffer::from_slice(packet);
        let (server_id, packet_id) = self.cipher.open_header(&mut buffer)?;

        let (mut session, existing) = match self.server.take() {
            Some(session) if session.session_id == server_id => (session, true),
            previous => {
                // A new server session replaces the old one only once a
                // packet from it authenticates.
                self.server = previous;
                (self.server_session(server_id)?, false)
            }
        };

        let result = self.open_server_body(&mut session, &mut buffer, packet_id);
        if result.is_ok() || existing {
            self.server = Some(session);
        }
        result
    }

    fn server_session(&self, session_id: u64) -> Result<ServerSession> {
        let cipher = if self.cipher.is_split() {
            Some(session_cipher(
                self.method,
                &self.psk,
                &session_id.to_be_bytes(),
            )?)
        } else {
            None
        };
        Ok(ServerSession {
            session_id,
            cipher,
            replay: ReplayProtection::new(),
        })
    }

    fn open_server_body(
        &self,
        session: &mut ServerSession,
        buffer: &mut Buffer,
        packet_id: u64,
    ) -> Result<(Destination, Vec<u8>)> {
        if !session.replay.check(packet_id) {
            return Err(Error::ReplayDetected);
        }
        self.cipher.open_body(session.cipher.as_ref(), buffer)?;
        buffer.advance(PACKET_ID_HEADER_SIZE)?;

        let header_type = buffer.read_u8()?;
        if header_type != HEADER_TYPE_SERVER {
            return Err(Error::BadHeaderType(header_type));
        }
        validate_timestamp(buffer.read_u64()?, unix_now())?;
        let client_id = buffer.read_u64()?;
        if client_id != self.session_id {
            return Err(Error::BadSessionId(client_id));
        }
        let padding = buffer.read_u16()?;
        buffer.advance(usize::from(padding))?;
        let (source, consumed) = Destination::decode(buffer.bytes())?;
        buffer.advance(consumed)?;

        if !session.replay.check_and_update(packet_id) {
            return Err(Error::ReplayDetected);
        }
        Ok((source, buffer.bytes().to_vec()))
    }
}

impl std::fmt::Debug for ClientPacketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPacketCodec")
            .field("method", &self.method)
            .field("session_id", &format_args!("{:016x}", self.session_id))
            .field("packet_id", &self.packet_id)
            .finish_non_exhaustive()
    }
}
