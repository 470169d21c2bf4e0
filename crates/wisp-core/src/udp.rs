//! Datagram sessions and packet sealing.
//!
//! Split methods (AES-GCM) mask the 16-byte `session id | packet id` block
//! with AES keyed by the pre-shared key and seal the body with a per-session
//! subkey, using bytes 4..16 of the plaintext block as the nonce:
//!
//! ```text
//! AES(session id | packet id) | AEAD(body) | tag
//! ```
//!
//! The unified method seals everything with XChaCha20-Poly1305 keyed by the
//! pre-shared key under a random 24-byte nonce:
//!
//! ```text
//! nonce | AEAD(session id | packet id | body) | tag
//! ```

use crate::error::{Error, Result};
use crate::protocol::{
    HEADER_TYPE_SERVER, PACKET_ID_SIZE, SESSION_ID_SIZE, session_cipher, unix_now,
};
use crate::session_table::SessionTable;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;
use wisp_crypto::block::HeaderCipher;
use wisp_crypto::random::{fill_random, random_u64};
use wisp_crypto::replay::ReplayProtection;
use wisp_crypto::{AeadCipher, BLOCK_SIZE, Method, NONCE_SIZE, TAG_SIZE, XCHACHA_NONCE_SIZE};
use wisp_transport::address::MAX_ENCODED_LEN;
use wisp_transport::{Buffer, Destination, Headroom, PacketSink, Transport};

/// `session id | packet id`
pub const PACKET_ID_HEADER_SIZE: usize = SESSION_ID_SIZE + PACKET_ID_SIZE;

/// Server body prefix: type, timestamp, client session id, padding length.
const SERVER_BODY_HEADER_SIZE: usize = 1 + 8 + SESSION_ID_SIZE + 2;

/// Front headroom that fits any server packet header.
pub const MAX_SERVER_HEADER_SIZE: usize =
    XCHACHA_NONCE_SIZE + PACKET_ID_HEADER_SIZE + SERVER_BODY_HEADER_SIZE + MAX_ENCODED_LEN;

/// Datagram header protection, fixed per method.
pub enum DatagramCipher {
    /// AES header block plus per-session body AEAD
    Split(HeaderCipher),
    /// One AEAD over the whole packet
    Unified(AeadCipher),
}

impl DatagramCipher {
    /// Build the packet cipher for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadKeyLength`] for a key the method cannot use.
    pub fn new(method: Method, psk: &[u8]) -> Result<Self> {
        if method.is_unified_datagram() {
            Ok(Self::Unified(AeadCipher::xchacha20_poly1305(psk)?))
        } else {
            Ok(Self::Split(HeaderCipher::new(psk)?))
        }
    }

    /// Whether bodies are sealed with per-session subkeys.
    #[must_use]
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split(_))
    }

    /// Smallest valid sealed packet.
    #[must_use]
    pub fn min_packet_len(&self) -> usize {
        match self {
            Self::Split(_) => PACKET_ID_HEADER_SIZE + TAG_SIZE,
            Self::Unified(_) => XCHACHA_NONCE_SIZE + PACKET_ID_HEADER_SIZE + TAG_SIZE,
        }
    }

    /// Expose `session id | packet id` at the front of the window and return
    /// them. Unified packets are fully opened here; split packets only have
    /// their header block decrypted.
    ///
    /// # Errors
    ///
    /// [`Error::PacketTooShort`] or [`Error::DecryptFailure`].
    pub fn open_header(&self, buffer: &mut Buffer) -> Result<(u64, u64)> {
        let needed = self.min_packet_len();
        if buffer.len() < needed {
            return Err(Error::PacketTooShort {
                needed,
                available: buffer.len(),
            });
        }

        match self {
            Self::Split(header) => header.decrypt_block(buffer.bytes_mut())?,
            Self::Unified(cipher) => {
                let mut nonce = [0u8; XCHACHA_NONCE_SIZE];
                nonce.copy_from_slice(&buffer.bytes()[..XCHACHA_NONCE_SIZE]);
                let n = cipher.open_in_place(&nonce, &mut buffer.bytes_mut()[XCHACHA_NONCE_SIZE..])?;
                buffer.advance(XCHACHA_NONCE_SIZE)?;
                buffer.truncate(n);
            }
        }

        let bytes = buffer.bytes();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..SESSION_ID_SIZE]);
        let session_id = u64::from_be_bytes(raw);
        raw.copy_from_slice(&bytes[SESSION_ID_SIZE..PACKET_ID_HEADER_SIZE]);
        Ok((session_id, u64::from_be_bytes(raw)))
    }

    /// Open the body of a split packet whose window starts at the decrypted
    /// header block. Unified packets are already open.
    ///
    /// # Errors
    ///
    /// [`Error::DecryptFailure`] on authentication failure.
    pub fn open_body(&self, body_cipher: Option<&AeadCipher>, buffer: &mut Buffer) -> Result<()> {
        let (Self::Split(_), Some(cipher)) = (self, body_cipher) else {
            return Ok(());
        };
        let nonce = block_nonce(buffer.bytes());
        let n = cipher.open_in_place(&nonce, &mut buffer.bytes_mut()[BLOCK_SIZE..])?;
        buffer.truncate(BLOCK_SIZE + n);
        Ok(())
    }

    /// Seal a plaintext packet whose window starts at the session id. Needs
    /// [`TAG_SIZE`] bytes of rear room, plus the nonce in front for unified
    /// packets.
    ///
    /// # Errors
    ///
    /// Fails if the headroom is missing or the cipher rejects the input.
    pub fn seal(&self, body_cipher: Option<&AeadCipher>, buffer: &mut Buffer) -> Result<()> {
        buffer.extend(TAG_SIZE)?;
        match self {
            Self::Split(header) => {
                let cipher = body_cipher.ok_or(Error::Closed)?;
                let nonce = block_nonce(buffer.bytes());
                cipher.seal_in_place(&nonce, &mut buffer.bytes_mut()[BLOCK_SIZE..])?;
                header.encrypt_block(buffer.bytes_mut())?;
            }
            Self::Unified(cipher) => {
                let mut nonce = [0u8; XCHACHA_NONCE_SIZE];
                fill_random(&mut nonce)?;
                buffer.prepend(XCHACHA_NONCE_SIZE)?.copy_from_slice(&nonce);
                cipher.seal_in_place(&nonce, &mut buffer.bytes_mut()[XCHACHA_NONCE_SIZE..])?;
            }
        }
        Ok(())
    }
}

fn block_nonce(block: &[u8]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&block[4..BLOCK_SIZE]);
    nonce
}

/// Cryptographic and sequencing state of one datagram flow.
pub struct UdpSession {
    session_id: u64,
    remote_session_id: u64,
    packet_id: AtomicU64,
    remote_addr: Mutex<SocketAddr>,
    cipher: Option<AeadCipher>,
    remote_cipher: Option<AeadCipher>,
    replay: Mutex<ReplayProtection>,
}

impl UdpSession {
    /// Server side state for a flow first seen from `remote_session_id`.
    ///
    /// # Errors
    ///
    /// Fails if the random source or key derivation fails.
    pub fn accept(
        method: Method,
        psk: &[u8],
        split: bool,
        remote_session_id: u64,
        remote_addr: SocketAddr,
    ) -> Result<Self> {
        let session_id = random_u64()?;
        let (cipher, remote_cipher) = if split {
            (
                Some(session_cipher(method, psk, &session_id.to_be_bytes())?),
                Some(session_cipher(method, psk, &remote_session_id.to_be_bytes())?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            session_id,
            remote_session_id,
            packet_id: AtomicU64::new(0),
            remote_addr: Mutex::new(remote_addr),
            cipher,
            remote_cipher,
            replay: Mutex::new(ReplayProtection::new()),
        })
    }

    /// Own session id.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Peer's session id.
    #[must_use]
    pub fn remote_session_id(&self) -> u64 {
        self.remote_session_id
    }

    /// Last validated peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        *self.remote_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_remote_addr(&self, addr: SocketAddr) {
        *self.remote_addr.lock().unwrap_or_else(PoisonError::into_inner) = addr;
    }

    /// Next outbound packet id; the first is `0`.
    pub fn next_packet_id(&self) -> u64 {
        self.packet_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Body cipher for outbound packets, split methods only.
    #[must_use]
    pub fn cipher(&self) -> Option<&AeadCipher> {
        self.cipher.as_ref()
    }

    /// Body cipher for inbound packets, split methods only.
    #[must_use]
    pub fn remote_cipher(&self) -> Option<&AeadCipher> {
        self.remote_cipher.as_ref()
    }

    /// Whether `packet_id` would pass the replay window. Records nothing.
    #[must_use]
    pub fn probe_packet_id(&self, packet_id: u64) -> bool {
        self.replay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check(packet_id)
    }

    /// Record `packet_id`, failing if it was already seen.
    ///
    /// # Errors
    ///
    /// [`Error::ReplayDetected`] on a duplicate or stale id.
    pub fn commit_packet_id(&self, packet_id: u64) -> Result<()> {
        let accepted = self
            .replay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_and_update(packet_id);
        if accepted {
            Ok(())
        } else {
            Err(Error::ReplayDetected)
        }
    }
}

impl std::fmt::Debug for UdpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpSession")
            .field("session_id", &format_args!("{:016x}", self.session_id))
            .field(
                "remote_session_id",
                &format_args!("{:016x}", self.remote_session_id),
            )
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}

/// Datagram state shared by the service and its packet writers.
pub struct UdpContext {
    pub(crate) cipher: DatagramCipher,
    pub(crate) sessions: SessionTable<u64, UdpSession>,
}

/// Seals server packets for one session and sends them to its peer.
pub struct ServerPacketWriter {
    context: Arc<UdpContext>,
    session: Arc<UdpSession>,
    transport: Arc<dyn Transport>,
}

impl ServerPacketWriter {
    pub(crate) fn new(
        context: Arc<UdpContext>,
        session: Arc<UdpSession>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            context,
            session,
            transport,
        }
    }

    fn encode(&self, buffer: &mut Buffer, destination: &Destination) -> Result<()> {
        let header_len = PACKET_ID_HEADER_SIZE + SERVER_BODY_HEADER_SIZE + destination.encoded_len();
        let header = buffer.prepend(header_len)?;
        header[..8].copy_from_slice(&self.session.session_id.to_be_bytes());
        header[8..16].copy_from_slice(&self.session.next_packet_id().to_be_bytes());
        header[16] = HEADER_TYPE_SERVER;
        header[17..25].copy_from_slice(&unix_now().to_be_bytes());
        header[25..33].copy_from_slice(&self.session.remote_session_id.to_be_bytes());
        header[33..35].copy_from_slice(&0u16.to_be_bytes());
        destination.encode_into(&mut header[35..])?;
        self.context.cipher.seal(self.session.cipher(), buffer)
    }
}

impl Headroom for ServerPacketWriter {
    fn front_headroom(&self) -> usize {
        MAX_SERVER_HEADER_SIZE
    }

    fn rear_headroom(&self) -> usize {
        TAG_SIZE
    }
}

#[async_trait]
impl PacketSink for ServerPacketWriter {
    async fn write_packet(
        &mut self,
        buffer: &mut Buffer,
        destination: &Destination,
    ) -> io::Result<()> {
        if buffer.start() < MAX_SERVER_HEADER_SIZE || buffer.rear_room() < TAG_SIZE {
            let mut owned = Buffer::with_headroom(MAX_SERVER_HEADER_SIZE, buffer.bytes(), TAG_SIZE);
            return self.write_packet(&mut owned, destination).await;
        }

        self.encode(buffer, destination)?;
        let peer = self.session.remote_addr();
        self.transport.send_to(buffer.bytes(), peer).await?;
        self.context.sessions.touch(&self.session.remote_session_id);
        trace!(peer = %peer, len = buffer.len(), "packet sent");
        Ok(())
    }
}
