//! Authenticated server-side stream connection.
//!
//! The response header is not sent at handshake time. The first write (or
//! a half-close before any write) generates the response salt, derives the
//! send key and emits `salt | chunk(type | timestamp | request salt |
//! payload)`. Later writes go straight to the established chunk writer.

use crate::error::{Error, Result};
use crate::protocol::{
    CHUNK_LENGTH_SIZE, HEADER_TYPE_SERVER, MAX_CHUNK_SIZE, session_cipher, unix_now,
};
use crate::stream::{AeadReader, AeadWriter};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tracing::trace;
use wisp_crypto::random::random_32;
use wisp_crypto::{Method, SALT_SIZE, TAG_SIZE};
use wisp_transport::io::{BoxReader, BoxWriter};
use wisp_transport::{Buffer, Closer, Destination, Endpoint, Headroom, Sink};
use zeroize::Zeroizing;

/// Decrypting half of a server connection.
pub type ServerSource = AeadReader<BoxReader>;

enum ResponseState {
    Pending {
        writer: BoxWriter,
        request_salt: [u8; SALT_SIZE],
    },
    Established(AeadWriter<BoxWriter>),
    Failed,
}

/// Encrypting half of a server connection with a lazily sent response header.
pub struct ServerSink {
    method: Method,
    psk: Arc<Zeroizing<Vec<u8>>>,
    state: ResponseState,
}

impl ServerSink {
    pub(crate) fn new(
        method: Method,
        psk: Arc<Zeroizing<Vec<u8>>>,
        writer: BoxWriter,
        request_salt: [u8; SALT_SIZE],
    ) -> Self {
        Self {
            method,
            psk,
            state: ResponseState::Pending {
                writer,
                request_salt,
            },
        }
    }

    /// Whether the response header has been sent.
    #[must_use]
    pub fn is_established(&self) -> bool {
        matches!(self.state, ResponseState::Established(_))
    }

    /// Encrypt and send `data`, sending the response header first if needed.
    ///
    /// # Errors
    ///
    /// Returns the write failure; after a failed response header every
    /// further write fails with [`Error::Closed`].
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.state {
            ResponseState::Established(writer) => writer.write_all(data).await,
            _ => self.establish(data).await,
        }
    }

    async fn establish(&mut self, payload: &[u8]) -> Result<()> {
        let ResponseState::Pending {
            writer,
            request_salt,
        } = std::mem::replace(&mut self.state, ResponseState::Failed)
        else {
            return Err(Error::Closed);
        };

        let salt = random_32()?;
        let cipher = session_cipher(self.method, &self.psk, &salt)?;
        let mut writer = AeadWriter::new(writer, cipher);

        let mut header = Vec::with_capacity(1 + 8 + SALT_SIZE + payload.len());
        header.push(HEADER_TYPE_SERVER);
        header.extend_from_slice(&unix_now().to_be_bytes());
        header.extend_from_slice(&request_salt);
        header.extend_from_slice(payload);
        writer.write_with_prefix(&salt, &header).await?;

        trace!(payload = payload.len(), "response header sent");
        self.state = ResponseState::Established(writer);
        Ok(())
    }
}

impl Headroom for ServerSink {
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
impl Sink for ServerSink {
    async fn write_buffer(&mut self, buffer: &mut Buffer) -> io::Result<()> {
        match &mut self.state {
            ResponseState::Established(writer) => writer.write_buffer(buffer).await,
            _ => Ok(self.establish(buffer.bytes()).await?),
        }
    }

    fn can_half_close(&self) -> bool {
        true
    }

    async fn close_write(&mut self) -> io::Result<()> {
        if matches!(self.state, ResponseState::Pending { .. }) {
            self.establish(&[]).await?;
        }
        match &mut self.state {
            ResponseState::Established(writer) => Ok(writer.shutdown().await?),
            _ => Ok(()),
        }
    }
}

/// A stream connection that passed the handshake.
pub struct ServerConn {
    destination: Destination,
    source: ServerSource,
    sink: ServerSink,
    closer: Closer,
}

impl ServerConn {
    pub(crate) fn new(
        destination: Destination,
        source: ServerSource,
        sink: ServerSink,
        closer: Closer,
    ) -> Self {
        Self {
            destination,
            source,
            sink,
            closer,
        }
    }

    /// Requested destination.
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Split into the decrypting half, the encrypting half and the close.
    pub fn into_parts(self) -> (ServerSource, ServerSink, Closer) {
        (self.source, self.sink, self.closer)
    }

    /// View as a relay endpoint.
    pub fn into_endpoint(self) -> Endpoint {
        Endpoint::new(Box::new(self.source), Box::new(self.sink), self.closer)
    }
}
