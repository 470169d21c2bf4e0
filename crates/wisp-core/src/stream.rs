//! AEAD chunk stream.
//!
//! A stream direction is a sequence of chunks, each made of a sealed 2-byte
//! big-endian payload length followed by the sealed payload:
//!
//! ```text
//! +-----------------+-----+----------------+-----+
//! | len (2, sealed) | tag |  payload (len) | tag |
//! +-----------------+-----+----------------+-----+
//! ```
//!
//! Both seals use the same cipher with a 12-byte little-endian counter nonce
//! that starts at zero and advances after every seal. End of stream is only
//! clean on a chunk boundary.

use crate::error::{Error, Result};
use crate::protocol::{CHUNK_LENGTH_SIZE, MAX_CHUNK_SIZE};
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wisp_crypto::aead::increment_nonce;
use wisp_crypto::{AeadCipher, NONCE_SIZE, TAG_SIZE};
use wisp_transport::copy::read_failure;
use wisp_transport::endpoint::{SelfDraining, Sink, Source};
use wisp_transport::{Buffer, CopyError, Destination, Headroom};

/// Cipher plus its nonce counter.
struct ChunkCipher {
    cipher: AeadCipher,
    nonce: [u8; NONCE_SIZE],
}

impl ChunkCipher {
    fn new(cipher: AeadCipher) -> Self {
        Self {
            cipher,
            nonce: [0u8; NONCE_SIZE],
        }
    }

    fn seal(&mut self, region: &mut [u8]) -> Result<()> {
        self.cipher.seal_in_place(&self.nonce, region)?;
        increment_nonce(&mut self.nonce);
        Ok(())
    }

    fn open(&mut self, region: &mut [u8]) -> Result<usize> {
        let n = self.cipher.open_in_place(&self.nonce, region)?;
        increment_nonce(&mut self.nonce);
        Ok(n)
    }

    /// Seal a frame laid out as `len(2) | tag | payload | tag`.
    fn seal_frame(&mut self, frame: &mut [u8]) -> Result<()> {
        let (length, payload) = frame.split_at_mut(CHUNK_LENGTH_SIZE);
        self.seal(length)?;
        self.seal(payload)
    }
}

/// Bytes needed to frame `len` payload bytes.
#[must_use]
pub fn framed_len(len: usize) -> usize {
    let chunks = len.div_ceil(MAX_CHUNK_SIZE).max(1);
    len + chunks * (CHUNK_LENGTH_SIZE + TAG_SIZE)
}

/// Decrypting half of a chunk stream.
pub struct AeadReader<R> {
    reader: R,
    chunk: ChunkCipher,
    pending: Vec<u8>,
    offset: usize,
}

impl<R: AsyncRead + Unpin + Send> AeadReader<R> {
    /// Decrypt `reader` with `cipher`.
    pub fn new(reader: R, cipher: AeadCipher) -> Self {
        Self {
            reader,
            chunk: ChunkCipher::new(cipher),
            pending: Vec::new(),
            offset: 0,
        }
    }

    /// Decrypted bytes waiting to be consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending.len() - self.offset
    }

    /// Open the next length prefix; `None` on a clean end of stream.
    async fn read_length(&mut self) -> Result<Option<usize>> {
        let mut header = [0u8; CHUNK_LENGTH_SIZE];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.reader.read(&mut header[filled..]).await?;
            if n == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(Error::Closed)
                };
            }
            filled += n;
        }
        self.chunk.open(&mut header)?;
        Ok(Some(u16::from_be_bytes([header[0], header[1]]) as usize))
    }

    /// Read and open a sealed payload of `len` bytes at the front of `region`.
    async fn read_sealed(&mut self, region: &mut [u8], len: usize) -> Result<()> {
        let sealed = &mut region[..len + TAG_SIZE];
        self.reader
            .read_exact(sealed)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => Error::Closed,
                _ => Error::Io(e),
            })?;
        self.chunk.open(sealed)?;
        Ok(())
    }

    /// Decrypt the next non-empty chunk into the pending buffer.
    async fn fill_pending(&mut self) -> Result<bool> {
        loop {
            let Some(len) = self.read_length().await? else {
                return Ok(false);
            };
            let mut pending = std::mem::take(&mut self.pending);
            pending.resize(len + TAG_SIZE, 0);
            let opened = self.read_sealed(&mut pending, len).await;
            pending.truncate(len);
            self.pending = pending;
            self.offset = 0;
            opened?;
            if len > 0 {
                return Ok(true);
            }
        }
    }

    /// Fill `out` completely.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] if the stream ends first, [`Error::DecryptFailure`]
    /// on a tampered chunk.
    pub async fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if self.buffered() == 0 && !self.fill_pending().await? {
                return Err(Error::Closed);
            }
            let n = self.buffered().min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
            self.offset += n;
            filled += n;
        }
        Ok(())
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// See [`read_exact`](Self::read_exact).
    pub async fn read_u8(&mut self) -> Result<u8> {
        let mut raw = [0u8; 1];
        self.read_exact(&mut raw).await?;
        Ok(raw[0])
    }

    /// Read a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// See [`read_exact`](Self::read_exact).
    pub async fn read_u16(&mut self) -> Result<u16> {
        let mut raw = [0u8; 2];
        self.read_exact(&mut raw).await?;
        Ok(u16::from_be_bytes(raw))
    }

    /// Read a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// See [`read_exact`](Self::read_exact).
    pub async fn read_u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        self.read_exact(&mut raw).await?;
        Ok(u64::from_be_bytes(raw))
    }

    /// Read a wire-form destination.
    ///
    /// # Errors
    ///
    /// [`Error::AddressDecode`] for malformed addresses, otherwise see
    /// [`read_exact`](Self::read_exact).
    pub async fn read_destination(&mut self) -> Result<Destination> {
        let mut wire = [0u8; wisp_transport::address::MAX_ENCODED_LEN];
        self.read_exact(&mut wire[..2]).await?;
        let len = Destination::wire_len(&wire[..2])?;
        self.read_exact(&mut wire[2..len]).await?;
        Ok(Destination::decode(&wire[..len])?.0)
    }

    /// Skip `n` bytes.
    ///
    /// # Errors
    ///
    /// See [`read_exact`](Self::read_exact).
    pub async fn discard(&mut self, mut n: usize) -> Result<()> {
        let mut scratch = [0u8; 256];
        while n > 0 {
            let step = n.min(scratch.len());
            self.read_exact(&mut scratch[..step]).await?;
            n -= step;
        }
        Ok(())
    }

    /// Append decrypted bytes to `buffer` and return how many; `0` at end of
    /// stream.
    ///
    /// A whole chunk that fits the writable region is read and opened there
    /// directly.
    ///
    /// # Errors
    ///
    /// [`Error::DecryptFailure`] on a tampered chunk, [`Error::Closed`] if
    /// the stream ends inside a chunk.
    pub async fn read_chunk(&mut self, buffer: &mut Buffer) -> Result<usize> {
        if self.buffered() == 0 {
            let len = loop {
                match self.read_length().await? {
                    None => return Ok(0),
                    Some(0) => {
                        let mut tag = [0u8; TAG_SIZE];
                        self.read_sealed(&mut tag, 0).await?;
                    }
                    Some(len) => break len,
                }
            };

            if buffer.writable().len() >= len + TAG_SIZE {
                self.read_sealed(buffer.writable(), len).await?;
                buffer.commit(len)?;
                return Ok(len);
            }

            let mut pending = std::mem::take(&mut self.pending);
            pending.resize(len + TAG_SIZE, 0);
            let opened = self.read_sealed(&mut pending, len).await;
            pending.truncate(len);
            self.pending = pending;
            self.offset = 0;
            opened?;
        }

        let n = self.buffered().min(buffer.writable().len());
        buffer.write(&self.pending[self.offset..self.offset + n])?;
        self.offset += n;
        Ok(n)
    }

    /// Unwrap the underlying reader, dropping any buffered plaintext.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Source for AeadReader<R> {
    async fn read_buffer(&mut self, buffer: &mut Buffer) -> io::Result<usize> {
        Ok(self.read_chunk(buffer).await?)
    }

    fn read_mtu(&self) -> Option<usize> {
        Some(MAX_CHUNK_SIZE)
    }

    fn as_self_draining(&mut self) -> Option<&mut dyn SelfDraining> {
        Some(self)
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> SelfDraining for AeadReader<R> {
    /// Open every chunk in place inside one buffer that also carries the
    /// sink's headroom, so each chunk reaches the sink without a copy.
    async fn drain_into(&mut self, sink: &mut dyn Sink) -> std::result::Result<u64, CopyError> {
        let front = sink.front_headroom();
        let rear = sink.rear_headroom();
        let mut buffer = Buffer::new(front + MAX_CHUNK_SIZE + TAG_SIZE + rear);
        buffer.reserve_rear(rear)?;

        let mut copied = 0u64;
        loop {
            buffer.reset(front)?;
            let n = self
                .read_chunk(&mut buffer)
                .await
                .map_err(|e| read_failure(e.into(), copied > 0))?;
            if n == 0 {
                return Ok(copied);
            }
            sink.write_buffer(&mut buffer).await?;
            copied += n as u64;
        }
    }
}

/// Encrypting half of a chunk stream.
pub struct AeadWriter<W> {
    writer: W,
    chunk: ChunkCipher,
}

impl<W: AsyncWrite + Unpin + Send> AeadWriter<W> {
    /// Encrypt into `writer` with `cipher`.
    pub fn new(writer: W, cipher: AeadCipher) -> Self {
        Self {
            writer,
            chunk: ChunkCipher::new(cipher),
        }
    }

    /// Append `data` as sealed chunks; empty input becomes one empty chunk.
    fn frame_into(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if data.is_empty() {
            return self.push_frame(data, out);
        }
        for piece in data.chunks(MAX_CHUNK_SIZE) {
            self.push_frame(piece, out)?;
        }
        Ok(())
    }

    fn push_frame(&mut self, piece: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        out.resize(start + CHUNK_LENGTH_SIZE + piece.len() + TAG_SIZE, 0);
        let frame = &mut out[start..];
        frame[..2].copy_from_slice(&(piece.len() as u16).to_be_bytes());
        frame[CHUNK_LENGTH_SIZE..CHUNK_LENGTH_SIZE + piece.len()].copy_from_slice(piece);
        self.chunk.seal_frame(frame)
    }

    /// Write `prefix` in the clear followed by `data` as chunks, in a single
    /// write to the underlying stream.
    ///
    /// # Errors
    ///
    /// Returns the write failure.
    pub async fn write_with_prefix(&mut self, prefix: &[u8], data: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(prefix.len() + framed_len(data.len()));
        out.extend_from_slice(prefix);
        self.frame_into(data, &mut out)?;
        self.writer.write_all(&out).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write `data` as one or more chunks. Empty input writes nothing.
    ///
    /// # Errors
    ///
    /// Returns the write failure.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.write_with_prefix(&[], data).await
    }

    /// Close the write side of the underlying stream.
    ///
    /// # Errors
    ///
    /// Returns the shutdown failure.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Underlying stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> Headroom for AeadWriter<W> {
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
impl<W: AsyncWrite + Unpin + Send> Sink for AeadWriter<W> {
    async fn write_buffer(&mut self, buffer: &mut Buffer) -> io::Result<()> {
        let len = buffer.len();
        if len == 0 {
            return Ok(());
        }
        let in_place = len <= MAX_CHUNK_SIZE
            && buffer.start() >= CHUNK_LENGTH_SIZE
            && buffer.rear_room() >= TAG_SIZE;
        if !in_place {
            return Ok(self.write_all(buffer.bytes()).await?);
        }

        let header = buffer.prepend(CHUNK_LENGTH_SIZE).map_err(io::Error::other)?;
        header[..2].copy_from_slice(&(len as u16).to_be_bytes());
        buffer.extend(TAG_SIZE).map_err(io::Error::other)?;
        self.chunk.seal_frame(buffer.bytes_mut())?;
        self.writer.write_all(buffer.bytes()).await?;
        self.writer.flush().await
    }

    fn can_half_close(&self) -> bool {
        true
    }

    async fn close_write(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
