//! Stream copy engine.
//!
//! [`copy`] relays a source into a sink over the cheapest path both sides
//! support, checked in order:
//!
//! 1. the source drains itself ([`SelfDraining`](crate::endpoint::SelfDraining));
//! 2. the sink pulls ([`SelfFilling`](crate::endpoint::SelfFilling)), with
//!    non-raw sources hidden behind [`ReadOnlySource`] when the sink is raw;
//! 3. the source hands out owned buffers and the sink needs no headroom;
//! 4. the sink retains buffers, so each chunk gets a fresh pooled buffer;
//! 5. one reusable buffer sized to MTU plus headroom.
//!
//! A read failure before anything was relayed is reported as
//! [`CopyError::Handshake`]; end of stream is never an error.

use crate::buffer::{BUFFER_SIZE, Buffer, BufferError, BufferPool};
use crate::endpoint::{OwnedRead, ReadOnlySource, Sink, Source, calculate_mtu};
use std::io;
use thiserror::Error;

/// Copy engine errors
#[derive(Debug, Error)]
pub enum CopyError {
    /// An endpoint half was missing
    #[error("nil endpoint: missing {0}")]
    NilEndpoint(&'static str),

    /// The first read failed before any byte was relayed
    #[error("handshake failure: {0}")]
    Handshake(#[source] io::Error),

    /// I/O error after relaying started, or on the write side
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Buffer could not satisfy the negotiated headroom
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Relay task was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl CopyError {
    /// Whether this error came from the first read of a relay.
    #[must_use]
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Handshake(_))
    }
}

impl From<CopyError> for io::Error {
    fn from(err: CopyError) -> Self {
        match err {
            CopyError::Io(e) | CopyError::Handshake(e) => e,
            other => io::Error::other(other),
        }
    }
}

/// Classify a read error: before anything was relayed it is a handshake
/// failure, afterwards a plain I/O error.
pub fn read_failure(err: io::Error, relayed: bool) -> CopyError {
    if relayed {
        CopyError::Io(err)
    } else {
        CopyError::Handshake(err)
    }
}

pub(crate) fn buffer_size(mtu: Option<usize>, headroom: usize, default: usize) -> usize {
    mtu.unwrap_or(default) + headroom
}

/// Relay `source` into `sink` until end of stream, returning bytes moved.
///
/// # Errors
///
/// Returns [`CopyError::Handshake`] if the very first read fails,
/// [`CopyError::Io`] for later read failures and any write failure.
pub async fn copy(sink: &mut dyn Sink, source: &mut dyn Source) -> Result<u64, CopyError> {
    if let Some(draining) = source.as_self_draining() {
        return draining.drain_into(sink).await;
    }

    let wrap_source = sink.is_raw() && !source.is_raw();
    if let Some(filling) = sink.as_self_filling() {
        if wrap_source {
            let mut read_only = ReadOnlySource::new(source);
            return filling.fill_from(&mut read_only).await;
        }
        return filling.fill_from(source).await;
    }

    copy_extended(sink, source).await
}

/// Buffer-passing part of [`copy`]: paths 3 to 5.
///
/// # Errors
///
/// See [`copy`].
pub async fn copy_extended(sink: &mut dyn Sink, source: &mut dyn Source) -> Result<u64, CopyError> {
    let headroom = sink.front_headroom() + sink.rear_headroom();
    if headroom == 0 {
        if let Some(owned) = source.as_owned_reader() {
            return copy_owned(sink, owned).await;
        }
    }
    if sink.retains_buffers() {
        return copy_with_pool(sink, source).await;
    }

    let size = buffer_size(
        calculate_mtu(source.read_mtu(), sink.mtu()),
        headroom,
        BUFFER_SIZE,
    );
    let mut buffer = Buffer::new(size);
    copy_buffer(sink, source, &mut buffer).await
}

/// Relay through one caller-provided buffer, reused for every chunk.
///
/// # Errors
///
/// See [`copy`]; also fails if `buffer` cannot hold the sink's headroom.
pub async fn copy_buffer(
    sink: &mut dyn Sink,
    source: &mut dyn Source,
    buffer: &mut Buffer,
) -> Result<u64, CopyError> {
    let front = sink.front_headroom();
    buffer.reset(0)?;
    buffer.reserve_rear(sink.rear_headroom())?;

    let mut copied = 0u64;
    loop {
        buffer.reset(front)?;
        let n = source
            .read_buffer(buffer)
            .await
            .map_err(|e| read_failure(e, copied > 0))?;
        if n == 0 {
            return Ok(copied);
        }
        sink.write_buffer(buffer).await?;
        copied += n as u64;
    }
}

async fn copy_owned(sink: &mut dyn Sink, source: &mut dyn OwnedRead) -> Result<u64, CopyError> {
    let mut copied = 0u64;
    loop {
        let buffer = match source.read_owned().await {
            Ok(Some(buffer)) => buffer,
            Ok(None) => return Ok(copied),
            Err(e) => return Err(read_failure(e, copied > 0)),
        };
        let n = buffer.len();
        sink.write_owned(buffer).await?;
        copied += n as u64;
    }
}

async fn copy_with_pool(sink: &mut dyn Sink, source: &mut dyn Source) -> Result<u64, CopyError> {
    let front = sink.front_headroom();
    let rear = sink.rear_headroom();
    let size = buffer_size(
        calculate_mtu(source.read_mtu(), sink.mtu()),
        front + rear,
        BUFFER_SIZE,
    );
    let pool = BufferPool::global();

    let mut copied = 0u64;
    loop {
        let mut buffer = pool.get(size);
        buffer.reserve_rear(rear)?;
        buffer.reset(front)?;
        let n = source
            .read_buffer(&mut buffer)
            .await
            .map_err(|e| read_failure(e, copied > 0))?;
        if n == 0 {
            return Ok(copied);
        }
        sink.write_owned(buffer).await?;
        copied += n as u64;
    }
}
