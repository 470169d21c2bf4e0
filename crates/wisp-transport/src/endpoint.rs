//! Endpoint capabilities.
//!
//! Sources and sinks are described by a small set of orthogonal traits. The
//! copy engine never inspects concrete types; it asks each endpoint what it
//! can do and picks the cheapest data path from the answers.
//!
//! | Capability | Query | Meaning |
//! |------------|-------|---------|
//! | [`Source`] | - | fills a caller-supplied [`Buffer`] |
//! | [`Sink`] | - | consumes a [`Buffer`] window |
//! | [`Headroom`] | `front_headroom`, `rear_headroom`, `mtu` | framing space and preferred chunk size |
//! | [`SelfDraining`] | [`Source::as_self_draining`] | writes itself into any sink |
//! | [`SelfFilling`] | [`Sink::as_self_filling`] | pulls from any source |
//! | [`OwnedRead`] | [`Source::as_owned_reader`] | hands out buffers it owns |
//! | retaining | [`Sink::retains_buffers`] | keeps buffers past the call |

use crate::address::Destination;
use crate::buffer::Buffer;
use crate::copy::CopyError;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;

/// Framing space and chunk size an endpoint wants around each payload.
pub trait Headroom {
    /// Bytes the endpoint prepends in place before the payload.
    fn front_headroom(&self) -> usize {
        0
    }

    /// Bytes the endpoint appends in place after the payload.
    fn rear_headroom(&self) -> usize {
        0
    }

    /// Preferred maximum payload per write.
    fn mtu(&self) -> Option<usize> {
        None
    }
}

/// Byte stream producer.
#[async_trait]
pub trait Source: Send {
    /// Append bytes to `buffer`'s window from its writable region and return
    /// how many were added. `Ok(0)` means end of stream.
    async fn read_buffer(&mut self, buffer: &mut Buffer) -> io::Result<usize>;

    /// Preferred read size.
    fn read_mtu(&self) -> Option<usize> {
        None
    }

    /// Whether this is an unbuffered kernel transport.
    fn is_raw(&self) -> bool {
        false
    }

    /// Underlying reader, for sinks with their own pull fast path.
    fn as_async_read(&mut self) -> Option<&mut (dyn AsyncRead + Unpin + Send)> {
        None
    }

    /// Self-draining capability.
    fn as_self_draining(&mut self) -> Option<&mut dyn SelfDraining> {
        None
    }

    /// Owned-buffer capability.
    fn as_owned_reader(&mut self) -> Option<&mut dyn OwnedRead> {
        None
    }
}

/// Byte stream consumer.
#[async_trait]
pub trait Sink: Headroom + Send {
    /// Write the window of `buffer`. The sink may use the reserved headroom
    /// but must not keep the buffer after returning.
    async fn write_buffer(&mut self, buffer: &mut Buffer) -> io::Result<()>;

    /// Write and take ownership of `buffer`. On failure the buffer is dropped
    /// here, which returns its slab to the pool.
    async fn write_owned(&mut self, mut buffer: Buffer) -> io::Result<()> {
        self.write_buffer(&mut buffer).await
    }

    /// Whether the sink keeps buffers beyond a write call, so every write
    /// needs a fresh buffer.
    fn retains_buffers(&self) -> bool {
        false
    }

    /// Whether this is an unbuffered kernel transport.
    fn is_raw(&self) -> bool {
        false
    }

    /// Self-filling capability.
    fn as_self_filling(&mut self) -> Option<&mut dyn SelfFilling> {
        None
    }

    /// Whether [`close_write`](Self::close_write) half-closes.
    fn can_half_close(&self) -> bool {
        false
    }

    /// Close only the write half.
    async fn close_write(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A source that knows how to write itself into a sink.
#[async_trait]
pub trait SelfDraining: Send {
    /// Move everything into `sink`, returning the byte count.
    async fn drain_into(&mut self, sink: &mut dyn Sink) -> Result<u64, CopyError>;
}

/// A sink that knows how to pull from a source.
#[async_trait]
pub trait SelfFilling: Send {
    /// Pull everything from `source`, returning the byte count.
    async fn fill_from(&mut self, source: &mut dyn Source) -> Result<u64, CopyError>;
}

/// A source that produces buffers it owns. Safe to call from any task.
#[async_trait]
pub trait OwnedRead: Send {
    /// Next buffer, or `None` at end of stream.
    async fn read_owned(&mut self) -> io::Result<Option<Buffer>>;
}

/// Datagram producer.
#[async_trait]
pub trait PacketSource: Send {
    /// Fill `buffer` with one packet and return where it is headed, or
    /// `None` once the source is closed.
    async fn read_packet(&mut self, buffer: &mut Buffer) -> io::Result<Option<Destination>>;

    /// Preferred packet size.
    fn read_mtu(&self) -> Option<usize> {
        None
    }

    /// Owned-buffer capability.
    fn as_owned_reader(&mut self) -> Option<&mut dyn OwnedPacketRead> {
        None
    }
}

/// A packet source that produces buffers it owns.
#[async_trait]
pub trait OwnedPacketRead: Send {
    /// Next packet, or `None` once closed.
    async fn read_packet_owned(&mut self) -> io::Result<Option<(Buffer, Destination)>>;
}

/// Datagram consumer.
#[async_trait]
pub trait PacketSink: Headroom + Send {
    /// Send the window of `buffer` as one packet to `destination`.
    async fn write_packet(
        &mut self,
        buffer: &mut Buffer,
        destination: &Destination,
    ) -> io::Result<()>;

    /// Send and take ownership of `buffer`.
    async fn write_packet_owned(
        &mut self,
        mut buffer: Buffer,
        destination: Destination,
    ) -> io::Result<()> {
        self.write_packet(&mut buffer, &destination).await
    }

    /// Whether the sink keeps buffers beyond a write call.
    fn retains_buffers(&self) -> bool {
        false
    }
}

/// Larger of the source and sink MTU hints.
#[must_use]
pub fn calculate_mtu(source_mtu: Option<usize>, sink_mtu: Option<usize>) -> Option<usize> {
    match (source_mtu, sink_mtu) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Forwards reads only, hiding every capability of the wrapped source.
///
/// Raw sinks pulling from a non-raw source get this wrapper so their kernel
/// fast path cannot bypass the source's own framing or buffering.
pub struct ReadOnlySource<'a> {
    inner: &'a mut dyn Source,
}

impl<'a> ReadOnlySource<'a> {
    /// Wrap `inner`.
    pub fn new(inner: &'a mut dyn Source) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<'a> Source for ReadOnlySource<'a> {
    async fn read_buffer(&mut self, buffer: &mut Buffer) -> io::Result<usize> {
        self.inner.read_buffer(buffer).await
    }

    fn read_mtu(&self) -> Option<usize> {
        self.inner.read_mtu()
    }
}

/// Idempotent close action shared by every half of an endpoint.
#[derive(Clone)]
pub struct Closer {
    inner: Arc<CloserInner>,
}

struct CloserInner {
    closed: AtomicBool,
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Closer {
    /// Run `action` on the first [`close`](Self::close).
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(CloserInner {
                closed: AtomicBool::new(false),
                action: Mutex::new(Some(Box::new(action))),
            }),
        }
    }

    /// A closer that only records that it was closed.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Close, returning `true` if this call performed the close.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let action = self
            .inner
            .action
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            action();
        }
        true
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A duplex stream endpoint handed to the relay.
pub struct Endpoint {
    /// Read half
    pub source: Option<Box<dyn Source>>,
    /// Write half
    pub sink: Option<Box<dyn Sink>>,
    /// Whole-endpoint close
    pub closer: Closer,
}

impl Endpoint {
    /// Assemble an endpoint from both halves.
    pub fn new(source: Box<dyn Source>, sink: Box<dyn Sink>, closer: Closer) -> Self {
        Self {
            source: Some(source),
            sink: Some(sink),
            closer,
        }
    }
}

/// A datagram endpoint handed to the relay.
pub struct PacketEndpoint {
    /// Receive half
    pub source: Option<Box<dyn PacketSource>>,
    /// Send half
    pub sink: Option<Box<dyn PacketSink>>,
    /// Whole-endpoint close
    pub closer: Closer,
}

impl PacketEndpoint {
    /// Assemble an endpoint from both halves.
    pub fn new(source: Box<dyn PacketSource>, sink: Box<dyn PacketSink>, closer: Closer) -> Self {
        Self {
            source: Some(source),
            sink: Some(sink),
            closer,
        }
    }
}
