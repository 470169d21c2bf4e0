//! # Wisp Transport
//!
//! Relay pipeline for the Wisp proxy.
//!
//! This crate provides:
//! - Headroom-aware buffers backed by a bounded slab pool
//! - Capability traits describing what a source or sink can do
//! - A copy engine that picks the cheapest data path per call
//! - Relay sessions pairing upload and download under one cancellation scope
//! - TCP and UDP endpoints, plus the SOCKS-style destination codec
//!
//! ## Data Paths
//!
//! | Order | Condition | Path |
//! |-------|-----------|------|
//! | 1 | source is self-draining | source writes itself |
//! | 2 | sink is self-filling | sink pulls, raw sinks see a read-only source |
//! | 3 | owned-buffer source, no sink headroom | buffers handed over as they come |
//! | 4 | sink retains buffers | fresh pooled buffer per chunk |
//! | 5 | otherwise | one reusable buffer of MTU plus headroom |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod buffer;
pub mod copy;
pub mod endpoint;
pub mod io;
pub mod packet_copy;
pub mod relay;
pub mod task;
pub mod tcp;
pub mod transport;
pub mod udp_async;

pub use address::{AddressError, Destination};
pub use buffer::{BUFFER_SIZE, Buffer, BufferError, BufferPool, UDP_BUFFER_SIZE};
pub use copy::{CopyError, copy};
pub use endpoint::{
    Closer, Endpoint, Headroom, PacketEndpoint, PacketSink, PacketSource, Sink, Source,
};
pub use io::StreamParts;
pub use packet_copy::copy_packet;
pub use relay::{copy_conn, copy_packet_conn};
pub use tcp::TcpEndpoint;
pub use transport::{Transport, TransportError, TransportStats};
pub use udp_async::{AsyncUdpTransport, UdpPacketEndpoint};
