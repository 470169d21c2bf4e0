//! Datagram copy engine.
//!
//! Same path selection as [`copy`](crate::copy::copy) minus the
//! self-draining and self-filling delegations, with buffers sized for
//! whole datagrams.

use crate::buffer::{Buffer, BufferPool, UDP_BUFFER_SIZE};
use crate::copy::{CopyError, buffer_size, read_failure};
use crate::endpoint::{OwnedPacketRead, PacketSink, PacketSource, calculate_mtu};

/// Relay packets from `source` into `sink` until the source closes,
/// returning the number of payload bytes moved.
///
/// # Errors
///
/// Returns [`CopyError::Handshake`] if the very first receive fails,
/// [`CopyError::Io`] for later failures and any send failure.
pub async fn copy_packet(
    sink: &mut dyn PacketSink,
    source: &mut dyn PacketSource,
) -> Result<u64, CopyError> {
    let front = sink.front_headroom();
    let rear = sink.rear_headroom();

    if front + rear == 0 {
        if let Some(owned) = source.as_owned_reader() {
            return copy_packet_owned(sink, owned).await;
        }
    }

    let size = buffer_size(
        calculate_mtu(source.read_mtu(), sink.mtu()),
        front + rear,
        UDP_BUFFER_SIZE,
    );

    if sink.retains_buffers() {
        return copy_packet_with_pool(sink, source, size, front, rear).await;
    }

    let mut buffer = Buffer::new(size);
    buffer.reserve_rear(rear)?;
    let mut copied = 0u64;
    loop {
        buffer.reset(front)?;
        let destination = match source.read_packet(&mut buffer).await {
            Ok(Some(destination)) => destination,
            Ok(None) => return Ok(copied),
            Err(e) => return Err(read_failure(e, copied > 0)),
        };
        let n = buffer.len();
        sink.write_packet(&mut buffer, &destination).await?;
        copied += n as u64;
    }
}

async fn copy_packet_owned(
    sink: &mut dyn PacketSink,
    source: &mut dyn OwnedPacketRead,
) -> Result<u64, CopyError> {
    let mut copied = 0u64;
    loop {
        let (buffer, destination) = match source.read_packet_owned().await {
            Ok(Some(packet)) => packet,
            Ok(None) => return Ok(copied),
            Err(e) => return Err(read_failure(e, copied > 0)),
        };
        let n = buffer.len();
        sink.write_packet_owned(buffer, destination).await?;
        copied += n as u64;
    }
}

async fn copy_packet_with_pool(
    sink: &mut dyn PacketSink,
    source: &mut dyn PacketSource,
    size: usize,
    front: usize,
    rear: usize,
) -> Result<u64, CopyError> {
    let pool = BufferPool::global();
    let mut copied = 0u64;
    loop {
        let mut buffer = pool.get(size);
        buffer.reserve_rear(rear)?;
        buffer.reset(front)?;
        let destination = match source.read_packet(&mut buffer).await {
            Ok(Some(destination)) => destination,
            Ok(None) => return Ok(copied),
            Err(e) => return Err(read_failure(e, copied > 0)),
        };
        let n = buffer.len();
        sink.write_packet_owned(buffer, destination).await?;
        copied += n as u64;
    }
}
