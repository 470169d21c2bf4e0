//! Per-session packet dispatch.
//!
//! The first authenticated packet of a datagram session opens a [`NatConn`]
//! and hands it to the handler on its own task. Later packets for the same
//! session are queued to that connection; a full queue drops the packet
//! rather than stalling the receive loop.
//!
//! An entry is bound to the session value that opened it. A packet for a
//! session that was recreated after expiry, or for one whose connection was
//! dropped by the handler, replaces the entry and opens a new connection.

use crate::handler::{Handler, Metadata};
use crate::udp::{ServerPacketWriter, UdpSession};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use wisp_transport::endpoint::{OwnedPacketRead, PacketEndpoint};
use wisp_transport::{Buffer, Closer, Destination, PacketSource};

/// Packets queued per session before new ones are dropped.
pub const NAT_QUEUE_DEPTH: usize = 64;

type Packet = (Buffer, Destination);

struct NatEntry {
    generation: u64,
    session: Arc<UdpSession>,
    sender: mpsc::Sender<Packet>,
}

impl NatEntry {
    fn serves(&self, session: &Arc<UdpSession>) -> bool {
        Arc::ptr_eq(&self.session, session) && !self.sender.is_closed()
    }
}

/// Routes decrypted packets to their session's connection.
#[derive(Default)]
pub struct UdpNat {
    entries: Arc<DashMap<u64, NatEntry>>,
    generation: AtomicU64,
}

impl UdpNat {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `packet` to the connection for `session_id`, opening one with
    /// `writer` and handing it to `handler` unless a live connection for this
    /// `session` exists.
    pub(crate) fn dispatch(
        &self,
        handler: &Arc<dyn Handler>,
        session_id: u64,
        session: Arc<UdpSession>,
        packet: Buffer,
        metadata: Metadata,
        writer: impl FnOnce(Arc<UdpSession>) -> ServerPacketWriter,
    ) {
        let destination = metadata.destination.clone();
        let mut opened = None;
        let sender = match self.entries.entry(session_id) {
            Entry::Occupied(occupied) if occupied.get().serves(&session) => {
                occupied.get().sender.clone()
            }
            entry => {
                if let Entry::Occupied(stale) = &entry {
                    debug!(
                        session = %format_args!("{session_id:016x}"),
                        generation = stale.get().generation,
                        "replacing stale packet connection"
                    );
                }
                let (sender, receiver) = mpsc::channel(NAT_QUEUE_DEPTH);
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                opened = Some((receiver, generation));
                entry.insert(NatEntry {
                    generation,
                    session: session.clone(),
                    sender: sender.clone(),
                });
                sender
            }
        };

        if let Some((receiver, generation)) = opened {
            let entries = self.entries.clone();
            let closer = Closer::new(move || {
                entries.remove_if(&session_id, |_, entry| entry.generation == generation);
            });
            let conn = NatConn {
                session_id,
                source: NatSource { receiver },
                sink: writer(session),
                closer,
            };
            debug!(
                session = %format_args!("{session_id:016x}"),
                source = %metadata.source,
                destination = %metadata.destination,
                "packet connection opened"
            );
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(error) = handler.new_packet_connection(conn, metadata).await {
                    handler.handle_error(error);
                }
            });
        }

        if let Err(err) = sender.try_send((packet, destination)) {
            trace!(session = %format_args!("{session_id:016x}"), "packet dropped: {err}");
        }
    }

    /// Drop connections whose session fails `alive`.
    pub fn retain(&self, mut alive: impl FnMut(u64) -> bool) {
        self.entries.retain(|id, _| alive(*id));
    }

    /// Whether a connection is open for `session_id`.
    #[must_use]
    pub fn contains(&self, session_id: u64) -> bool {
        self.entries.contains_key(&session_id)
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no connection is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Inbound half of a [`NatConn`]; ends once the session is dropped.
pub struct NatSource {
    receiver: mpsc::Receiver<Packet>,
}

#[async_trait]
impl PacketSource for NatSource {
    async fn read_packet(&mut self, buffer: &mut Buffer) -> io::Result<Option<Destination>> {
        let Some((packet, destination)) = self.receiver.recv().await else {
            return Ok(None);
        };
        buffer.write(packet.bytes()).map_err(io::Error::other)?;
        Ok(Some(destination))
    }

    fn as_owned_reader(&mut self) -> Option<&mut dyn OwnedPacketRead> {
        Some(self)
    }
}

#[async_trait]
impl OwnedPacketRead for NatSource {
    async fn read_packet_owned(&mut self) -> io::Result<Option<(Buffer, Destination)>> {
        Ok(self.receiver.recv().await)
    }
}

/// One datagram session as seen by the handler.
///
/// Reading yields decrypted payloads with their requested destination;
/// writing seals a server packet back to the session's latest peer address.
pub struct NatConn {
    session_id: u64,
    source: NatSource,
    sink: ServerPacketWriter,
    closer: Closer,
}

impl NatConn {
    /// Client session id.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Split into the receive half, the send half and the close.
    pub fn into_parts(self) -> (NatSource, ServerPacketWriter, Closer) {
        (self.source, self.sink, self.closer)
    }

    /// View as a relay endpoint.
    pub fn into_endpoint(self) -> PacketEndpoint {
        PacketEndpoint::new(Box::new(self.source), Box::new(self.sink), self.closer)
    }
}

impl std::fmt::Debug for NatConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatConn")
            .field("session_id", &format_args!("{:016x}", self.session_id))
            .field("closed", &self.closer.is_closed())
            .finish()
    }
}

impl From<NatConn> for PacketEndpoint {
    fn from(conn: NatConn) -> Self {
        conn.into_endpoint()
    }
}
