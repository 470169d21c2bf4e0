//! # Wisp Core
//!
//! Protocol engine for the Wisp proxy, speaking Shadowsocks 2022.
//!
//! This crate provides:
//! - The AEAD chunk stream and the stream handshake
//! - A lazily sent response header bound to the request salt
//! - Datagram sessions with replay protection and first-packet rollback
//! - A time-evicting session table and per-session packet dispatch
//! - Client counterparts for streams and datagrams
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Service                                 │
//! │   (handshake, salt filter, datagram sessions, janitor)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              ServerConn            │          NatConn            │
//! │   (chunk stream + lazy response)   │  (per-session packet flow)  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Handler                                 │
//! │   (relays to the destination with the copy engine)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod nat;
pub mod protocol;
pub mod server_conn;
pub mod service;
pub mod session_table;
pub mod stream;
pub mod udp;

pub use client::{ClientConn, ClientPacketCodec, Request};
pub use config::{DEFAULT_UDP_TIMEOUT, ServiceConfig};
pub use error::{Error, Result};
pub use handler::{Handler, Metadata};
pub use nat::NatConn;
pub use server_conn::ServerConn;
pub use service::Service;
pub use session_table::SessionTable;
pub use stream::{AeadReader, AeadWriter};
pub use udp::UdpSession;
pub use wisp_crypto::Method;
