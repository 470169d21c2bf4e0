//! # Wisp Crypto
//!
//! Cryptographic building blocks for the Wisp protocol engine.
//!
//! This crate provides:
//! - A fixed menu of AEAD cipher families selected by method name
//! - BLAKE3 session subkey derivation from a pre-shared key and a salt
//! - The AES block cipher used to mask datagram headers
//! - Secure random number generation
//! - Replay filters for handshake salts and datagram packet ids
//!
//! ## Cipher Suite
//!
//! | Method | Session Key | Body AEAD | Datagram Header |
//! |--------|-------------|-----------|-----------------|
//! | `2022-blake3-aes-128-gcm` | 16 bytes | AES-128-GCM | AES block cipher (PSK) |
//! | `2022-blake3-aes-256-gcm` | 32 bytes | AES-256-GCM | AES block cipher (PSK) |
//! | `2022-blake3-chacha20-poly1305` | 32 bytes | ChaCha20-Poly1305 | XChaCha20-Poly1305 (PSK) |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod block;
pub mod error;
pub mod kdf;
pub mod random;
pub mod replay;
pub mod salt_filter;

pub use aead::{AeadCipher, Method};
pub use error::CryptoError;

/// Pre-shared key size required by every method
pub const PSK_SIZE: usize = 32;

/// Stream handshake salt size
pub const SALT_SIZE: usize = 32;

/// AEAD authentication tag size (identical for every supported cipher)
pub const TAG_SIZE: usize = 16;

/// Nonce size of the per-session AEAD ciphers
pub const NONCE_SIZE: usize = 12;

/// Nonce size of the unified datagram cipher (XChaCha20-Poly1305)
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// Block size of the datagram header cipher
pub const BLOCK_SIZE: usize = 16;
