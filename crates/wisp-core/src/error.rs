//! Protocol engine errors.
//!
//! Every rejection at the network boundary maps to one of these variants.
//! None of them is ever reported to the remote peer; the connection or packet
//! is dropped and the error is only logged.

use std::io;
use thiserror::Error;
use wisp_crypto::CryptoError;
use wisp_transport::{AddressError, BufferError, CopyError, TransportError};

/// Result alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Pre-shared key has the wrong size; the service cannot start
    #[error("bad key length: expected {expected} bytes, got {actual}")]
    BadKeyLength {
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Salt or packet id was already seen
    #[error("replay detected")]
    ReplayDetected,

    /// Header type byte does not match the expected direction
    #[error("bad header type: {0}")]
    BadHeaderType(u8),

    /// Timestamp outside the accepted skew
    #[error("bad timestamp: {timestamp} differs from local time {now} by more than {tolerance}s")]
    BadTimestamp {
        /// Timestamp carried by the peer
        timestamp: u64,
        /// Local time
        now: u64,
        /// Accepted skew in seconds
        tolerance: u64,
    },

    /// Response does not echo the request salt
    #[error("bad request salt in response")]
    BadRequestSalt,

    /// Datagram addressed to a different client session
    #[error("packet for unknown session {0:016x}")]
    BadSessionId(u64),

    /// AEAD authentication failed
    #[error("decrypt failure")]
    DecryptFailure,

    /// Destination address could not be decoded
    #[error("address decode failure: {0}")]
    AddressDecode(#[from] AddressError),

    /// Packet shorter than its fixed header
    #[error("packet too short: need {needed} bytes, have {available}")]
    PacketTooShort {
        /// Minimum length
        needed: usize,
        /// Actual length
        available: usize,
    },

    /// Relay failed
    #[error(transparent)]
    Copy(#[from] CopyError),

    /// I/O error from the underlying stream or socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Cryptographic primitive failed
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Peer closed the stream before the handshake completed
    #[error("connection closed")]
    Closed,
}

impl Error {
    /// Whether this error is a handshake or packet rejection rather than a
    /// transport failure.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::BadKeyLength { .. }
                | Self::ReplayDetected
                | Self::BadHeaderType(_)
                | Self::BadTimestamp { .. }
                | Self::BadRequestSalt
                | Self::BadSessionId(_)
                | Self::DecryptFailure
                | Self::AddressDecode(_)
                | Self::PacketTooShort { .. }
        )
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => Self::DecryptFailure,
            CryptoError::ReplayDetected => Self::ReplayDetected,
            CryptoError::InvalidKeyLength { expected, actual } => {
                Self::BadKeyLength { expected, actual }
            }
            other => Self::Crypto(other),
        }
    }
}

impl From<BufferError> for Error {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Short { wanted, available } => Self::PacketTooShort {
                needed: wanted,
                available,
            },
            other => Self::Io(io::Error::other(other)),
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Self::Io(err.into())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Closed => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            Error::Copy(e) => e.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
