//! Wire constants and timestamp policy shared by streams and datagrams.

use crate::error::{Error, Result};
use std::time::{SystemTime, UNIX_EPOCH};
use wisp_crypto::kdf::derive_subkey;
use wisp_crypto::{AeadCipher, Method, TAG_SIZE};

/// Header type sent by clients
pub const HEADER_TYPE_CLIENT: u8 = 0;
/// Header type sent by servers
pub const HEADER_TYPE_SERVER: u8 = 1;

/// Accepted clock skew in seconds, in either direction
pub const TIMESTAMP_TOLERANCE: u64 = 30;

/// Largest payload carried by one stream chunk
pub const MAX_CHUNK_SIZE: usize = 0xFFFF;

/// Sealed length prefix of a stream chunk
pub const CHUNK_LENGTH_SIZE: usize = 2 + TAG_SIZE;

/// Datagram session id size
pub const SESSION_ID_SIZE: usize = 8;
/// Datagram packet id size
pub const PACKET_ID_SIZE: usize = 8;

/// Name reported in connection metadata
pub const PROTOCOL_NAME: &str = "shadowsocks-2022";

/// Session cipher keyed by KDF(`psk`, `salt`).
///
/// Streams use their random salt, datagram sessions the big-endian bytes of
/// the session id.
///
/// # Errors
///
/// Fails only if the derived key does not fit the method, which cannot
/// happen for the fixed menu.
pub fn session_cipher(method: Method, psk: &[u8], salt: &[u8]) -> Result<AeadCipher> {
    let key = derive_subkey(psk, salt, method.key_size());
    Ok(method.session_cipher(&key)?)
}

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Check `timestamp` against `now` with [`TIMESTAMP_TOLERANCE`].
///
/// # Errors
///
/// Returns [`Error::BadTimestamp`] if the two differ by more than the
/// tolerance.
pub fn validate_timestamp(timestamp: u64, now: u64) -> Result<()> {
    if timestamp.abs_diff(now) > TIMESTAMP_TOLERANCE {
        return Err(Error::BadTimestamp {
            timestamp,
            now,
            tolerance: TIMESTAMP_TOLERANCE,
        });
    }
    Ok(())
}
