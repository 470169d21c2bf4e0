//! BLAKE3 session subkey derivation.
//!
//! Every stream direction and every datagram session gets its own subkey,
//! derived from the long-term pre-shared key and a per-use salt (a random
//! stream salt, or the 8 big-endian bytes of a datagram session id).

use zeroize::Zeroizing;

/// BLAKE3 `derive_key` context for session subkeys.
pub const SUBKEY_CONTEXT: &str = "shadowsocks 2022 session subkey";

/// Derive `len` bytes of subkey material from `psk` and `salt`.
///
/// The input key material is `psk || salt`; the output is read from the
/// BLAKE3 XOF so any length can be produced.
#[must_use]
pub fn derive_subkey(psk: &[u8], salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut hasher = blake3::Hasher::new_derive_key(SUBKEY_CONTEXT);
    hasher.update(psk);
    hasher.update(salt);

    let mut key = Zeroizing::new(vec![0u8; len]);
    hasher.finalize_xof().fill(&mut key);
    key
}

/// 64-bit fingerprint of a salt, used as the replay filter key.
#[must_use]
pub fn salt_fingerprint(salt: &[u8]) -> u64 {
    let hash = blake3::hash(salt);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_subkey_deterministic() {
        let a = derive_subkey(&[1u8; 32], &[2u8; 32], 32);
        let b = derive_subkey(&[1u8; 32], &[2u8; 32], 32);
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_derive_subkey_depends_on_salt() {
        let a = derive_subkey(&[1u8; 32], &[2u8; 32], 32);
        let b = derive_subkey(&[1u8; 32], &[3u8; 32], 32);
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_short_key_is_prefix_of_long_key() {
        let short = derive_subkey(&[9u8; 32], &7u64.to_be_bytes(), 16);
        let long = derive_subkey(&[9u8; 32], &7u64.to_be_bytes(), 32);
        assert_eq!(short.len(), 16);
        assert_eq!(&long[..16], &short[..]);
    }

    #[test]
    fn test_matches_blake3_derive_key() {
        let mut material = vec![5u8; 32];
        material.extend_from_slice(&[6u8; 32]);
        let expected = blake3::derive_key(SUBKEY_CONTEXT, &material);
        let key = derive_subkey(&[5u8; 32], &[6u8; 32], 32);
        assert_eq!(&key[..], &expected[..]);
    }

    #[test]
    fn test_salt_fingerprint_differs() {
        assert_ne!(salt_fingerprint(&[0u8; 32]), salt_fingerprint(&[1u8; 32]));
    }
}
