//! AEAD cipher families.
//!
//! Every method in the menu seals with a 16-byte tag and no associated data.
//! Ciphers operate in place on a caller-owned region whose last [`TAG_SIZE`]
//! bytes are reserved for the tag, so protocol layers can frame payloads
//! inside a single buffer without copying.
//!
//! ## Usage
//!
//! ```ignore
//! use wisp_crypto::{AeadCipher, Method};
//!
//! let cipher = Method::Aes256Gcm.session_cipher(&key)?;
//! let mut region = vec![0u8; payload.len() + TAG_SIZE];
//! region[..payload.len()].copy_from_slice(payload);
//! cipher.seal_in_place(&nonce, &mut region)?;
//! let len = cipher.open_in_place(&nonce, &mut region)?;
//! ```

use crate::{CryptoError, NONCE_SIZE, TAG_SIZE, XCHACHA_NONCE_SIZE};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use std::fmt;
use std::str::FromStr;

/// Protocol method, fixed at service construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `2022-blake3-aes-128-gcm`
    Aes128Gcm,
    /// `2022-blake3-aes-256-gcm`
    Aes256Gcm,
    /// `2022-blake3-chacha20-poly1305`
    ChaCha20Poly1305,
}

impl Method {
    /// Every supported method.
    pub const ALL: [Method; 3] = [Self::Aes128Gcm, Self::Aes256Gcm, Self::ChaCha20Poly1305];

    /// Canonical method name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Aes128Gcm => "2022-blake3-aes-128-gcm",
            Self::Aes256Gcm => "2022-blake3-aes-256-gcm",
            Self::ChaCha20Poly1305 => "2022-blake3-chacha20-poly1305",
        }
    }

    /// Length of per-session subkeys derived for this method.
    #[must_use]
    pub const fn key_size(self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => 32,
        }
    }

    /// Whether datagrams are sealed header and body together under one
    /// PSK-keyed XChaCha20-Poly1305, rather than split into an AES-masked
    /// header block plus a per-session sealed body.
    #[must_use]
    pub const fn is_unified_datagram(self) -> bool {
        matches!(self, Self::ChaCha20Poly1305)
    }

    /// Build the body AEAD for this method from a derived subkey.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if `key` is not
    /// [`Method::key_size`] bytes.
    pub fn session_cipher(self, key: &[u8]) -> Result<AeadCipher, CryptoError> {
        check_key(key, self.key_size())?;
        let invalid = |_| CryptoError::InvalidKeyLength {
            expected: self.key_size(),
            actual: key.len(),
        };
        Ok(match self {
            Self::Aes128Gcm => AeadCipher::Aes128Gcm(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(invalid)?,
            )),
            Self::Aes256Gcm => AeadCipher::Aes256Gcm(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(invalid)?,
            )),
            Self::ChaCha20Poly1305 => AeadCipher::ChaCha20Poly1305(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(invalid)?,
            )),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.name() == s)
            .ok_or_else(|| CryptoError::UnknownMethod(s.to_string()))
    }
}

fn check_key(key: &[u8], expected: usize) -> Result<(), CryptoError> {
    if key.len() == expected {
        Ok(())
    } else {
        Err(CryptoError::InvalidKeyLength {
            expected,
            actual: key.len(),
        })
    }
}

/// A keyed AEAD instance from the cipher menu.
pub enum AeadCipher {
    /// AES-128-GCM session cipher
    Aes128Gcm(Box<Aes128Gcm>),
    /// AES-256-GCM session cipher
    Aes256Gcm(Box<Aes256Gcm>),
    /// ChaCha20-Poly1305 session cipher
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
    /// XChaCha20-Poly1305, used for unified datagrams
    XChaCha20Poly1305(Box<XChaCha20Poly1305>),
}

macro_rules! with_cipher {
    ($cipher:expr, $c:ident => $body:expr) => {
        match $cipher {
            AeadCipher::Aes128Gcm($c) => $body,
            AeadCipher::Aes256Gcm($c) => $body,
            AeadCipher::ChaCha20Poly1305($c) => $body,
            AeadCipher::XChaCha20Poly1305($c) => $body,
        }
    };
}

impl AeadCipher {
    /// Build the unified datagram cipher keyed by the pre-shared key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if `psk` is not 32 bytes.
    pub fn xchacha20_poly1305(psk: &[u8]) -> Result<Self, CryptoError> {
        check_key(psk, 32)?;
        let cipher =
            XChaCha20Poly1305::new_from_slice(psk).map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: psk.len(),
            })?;
        Ok(Self::XChaCha20Poly1305(Box::new(cipher)))
    }

    /// Nonce size expected by [`seal_in_place`](Self::seal_in_place).
    #[must_use]
    pub fn nonce_size(&self) -> usize {
        match self {
            Self::XChaCha20Poly1305(_) => XCHACHA_NONCE_SIZE,
            _ => NONCE_SIZE,
        }
    }

    /// Seal `region[..len - TAG_SIZE]` in place and write the tag into the
    /// trailing [`TAG_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidNonceLength`] on a nonce of the wrong
    /// size, [`CryptoError::MessageTooShort`] if `region` cannot hold a tag,
    /// or [`CryptoError::EncryptionFailed`] if the cipher rejects the input.
    pub fn seal_in_place(&self, nonce: &[u8], region: &mut [u8]) -> Result<(), CryptoError> {
        self.check_nonce(nonce)?;
        let split = region
            .len()
            .checked_sub(TAG_SIZE)
            .ok_or(CryptoError::MessageTooShort)?;
        let (message, tag_out) = region.split_at_mut(split);

        let tag = with_cipher!(self, c => c
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), &[], message)
            .map_err(|_| CryptoError::EncryptionFailed)?);
        tag_out.copy_from_slice(&tag);
        Ok(())
    }

    /// Open a region produced by [`seal_in_place`](Self::seal_in_place),
    /// returning the plaintext length. The plaintext occupies the front of
    /// `region` on success.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] on authentication failure.
    pub fn open_in_place(&self, nonce: &[u8], region: &mut [u8]) -> Result<usize, CryptoError> {
        self.check_nonce(nonce)?;
        let split = region
            .len()
            .checked_sub(TAG_SIZE)
            .ok_or(CryptoError::MessageTooShort)?;
        let (message, tag) = region.split_at_mut(split);

        with_cipher!(self, c => c
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                &[],
                message,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| CryptoError::DecryptionFailed)?);
        Ok(split)
    }

    fn check_nonce(&self, nonce: &[u8]) -> Result<(), CryptoError> {
        let expected = self.nonce_size();
        if nonce.len() == expected {
            Ok(())
        } else {
            Err(CryptoError::InvalidNonceLength {
                expected,
                actual: nonce.len(),
            })
        }
    }
}

impl fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aes128Gcm(_) => "Aes128Gcm",
            Self::Aes256Gcm(_) => "Aes256Gcm",
            Self::ChaCha20Poly1305(_) => "ChaCha20Poly1305",
            Self::XChaCha20Poly1305(_) => "XChaCha20Poly1305",
        };
        f.debug_tuple("AeadCipher").field(&name).finish()
    }
}

/// Increment a little-endian nonce counter in place, wrapping on overflow.
pub fn increment_nonce(nonce: &mut [u8]) {
    for byte in nonce.iter_mut() {
        let (next, carry) = byte.overflowing_add(1);
        *byte = next;
        if !carry {
            return;
        }
    }
}
