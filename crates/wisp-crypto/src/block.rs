//! AES block cipher for datagram header masking.
//!
//! In split datagram mode the first 16 bytes of a packet (session id and
//! packet id) are encrypted as a single AES block keyed by the pre-shared
//! key, so a receiver can route the packet to its session before touching
//! the sealed body.

use crate::{BLOCK_SIZE, CryptoError};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};

/// Single-block AES keyed by the pre-shared key.
pub enum HeaderCipher {
    /// 16-byte key
    Aes128(Box<Aes128>),
    /// 32-byte key
    Aes256(Box<Aes256>),
}

impl HeaderCipher {
    /// Build a header cipher; the AES variant follows the key length.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless `key` is 16 or 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key.len(),
        };
        match key.len() {
            16 => Ok(Self::Aes128(Box::new(
                Aes128::new_from_slice(key).map_err(invalid)?,
            ))),
            32 => Ok(Self::Aes256(Box::new(
                Aes256::new_from_slice(key).map_err(invalid)?,
            ))),
            actual => Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual,
            }),
        }
    }

    /// Encrypt the first block of `data` in place.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MessageTooShort`] if `data` is shorter than a block.
    pub fn encrypt_block(&self, data: &mut [u8]) -> Result<(), CryptoError> {
        let block = first_block(data)?;
        match self {
            Self::Aes128(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes256(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
        }
        Ok(())
    }

    /// Decrypt the first block of `data` in place.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MessageTooShort`] if `data` is shorter than a block.
    pub fn decrypt_block(&self, data: &mut [u8]) -> Result<(), CryptoError> {
        let block = first_block(data)?;
        match self {
            Self::Aes128(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes256(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
        }
        Ok(())
    }
}

fn first_block(data: &mut [u8]) -> Result<&mut [u8], CryptoError> {
    data.get_mut(..BLOCK_SIZE).ok_or(CryptoError::MessageTooShort)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_round_trip() {
        let cipher = HeaderCipher::new(&[0x11u8; 32]).unwrap();
        let mut data = [0u8; 24];
        data[..8].copy_from_slice(&42u64.to_be_bytes());
        data[16..].copy_from_slice(b"trailing");
        let original = data;

        cipher.encrypt_block(&mut data).unwrap();
        assert_ne!(data[..16], original[..16]);
        assert_eq!(data[16..], original[16..]);

        cipher.decrypt_block(&mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_fips197_aes128_vector() {
        let key = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let mut block = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        HeaderCipher::new(&key)
            .unwrap()
            .encrypt_block(&mut block)
            .unwrap();
        assert_eq!(hex::encode(block), "69c4e0d86a7b0430d8cdb78070b4c55a");
    }

    #[test]
    fn test_rejects_bad_key_and_short_block() {
        assert!(HeaderCipher::new(&[0u8; 24]).is_err());
        let cipher = HeaderCipher::new(&[0u8; 16]).unwrap();
        assert_eq!(
            cipher.encrypt_block(&mut [0u8; 15]),
            Err(CryptoError::MessageTooShort)
        );
    }
}
