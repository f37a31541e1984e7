//! An authenticated-encryption transform built on `chacha20poly1305`, the same AEAD
//! primitive WireGuard itself uses for transport data.
//!
//! Layout of an obfuscated datagram: `[12-byte random nonce | ciphertext | 16-byte tag]`.
//! The ciphertext is the same length as the plaintext (ChaCha20 is a stream cipher), so
//! encryption and decryption both operate in place with no resizing.

use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce, Tag};
use rand::RngCore;

use crate::error::TransformError;
use crate::transform::Transform;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct ChaCha20Poly1305Transform {
    cipher: ChaCha20Poly1305,
}

impl ChaCha20Poly1305Transform {
    pub fn new(psk: &[u8]) -> Result<Self, TransformError> {
        if psk.len() != 32 {
            return Err(TransformError::InvalidPsk(format!(
                "expected a 32-byte key, got {} bytes",
                psk.len()
            )));
        }

        Ok(Self {
            cipher: ChaCha20Poly1305::new(psk.into()),
        })
    }
}

impl Transform for ChaCha20Poly1305Transform {
    fn front_overhead(&self) -> usize {
        NONCE_LEN
    }

    fn rear_overhead(&self) -> usize {
        TAG_LEN
    }

    fn decrypt_in_place<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], TransformError> {
        if buf.len() < self.overhead() {
            return Err(TransformError::DecryptFailed);
        }

        let tag_start = buf.len() - TAG_LEN;
        let nonce = *Nonce::from_slice(&buf[..NONCE_LEN]);
        let tag = *Tag::from_slice(&buf[tag_start..]);

        self.cipher
            .decrypt_in_place_detached(&nonce, b"", &mut buf[NONCE_LEN..tag_start], &tag)
            .map_err(|_| TransformError::DecryptFailed)?;

        Ok(&mut buf[NONCE_LEN..tag_start])
    }

    fn encrypt_in_place<'b>(
        &self,
        buf: &'b mut [u8],
        plaintext_start: usize,
        plaintext_len: usize,
        buf_cap: usize,
    ) -> Result<&'b mut [u8], TransformError> {
        if plaintext_start < NONCE_LEN
            || plaintext_start + plaintext_len + TAG_LEN > buf_cap
            || buf_cap > buf.len()
        {
            return Err(TransformError::BufferTooSmall);
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        buf[plaintext_start - NONCE_LEN..plaintext_start].copy_from_slice(&nonce_bytes);

        let plaintext_end = plaintext_start + plaintext_len;
        let tag = self
            .cipher
            .encrypt_in_place_detached(
                Nonce::from_slice(&nonce_bytes),
                b"",
                &mut buf[plaintext_start..plaintext_end],
            )
            .map_err(|_| TransformError::BufferTooSmall)?;

        buf[plaintext_end..plaintext_end + TAG_LEN].copy_from_slice(&tag);

        Ok(&mut buf[plaintext_start - NONCE_LEN..plaintext_end + TAG_LEN])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> ChaCha20Poly1305Transform {
        ChaCha20Poly1305Transform::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn rejects_short_psk() {
        let err = ChaCha20Poly1305Transform::new(&[1u8; 16]).unwrap_err();
        assert!(matches!(err, TransformError::InvalidPsk(_)));
    }

    #[test]
    fn round_trips_arbitrary_plaintext() {
        let t = transform();
        let plaintext = b"handshake initiation payload!!!";

        let mut buf = vec![0u8; NONCE_LEN + plaintext.len() + TAG_LEN];
        buf[NONCE_LEN..NONCE_LEN + plaintext.len()].copy_from_slice(plaintext);

        let cap = buf.len();
        let encrypted_len = {
            let encrypted = t
                .encrypt_in_place(&mut buf, NONCE_LEN, plaintext.len(), cap)
                .unwrap();
            encrypted.len()
        };
        assert_eq!(encrypted_len, cap);

        let decrypted = t.decrypt_in_place(&mut buf).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let t = transform();
        let plaintext = b"0123456789abcdef";

        let mut buf = vec![0u8; NONCE_LEN + plaintext.len() + TAG_LEN];
        buf[NONCE_LEN..NONCE_LEN + plaintext.len()].copy_from_slice(plaintext);
        let cap = buf.len();
        t.encrypt_in_place(&mut buf, NONCE_LEN, plaintext.len(), cap)
            .unwrap();

        let mutate_at = NONCE_LEN;
        buf[mutate_at] ^= 0xFF;

        assert_eq!(t.decrypt_in_place(&mut buf), Err(TransformError::DecryptFailed));
    }

    #[test]
    fn rejects_plaintext_start_before_front_overhead() {
        let t = transform();
        let mut buf = vec![0u8; 64];

        assert!(t.encrypt_in_place(&mut buf, 4, 10, 64).is_err());
    }
}
