//! The obfuscation/encryption abstraction applied to every datagram on the client-facing
//! leg. The relay core only depends on this trait; concrete implementations live in
//! [`crate::transforms`].

use crate::error::TransformError;

/// A stateless, in-place packet transform with declared front and rear overhead.
///
/// Implementations must be safe to share across tasks (`Send + Sync`) since every session's
/// ingress and egress loop calls into the same instance concurrently.
pub trait Transform: Send + Sync {
    /// Bytes reserved at the start of the buffer, before the plaintext.
    fn front_overhead(&self) -> usize;

    /// Bytes reserved at the end of the buffer, after the plaintext.
    fn rear_overhead(&self) -> usize;

    /// Total overhead; convenience for callers that only care about the sum.
    fn overhead(&self) -> usize {
        self.front_overhead() + self.rear_overhead()
    }

    /// Consumes an obfuscated datagram occupying `buf[..]` and returns the plaintext slice,
    /// which must lie within `buf`. Fails if the datagram is malformed or does not
    /// authenticate.
    fn decrypt_in_place<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], TransformError>;

    /// Writes the obfuscated form of the plaintext at `buf[plaintext_start..plaintext_start
    /// + plaintext_len]` into `buf`, using the reserved front/rear regions, and returns the
    /// full obfuscated slice. `buf_cap` is the usable length of `buf` (`buf.len()` for a
    /// fully-sized buffer, but callers may pass a smaller logical capacity).
    fn encrypt_in_place<'b>(
        &self,
        buf: &'b mut [u8],
        plaintext_start: usize,
        plaintext_len: usize,
        buf_cap: usize,
    ) -> Result<&'b mut [u8], TransformError>;
}

/// Resolves a configured proxy mode and pre-shared key into a concrete [`Transform`].
pub fn get_handler(mode: &str, psk: &[u8]) -> Result<Box<dyn Transform>, TransformError> {
    match mode {
        "plain" => Ok(Box::new(crate::transforms::plain::Plain)),
        "chacha20poly1305" => Ok(Box::new(
            crate::transforms::chacha20poly1305::ChaCha20Poly1305Transform::new(psk)?,
        )),
        other => Err(TransformError::UnknownMode(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_is_rejected() {
        let err = get_handler("rot13", b"").unwrap_err();
        assert_eq!(err, TransformError::UnknownMode("rot13".to_string()));
    }
}
