//! Error types for the shield primitives.
//!
//! Every variant here is a programming error or corrupted input: fatal for
//! the call, never retried. A failed trial decryption is *not* an error and
//! is represented as `None` by the decryption API.

use thiserror::Error;

/// Errors raised by the cryptographic primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShieldError {
    /// Key material had the wrong length
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// A curve point failed the on-curve or subgroup check
    #[error("invalid curve point encoding")]
    InvalidPoint,

    /// A field element was not canonically encoded
    #[error("non-canonical field element encoding")]
    NonCanonicalField,

    /// A ciphertext or record was shorter than its fixed layout requires
    #[error("truncated {what}: need {need} bytes, got {got}")]
    Truncated {
        what: &'static str,
        need: usize,
        got: usize,
    },

    /// A length prefix disagreed with the bytes that followed it
    #[error("inconsistent length prefix in {0}")]
    LengthMismatch(&'static str),

    /// The system RNG failed while drawing randomness
    #[error("randomness source failed")]
    Rng,

    /// AEAD encryption failed (key/nonce misuse)
    #[error("note encryption failed")]
    Encryption,

    /// A memo exceeded the maximum encodable length
    #[error("memo too long: {got} bytes, maximum {max}")]
    MemoTooLong { got: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = ShieldError::InvalidKeyLength {
            expected: 32,
            got: 16,
        };
        assert_eq!(e.to_string(), "invalid key length: expected 32 bytes, got 16");

        let e = ShieldError::Truncated {
            what: "encrypted note",
            need: 84,
            got: 10,
        };
        assert!(e.to_string().contains("encrypted note"));
    }
}
