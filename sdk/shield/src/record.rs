//! On-ledger wire layouts.
//!
//! These byte layouts are fixed by the deployed ledger/indexer pair and
//! must never drift:
//!
//! ```text
//! encrypted note:    epk.x (32) | epk.y (32) | ct_len (4 LE) | ciphertext | tag (16)
//! commitment record: pool_context (32) | commitment (32) | leaf_index (8 LE)
//!                    | encrypted_note_len (4 LE) | encrypted_note
//! ```
//!
//! Parsing is strict but recoverable: a malformed buffer yields a typed
//! error the scanner turns into a per-record skip.

use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::error::ShieldError;
use crate::note::PoolContext;

/// Discriminator identifying shielded-note records among all compressed
/// records owned by the program
pub const NOTE_RECORD_DISCRIMINATOR: [u8; 8] = *b"clx/note";

/// Reserved all-zero commitment: fills unused fixed-arity output slots
/// (e.g. an unshield with exactly zero change) and is never a real note
pub const ZERO_COMMITMENT: [u8; 32] = [0u8; 32];

/// AEAD tag length
pub const AUTH_TAG_LEN: usize = 16;

/// Fixed overhead of an encrypted note: epk coords + length prefix + tag
pub const ENCRYPTED_NOTE_OVERHEAD: usize = 32 + 32 + 4 + AUTH_TAG_LEN;

/// Fixed header of a commitment record before the encrypted note
pub const COMMITMENT_RECORD_HEADER: usize = 32 + 32 + 8 + 4;

/// An encrypted note as published on-ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedNotePayload {
    /// Ephemeral public key, affine x coordinate
    pub epk_x: [u8; 32],
    /// Ephemeral public key, affine y coordinate
    pub epk_y: [u8; 32],
    /// AEAD ciphertext (tag excluded)
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    /// AEAD authentication tag
    pub tag: [u8; AUTH_TAG_LEN],
}

impl EncryptedNotePayload {
    /// Total encoded length
    pub fn encoded_len(&self) -> usize {
        ENCRYPTED_NOTE_OVERHEAD + self.ciphertext.len()
    }

    /// Encode to the fixed wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&self.epk_x);
        bytes.extend_from_slice(&self.epk_y);
        bytes.extend_from_slice(&(self.ciphertext.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.ciphertext);
        bytes.extend_from_slice(&self.tag);
        bytes
    }

    /// Parse from the fixed wire layout, consuming the whole slice
    pub fn parse(bytes: &[u8]) -> Result<Self, ShieldError> {
        if bytes.len() < ENCRYPTED_NOTE_OVERHEAD {
            return Err(ShieldError::Truncated {
                what: "encrypted note",
                need: ENCRYPTED_NOTE_OVERHEAD,
                got: bytes.len(),
            });
        }

        let epk_x: [u8; 32] = bytes[0..32].try_into().expect("bounds checked");
        let epk_y: [u8; 32] = bytes[32..64].try_into().expect("bounds checked");
        let ct_len = u32::from_le_bytes(bytes[64..68].try_into().expect("bounds checked")) as usize;

        if bytes.len() != ENCRYPTED_NOTE_OVERHEAD + ct_len {
            return Err(ShieldError::LengthMismatch("encrypted note"));
        }

        let ciphertext = bytes[68..68 + ct_len].to_vec();
        let tag: [u8; AUTH_TAG_LEN] = bytes[68 + ct_len..].try_into().expect("bounds checked");

        Ok(Self {
            epk_x,
            epk_y,
            ciphertext,
            tag,
        })
    }
}

/// A shielded-note commitment record as stored in compressed ledger state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    /// Pool / ballot / market the note belongs to
    pub pool_context: PoolContext,
    /// The note commitment
    pub commitment: Commitment,
    /// Position in the append-only commitment structure. Assigned by the
    /// ledger at creation; zero in client-declared records.
    pub leaf_index: u64,
    /// The encrypted note for the recipient
    pub encrypted_note: EncryptedNotePayload,
}

impl CommitmentRecord {
    /// Encode to the fixed wire layout
    pub fn encode(&self) -> Vec<u8> {
        let note_bytes = self.encrypted_note.encode();
        let mut bytes = Vec::with_capacity(COMMITMENT_RECORD_HEADER + note_bytes.len());
        bytes.extend_from_slice(&self.pool_context.0);
        bytes.extend_from_slice(self.commitment.as_bytes());
        bytes.extend_from_slice(&self.leaf_index.to_le_bytes());
        bytes.extend_from_slice(&(note_bytes.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&note_bytes);
        bytes
    }

    /// Parse from the fixed wire layout
    pub fn parse(bytes: &[u8]) -> Result<Self, ShieldError> {
        if bytes.len() < COMMITMENT_RECORD_HEADER {
            return Err(ShieldError::Truncated {
                what: "commitment record",
                need: COMMITMENT_RECORD_HEADER,
                got: bytes.len(),
            });
        }

        let pool_context = PoolContext(bytes[0..32].try_into().expect("bounds checked"));
        let commitment = Commitment(bytes[32..64].try_into().expect("bounds checked"));
        let leaf_index = u64::from_le_bytes(bytes[64..72].try_into().expect("bounds checked"));
        let note_len =
            u32::from_le_bytes(bytes[72..76].try_into().expect("bounds checked")) as usize;

        if bytes.len() != COMMITMENT_RECORD_HEADER + note_len {
            return Err(ShieldError::LengthMismatch("commitment record"));
        }

        let encrypted_note = EncryptedNotePayload::parse(&bytes[76..])?;

        Ok(Self {
            pool_context,
            commitment,
            leaf_index,
            encrypted_note,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> EncryptedNotePayload {
        EncryptedNotePayload {
            epk_x: [1u8; 32],
            epk_y: [2u8; 32],
            ciphertext: vec![0xAB; 74],
            tag: [3u8; 16],
        }
    }

    #[test]
    fn test_encrypted_note_layout() {
        let payload = sample_payload();
        let bytes = payload.encode();

        assert_eq!(bytes.len(), ENCRYPTED_NOTE_OVERHEAD + 74);
        assert_eq!(&bytes[0..32], &[1u8; 32]);
        assert_eq!(&bytes[32..64], &[2u8; 32]);
        assert_eq!(&bytes[64..68], &74u32.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 16..], &[3u8; 16]);

        assert_eq!(EncryptedNotePayload::parse(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_commitment_record_layout() {
        let record = CommitmentRecord {
            pool_context: PoolContext([7u8; 32]),
            commitment: Commitment([8u8; 32]),
            leaf_index: 0x0102030405060708,
            encrypted_note: sample_payload(),
        };
        let bytes = record.encode();

        assert_eq!(&bytes[0..32], &[7u8; 32]);
        assert_eq!(&bytes[32..64], &[8u8; 32]);
        assert_eq!(
            &bytes[64..72],
            &0x0102030405060708u64.to_le_bytes(),
            "leaf index is little-endian"
        );

        assert_eq!(CommitmentRecord::parse(&bytes).unwrap(), record);
    }

    #[test]
    fn test_truncated_rejected() {
        let err = EncryptedNotePayload::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, ShieldError::Truncated { .. }));

        let err = CommitmentRecord::parse(&[0u8; 40]).unwrap_err();
        assert!(matches!(err, ShieldError::Truncated { .. }));
    }

    #[test]
    fn test_length_prefix_mismatch_rejected() {
        let mut bytes = sample_payload().encode();
        // Claim a longer ciphertext than the buffer holds.
        bytes[64..68].copy_from_slice(&200u32.to_le_bytes());
        assert_eq!(
            EncryptedNotePayload::parse(&bytes).unwrap_err(),
            ShieldError::LengthMismatch("encrypted note")
        );
    }
}
