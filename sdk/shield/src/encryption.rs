//! Note encryption.
//!
//! Encrypts note contents for the recipient using the stealth DH shared
//! point + ChaCha20-Poly1305.
//!
//! ```text
//! Flow:
//! 1. Sender derives a one-time stealth address (fresh ephemeral scalar)
//! 2. Encryption key = blake3_derive("calyx/note/v1", shared_point || epk)
//! 3. Ciphertext, tag = ChaCha20-Poly1305(key, zero nonce, plaintext)
//! 4. Output = (epk.x, epk.y, ciphertext, tag)
//! ```
//!
//! The nonce is fixed at zero: every note gets a unique key because the
//! ephemeral scalar is fresh per output. Trial decryption with a foreign
//! viewing key fails the AEAD tag and returns `None` — that silent miss is
//! the contract the scanner is built on, so nothing here logs, errors, or
//! otherwise distinguishes "not mine" from "garbage".

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use ark_std::rand::Rng;

use crate::commitment::Commitment;
use crate::error::ShieldError;
use crate::keys::{ShieldedAddress, ViewingKey};
use crate::note::{Note, PoolContext, TokenId};
use crate::record::{AUTH_TAG_LEN, EncryptedNotePayload};
use crate::stealth::{EphemeralPublicKey, StealthAddress, recover_stealth};

/// Maximum memo length carried inside a note payload
pub const MAX_MEMO_LEN: usize = 512;

const NOTE_NONCE: [u8; 12] = [0u8; 12];

/// A note sealed for its recipient: the plaintext view for the sender, the
/// encrypted payload for the ledger record.
#[derive(Debug, Clone)]
pub struct SealedNote {
    pub note: Note,
    pub payload: EncryptedNotePayload,
}

/// Note plaintext layout (inside the AEAD):
/// `amount (8 LE) | token_id (32) | randomness (32) | memo_len (2 LE) | memo`
struct NotePlaintext {
    amount: u64,
    token_id: [u8; 32],
    randomness: [u8; 32],
    memo: Vec<u8>,
}

/// Encrypt a new note to a recipient's long-term address.
///
/// Draws a fresh stealth address and fresh blinding; fails only on RNG
/// failure or an oversized memo.
pub fn seal_note<R: Rng>(
    recipient: &ShieldedAddress,
    token_id: TokenId,
    amount: u64,
    context: PoolContext,
    memo: Option<&[u8]>,
    rng: &mut R,
) -> Result<SealedNote, ShieldError> {
    let memo = memo.unwrap_or_default();
    if memo.len() > MAX_MEMO_LEN {
        return Err(ShieldError::MemoTooLong {
            got: memo.len(),
            max: MAX_MEMO_LEN,
        });
    }

    let generated = StealthAddress::generate(recipient, rng)?;

    let mut randomness = [0u8; 32];
    rng.try_fill_bytes(&mut randomness)
        .map_err(|_| ShieldError::Rng)?;

    let note = Note::with_randomness(
        generated.address.stealth_pk,
        token_id,
        amount,
        randomness,
        context,
    );

    let (epk_x, epk_y) = generated.address.ephemeral_pk.to_coords();
    let key = note_key(&generated.shared_point, &epk_x, &epk_y);

    let plaintext = serialize_plaintext(&NotePlaintext {
        amount,
        token_id: token_id.0,
        randomness,
        memo: memo.to_vec(),
    });

    let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| ShieldError::Encryption)?;
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&NOTE_NONCE), plaintext.as_slice())
        .map_err(|_| ShieldError::Encryption)?;

    // The AEAD appends the tag; the wire carries it as a separate field.
    let tag_bytes = sealed.split_off(sealed.len() - AUTH_TAG_LEN);
    let mut tag = [0u8; AUTH_TAG_LEN];
    tag.copy_from_slice(&tag_bytes);

    Ok(SealedNote {
        note,
        payload: EncryptedNotePayload {
            epk_x,
            epk_y,
            ciphertext: sealed,
            tag,
        },
    })
}

/// Trial-decrypt a note payload with a viewing key.
///
/// Returns the note and its memo if and only if the payload was addressed
/// to this key *and* its contents reproduce `expected_commitment`. Every
/// other outcome — foreign note, corrupt ciphertext, forged commitment —
/// is `None`, never an error.
pub fn try_decrypt_note(
    payload: &EncryptedNotePayload,
    viewing: &ViewingKey,
    context: PoolContext,
    expected_commitment: &Commitment,
) -> Option<(Note, Vec<u8>)> {
    let ephemeral = EphemeralPublicKey::from_coords(&payload.epk_x, &payload.epk_y).ok()?;
    let (stealth_pk, shared_point) = recover_stealth(viewing, &ephemeral);

    let key = note_key(&shared_point, &payload.epk_x, &payload.epk_y);
    let cipher = ChaCha20Poly1305::new_from_slice(&key).ok()?;

    let mut sealed = payload.ciphertext.clone();
    sealed.extend_from_slice(&payload.tag);
    let plaintext_bytes = cipher
        .decrypt(Nonce::from_slice(&NOTE_NONCE), sealed.as_slice())
        .ok()?;

    let plaintext = deserialize_plaintext(&plaintext_bytes)?;

    let note = Note::with_randomness(
        stealth_pk,
        TokenId(plaintext.token_id),
        plaintext.amount,
        plaintext.randomness,
        context,
    );

    // Never trust decrypted contents until they reproduce the on-ledger
    // commitment.
    if &note.commitment() != expected_commitment {
        return None;
    }

    Some((note, plaintext.memo))
}

/// Derive the note encryption key from the DH shared point
fn note_key(shared_point: &[u8; 32], epk_x: &[u8; 32], epk_y: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("calyx/note/v1");
    hasher.update(shared_point);
    hasher.update(epk_x);
    hasher.update(epk_y);
    *hasher.finalize().as_bytes()
}

fn serialize_plaintext(pt: &NotePlaintext) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + 32 + 32 + 2 + pt.memo.len());
    bytes.extend_from_slice(&pt.amount.to_le_bytes());
    bytes.extend_from_slice(&pt.token_id);
    bytes.extend_from_slice(&pt.randomness);
    bytes.extend_from_slice(&(pt.memo.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&pt.memo);
    bytes
}

fn deserialize_plaintext(bytes: &[u8]) -> Option<NotePlaintext> {
    if bytes.len() < 74 {
        return None; // 8 + 32 + 32 + 2 minimum
    }

    let amount = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let token_id: [u8; 32] = bytes[8..40].try_into().ok()?;
    let randomness: [u8; 32] = bytes[40..72].try_into().ok()?;
    let memo_len = u16::from_le_bytes(bytes[72..74].try_into().ok()?) as usize;

    if bytes.len() != 74 + memo_len {
        return None;
    }

    Some(NotePlaintext {
        amount,
        token_id,
        randomness,
        memo: bytes[74..74 + memo_len].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;
    use ark_std::rand::rngs::OsRng;

    const TOKEN: TokenId = TokenId([9u8; 32]);
    const POOL: PoolContext = PoolContext([3u8; 32]);

    #[test]
    fn test_seal_and_decrypt_roundtrip() {
        let mut rng = OsRng;
        let recipient = SpendingKey::random(&mut rng);

        let sealed = seal_note(
            &recipient.address(),
            TOKEN,
            1000,
            POOL,
            Some(b"test memo"),
            &mut rng,
        )
        .unwrap();
        let commitment = sealed.note.commitment();

        let (note, memo) = try_decrypt_note(
            &sealed.payload,
            &recipient.viewing_key(),
            POOL,
            &commitment,
        )
        .expect("recipient should decrypt their own note");

        assert_eq!(note, sealed.note);
        assert_eq!(memo, b"test memo");
    }

    #[test]
    fn test_foreign_key_misses_silently() {
        let mut rng = OsRng;
        let recipient = SpendingKey::random(&mut rng);
        let stranger = SpendingKey::random(&mut rng);

        let sealed = seal_note(&recipient.address(), TOKEN, 1000, POOL, None, &mut rng).unwrap();
        let commitment = sealed.note.commitment();

        let result =
            try_decrypt_note(&sealed.payload, &stranger.viewing_key(), POOL, &commitment);
        assert!(result.is_none(), "foreign viewing key must miss, not error");
    }

    #[test]
    fn test_no_false_positives_over_randomized_trials() {
        let mut rng = OsRng;
        let recipient = SpendingKey::random(&mut rng);
        let sealed = seal_note(&recipient.address(), TOKEN, 1000, POOL, None, &mut rng).unwrap();
        let commitment = sealed.note.commitment();

        for _ in 0..1000 {
            let stranger = SpendingKey::random(&mut rng);
            assert!(
                try_decrypt_note(&sealed.payload, &stranger.viewing_key(), POOL, &commitment)
                    .is_none()
            );
        }
    }

    #[test]
    fn test_wrong_commitment_rejected() {
        let mut rng = OsRng;
        let recipient = SpendingKey::random(&mut rng);
        let sealed = seal_note(&recipient.address(), TOKEN, 1000, POOL, None, &mut rng).unwrap();

        let result = try_decrypt_note(
            &sealed.payload,
            &recipient.viewing_key(),
            POOL,
            &Commitment([0xAAu8; 32]),
        );
        assert!(result.is_none(), "mismatched commitment must be rejected");
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let mut rng = OsRng;
        let recipient = SpendingKey::random(&mut rng);
        let sealed = seal_note(&recipient.address(), TOKEN, 1000, POOL, None, &mut rng).unwrap();
        let commitment = sealed.note.commitment();

        let mut tampered = sealed.payload.clone();
        tampered.ciphertext[0] ^= 0x01;
        assert!(
            try_decrypt_note(&tampered, &recipient.viewing_key(), POOL, &commitment).is_none()
        );
    }

    #[test]
    fn test_memo_too_long_rejected() {
        let mut rng = OsRng;
        let recipient = SpendingKey::random(&mut rng);
        let memo = vec![0u8; MAX_MEMO_LEN + 1];
        let err = seal_note(&recipient.address(), TOKEN, 1, POOL, Some(&memo), &mut rng)
            .unwrap_err();
        assert!(matches!(err, ShieldError::MemoTooLong { .. }));
    }
}
