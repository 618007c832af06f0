//! Shielded notes.
//!
//! A Note is an immutable private value record:
//!
//! ```text
//! Note = {
//!     owner:      one-time stealth public key (who can spend it)
//!     token_id:   which token the value is denominated in
//!     amount:     value in the token's smallest unit
//!     randomness: 32-byte blinding factor
//!     context:    which logical pool / ballot / market it belongs to
//! }
//! ```
//!
//! A note exists the moment its commitment lands in ledger state and is
//! immutable thereafter; publishing its nullifier only flips spendability,
//! the commitment stays in history forever.

use ark_std::rand::Rng;
use serde::{Deserialize, Serialize};

use crate::commitment::{Commitment, CommitmentScheme};
use crate::nullifier::{Nullifier, NullifierKey};
use crate::stealth::StealthPublicKey;

/// Token identifier (mint), 32 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(pub [u8; 32]);

/// Logical pool / ballot / market a note belongs to, 32 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolContext(pub [u8; 32]);

/// Note value with overflow protection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteValue(pub u64);

impl NoteValue {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Checked addition
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

/// A shielded note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// One-time stealth key of the owner
    pub owner: StealthPublicKey,
    /// Token the value is denominated in
    pub token_id: TokenId,
    /// The value held in this note
    pub amount: NoteValue,
    /// Random blinding factor hiding the commitment
    pub randomness: [u8; 32],
    /// Pool / ballot / market context
    pub context: PoolContext,
}

impl Note {
    /// Create a note with fresh random blinding
    pub fn new<R: Rng>(
        owner: StealthPublicKey,
        token_id: TokenId,
        amount: u64,
        context: PoolContext,
        rng: &mut R,
    ) -> Self {
        let mut randomness = [0u8; 32];
        rng.fill_bytes(&mut randomness);
        Self {
            owner,
            token_id,
            amount: NoteValue(amount),
            randomness,
            context,
        }
    }

    /// Create a note with explicit randomness (decryption / recovery)
    pub fn with_randomness(
        owner: StealthPublicKey,
        token_id: TokenId,
        amount: u64,
        randomness: [u8; 32],
        context: PoolContext,
    ) -> Self {
        Self {
            owner,
            token_id,
            amount: NoteValue(amount),
            randomness,
            context,
        }
    }

    /// Compute the commitment for this note
    pub fn commitment(&self) -> Commitment {
        CommitmentScheme::commit(
            &self.owner,
            &self.token_id,
            self.amount.0,
            &self.randomness,
            &self.context,
        )
    }

    /// Derive the nullifier that spends this note at the given leaf index
    pub fn nullifier(&self, nk: &NullifierKey, leaf_index: u64) -> Nullifier {
        nk.derive_nullifier(&self.commitment(), leaf_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;
    use crate::stealth::StealthAddress;
    use ark_std::rand::rngs::OsRng;

    fn test_owner() -> StealthPublicKey {
        let mut rng = OsRng;
        let recipient = SpendingKey::random(&mut rng).address();
        StealthAddress::generate(&recipient, &mut rng)
            .unwrap()
            .address
            .stealth_pk
    }

    #[test]
    fn test_note_commitment_deterministic() {
        let mut rng = OsRng;
        let note = Note::new(
            test_owner(),
            TokenId([1u8; 32]),
            1000,
            PoolContext([2u8; 32]),
            &mut rng,
        );
        assert_eq!(note.commitment(), note.commitment());
    }

    #[test]
    fn test_note_nullifier_idempotent() {
        let mut rng = OsRng;
        let sk = SpendingKey::random(&mut rng);
        let note = Note::new(
            test_owner(),
            TokenId([1u8; 32]),
            1000,
            PoolContext([2u8; 32]),
            &mut rng,
        );
        let nk = sk.nullifier_key();
        assert_eq!(note.nullifier(&nk, 42), note.nullifier(&nk, 42));
        assert_ne!(note.nullifier(&nk, 42), note.nullifier(&nk, 43));
    }

    #[test]
    fn test_note_value_checked_ops() {
        let v1 = NoteValue::new(100);
        let v2 = NoteValue::new(50);

        assert_eq!(v1.checked_add(v2), Some(NoteValue::new(150)));
        assert_eq!(v1.checked_sub(v2), Some(NoteValue::new(50)));
        assert_eq!(v2.checked_sub(v1), None); // Underflow
        assert_eq!(NoteValue::MAX.checked_add(NoteValue::new(1)), None); // Overflow
    }
}
