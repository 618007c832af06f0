//! Nullifiers.
//!
//! ```text
//! Nullifier = Poseidon("Calyx.nf", nk, commitment, leaf_index)
//! ```
//!
//! Once a nullifier is published the corresponding note can never be spent
//! again. Double-spend safety rests entirely on the ledger enforcing
//! "nullifier exists ⇒ note spent" atomically with the value transfer.
//! The leaf-index input makes nullifiers unique even if the same commitment
//! were ever inserted twice; the nk input keeps them unlinkable to the note
//! without the owner's key.

use ark_bls12_381::Fr;
use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::field::{fe_from_bytes_mod_order, fe_to_bytes};
use crate::poseidon;

/// A nullifier (32 bytes): the one-time spent tag of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    /// Create from field element
    pub fn from_field(f: Fr) -> Self {
        Self(fe_to_bytes(&f))
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Nullifier derivation key (nk), derived from the spending key.
///
/// Knowledge of this key is required to derive valid nullifiers; sharing it
/// reveals which notes were spent but not their contents.
#[derive(Clone, PartialEq, Eq)]
pub struct NullifierKey {
    key: [u8; 32],
}

impl NullifierKey {
    /// Create from raw bytes
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Derive the nullifier for a note.
    ///
    /// Deterministic and idempotent: deriving twice for the same note
    /// yields the same bytes, which is what makes retry-after-crash safe.
    pub fn derive_nullifier(&self, commitment: &Commitment, leaf_index: u64) -> Nullifier {
        let inputs = [
            fe_from_bytes_mod_order(&self.key),
            commitment.to_field(),
            Fr::from(leaf_index),
        ];
        let result = poseidon::hash(poseidon::domain_tag(b"Calyx.nf"), &inputs);
        Nullifier::from_field(result)
    }

    /// Derive a scope-bound voting nullifier for a note.
    ///
    /// Lives in a separate hash domain from the spend nullifier: publishing
    /// it marks the note as having voted within `scope` (one ballot) while
    /// leaving the note itself spendable.
    pub fn derive_vote_nullifier(
        &self,
        commitment: &Commitment,
        leaf_index: u64,
        scope: &[u8; 32],
    ) -> Nullifier {
        let inputs = [
            fe_from_bytes_mod_order(&self.key),
            commitment.to_field(),
            Fr::from(leaf_index),
            fe_from_bytes_mod_order(scope),
        ];
        let result = poseidon::hash(poseidon::domain_tag(b"Calyx.vnf"), &inputs);
        Nullifier::from_field(result)
    }
}

impl std::fmt::Debug for NullifierKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NullifierKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullifier_deterministic() {
        let key = NullifierKey::from_bytes([1u8; 32]);
        let commitment = Commitment([2u8; 32]);

        let n1 = key.derive_nullifier(&commitment, 100);
        let n2 = key.derive_nullifier(&commitment, 100);
        assert_eq!(n1, n2, "same inputs should produce same nullifier");
    }

    #[test]
    fn test_nullifier_unique_per_note() {
        let key = NullifierKey::from_bytes([1u8; 32]);
        let n1 = key.derive_nullifier(&Commitment([1u8; 32]), 0);
        let n2 = key.derive_nullifier(&Commitment([2u8; 32]), 0);
        assert_ne!(n1, n2, "different notes should have different nullifiers");
    }

    #[test]
    fn test_nullifier_requires_key() {
        let commitment = Commitment([3u8; 32]);
        let n1 = NullifierKey::from_bytes([1u8; 32]).derive_nullifier(&commitment, 0);
        let n2 = NullifierKey::from_bytes([2u8; 32]).derive_nullifier(&commitment, 0);
        assert_ne!(n1, n2, "different keys should produce different nullifiers");
    }

    #[test]
    fn test_vote_nullifier_is_scoped_and_distinct() {
        let key = NullifierKey::from_bytes([1u8; 32]);
        let commitment = Commitment([2u8; 32]);

        let spend = key.derive_nullifier(&commitment, 5);
        let vote_a = key.derive_vote_nullifier(&commitment, 5, &[10u8; 32]);
        let vote_b = key.derive_vote_nullifier(&commitment, 5, &[11u8; 32]);

        assert_ne!(spend, vote_a, "vote nullifier must not collide with spend nullifier");
        assert_ne!(vote_a, vote_b, "different ballots must yield different vote nullifiers");
        assert_eq!(vote_a, key.derive_vote_nullifier(&commitment, 5, &[10u8; 32]));
    }

    #[test]
    fn test_leaf_index_affects_nullifier() {
        let key = NullifierKey::from_bytes([1u8; 32]);
        let commitment = Commitment([2u8; 32]);
        let n1 = key.derive_nullifier(&commitment, 0);
        let n2 = key.derive_nullifier(&commitment, 1);
        assert_ne!(n1, n2, "different leaf indices should produce different nullifiers");
    }
}
