//! Note commitments.
//!
//! ```text
//! Commitment = Poseidon("Calyx.cm", owner_pk, token_id, amount, randomness, pool_context)
//! ```
//!
//! Hiding and binding under Poseidon's assumptions. The absorb order and
//! field encoding of every input must match the circuit exactly.

use ark_bls12_381::Fr;
use serde::{Deserialize, Serialize};

use crate::field::{fe_from_bytes_mod_order, fe_to_bytes};
use crate::note::{PoolContext, TokenId};
use crate::poseidon;
use crate::stealth::StealthPublicKey;

/// A note commitment (32 bytes, canonical field encoding)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    /// Create commitment from field element
    pub fn from_field(f: Fr) -> Self {
        Self(fe_to_bytes(&f))
    }

    /// Convert to field element
    pub fn to_field(&self) -> Fr {
        fe_from_bytes_mod_order(&self.0)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Commitment scheme over the shared Poseidon parameters
pub struct CommitmentScheme;

impl CommitmentScheme {
    /// Commit to a note.
    ///
    /// Pure and deterministic: calling twice with the same inputs yields
    /// identical bytes.
    pub fn commit(
        owner: &StealthPublicKey,
        token_id: &TokenId,
        amount: u64,
        randomness: &[u8; 32],
        context: &PoolContext,
    ) -> Commitment {
        let inputs = [
            fe_from_bytes_mod_order(&owner.to_bytes()),
            fe_from_bytes_mod_order(&token_id.0),
            Fr::from(amount),
            fe_from_bytes_mod_order(randomness),
            fe_from_bytes_mod_order(&context.0),
        ];
        let result = poseidon::hash(poseidon::domain_tag(b"Calyx.cm"), &inputs);
        Commitment::from_field(result)
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
    fn test_commitment_deterministic() {
        let owner = test_owner();
        let token = TokenId([9u8; 32]);
        let context = PoolContext([7u8; 32]);

        let c1 = CommitmentScheme::commit(&owner, &token, 1000, &[42u8; 32], &context);
        let c2 = CommitmentScheme::commit(&owner, &token, 1000, &[42u8; 32], &context);
        assert_eq!(c1, c2, "same inputs should produce same commitment");
    }

    #[test]
    fn test_commitment_hiding() {
        let owner = test_owner();
        let token = TokenId([9u8; 32]);
        let context = PoolContext([7u8; 32]);

        let c1 = CommitmentScheme::commit(&owner, &token, 1000, &[1u8; 32], &context);
        let c2 = CommitmentScheme::commit(&owner, &token, 1000, &[2u8; 32], &context);
        assert_ne!(
            c1, c2,
            "different randomness should produce different commitments"
        );
    }

    #[test]
    fn test_commitment_binding() {
        let owner = test_owner();
        let token = TokenId([9u8; 32]);
        let context = PoolContext([7u8; 32]);

        let c1 = CommitmentScheme::commit(&owner, &token, 1000, &[42u8; 32], &context);
        let c2 = CommitmentScheme::commit(&owner, &token, 2000, &[42u8; 32], &context);
        assert_ne!(c1, c2, "different values should produce different commitments");

        let c3 = CommitmentScheme::commit(
            &owner,
            &token,
            1000,
            &[42u8; 32],
            &PoolContext([8u8; 32]),
        );
        assert_ne!(c1, c3, "different pools should produce different commitments");
    }
}
