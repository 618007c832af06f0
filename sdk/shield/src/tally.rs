//! Encrypted vote tallies.
//!
//! Exponential ElGamal over Jubjub:
//!
//! ```text
//! Enc(w; r) = (r·G, w·G + r·PK)
//! Enc(a) + Enc(b) = Enc(a + b)        (componentwise point addition)
//! ```
//!
//! The ledger's tally update adds ciphertexts homomorphically, so a
//! vote-change or position-close contributes `Enc(q − w)` — the modular
//! negation of the original weight — which cancels the prior contribution
//! inside the running tally. Weights stay hidden until the reveal phase
//! decrypts the aggregate.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, EdwardsProjective, Fr as JubjubScalar};
use ark_ff::Zero;
use ark_std::rand::Rng;

use crate::error::ShieldError;
use crate::field::{point_from_bytes, point_to_bytes, scalar_from_bytes_mod_order};

/// Public key a ballot's contributions are encrypted under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyPublicKey(EdwardsAffine);

impl TallyPublicKey {
    /// Compressed 32-byte encoding
    pub fn to_bytes(&self) -> [u8; 32] {
        point_to_bytes(&self.0)
    }

    /// Decode, enforcing curve and subgroup membership
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, ShieldError> {
        Ok(Self(point_from_bytes(bytes)?))
    }
}

/// Tally decryption keypair (held by the ballot authority)
#[derive(Clone)]
pub struct TallyKeypair {
    secret: JubjubScalar,
    public: TallyPublicKey,
}

impl TallyKeypair {
    /// Generate a fresh keypair; fails only on RNG failure
    pub fn generate<R: Rng>(rng: &mut R) -> Result<Self, ShieldError> {
        let mut wide = [0u8; 64];
        rng.try_fill_bytes(&mut wide).map_err(|_| ShieldError::Rng)?;
        let secret = scalar_from_bytes_mod_order(&wide);
        if secret.is_zero() {
            return Err(ShieldError::Rng);
        }
        let public = TallyPublicKey((EdwardsAffine::generator() * secret).into_affine());
        Ok(Self { secret, public })
    }

    pub fn public_key(&self) -> TallyPublicKey {
        self.public
    }
}

impl std::fmt::Debug for TallyKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TallyKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// One encrypted per-option contribution, or a running aggregate of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyCiphertext {
    c1: EdwardsAffine,
    c2: EdwardsAffine,
}

impl TallyCiphertext {
    /// The additive identity: an aggregate with no contributions
    pub fn zero() -> Self {
        Self {
            c1: EdwardsAffine::zero(),
            c2: EdwardsAffine::zero(),
        }
    }

    /// Homomorphic combination
    pub fn add(&self, other: &Self) -> Self {
        Self {
            c1: (self.c1.into_group() + other.c1).into_affine(),
            c2: (self.c2.into_group() + other.c2).into_affine(),
        }
    }

    /// 64-byte encoding: c1 ‖ c2, compressed
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&point_to_bytes(&self.c1));
        bytes[32..].copy_from_slice(&point_to_bytes(&self.c2));
        bytes
    }

    /// Decode, enforcing curve and subgroup membership on both components
    pub fn from_bytes(bytes: &[u8; 64]) -> Result<Self, ShieldError> {
        let c1 = point_from_bytes(bytes[..32].try_into().expect("bounds checked"))?;
        let c2 = point_from_bytes(bytes[32..].try_into().expect("bounds checked"))?;
        Ok(Self { c1, c2 })
    }
}

/// Derive the per-option encryption randomness from a base seed.
///
/// Deterministic so a voter can later reconstruct the exact ciphertext they
/// contributed (needed to negate it on vote-change).
pub fn derive_option_seed(base: &[u8; 32], option: u32) -> JubjubScalar {
    let mut hasher = blake3::Hasher::new_derive_key("calyx/tally-seed/v1");
    hasher.update(base);
    hasher.update(&option.to_le_bytes());
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    scalar_from_bytes_mod_order(&wide)
}

/// Encrypt a vote weight for one option
pub fn encrypt_contribution(
    weight: u64,
    tally_pk: &TallyPublicKey,
    seed: &JubjubScalar,
) -> TallyCiphertext {
    encrypt_scalar(JubjubScalar::from(weight), tally_pk, seed)
}

/// Encrypt the modular negation `q − weight` of a prior contribution.
///
/// Combined homomorphically by the ledger's tally update, this cancels the
/// original ciphertext exactly. The negation happens in the scalar field —
/// there is no signed representation anywhere in the scheme.
pub fn encrypt_negated_contribution(
    weight: u64,
    tally_pk: &TallyPublicKey,
    seed: &JubjubScalar,
) -> TallyCiphertext {
    encrypt_scalar(-JubjubScalar::from(weight), tally_pk, seed)
}

fn encrypt_scalar(m: JubjubScalar, tally_pk: &TallyPublicKey, seed: &JubjubScalar) -> TallyCiphertext {
    let g = EdwardsAffine::generator();
    TallyCiphertext {
        c1: (g * *seed).into_affine(),
        c2: (g * m + tally_pk.0 * *seed).into_affine(),
    }
}

/// Recover an aggregate tally by bounded discrete-log search.
///
/// `max` bounds the search (total locked weight of the ballot); returns
/// `None` if the aggregate is outside `0..=max`, which means a negated
/// contribution never matched a positive one.
pub fn decrypt_tally(ct: &TallyCiphertext, keypair: &TallyKeypair, max: u64) -> Option<u64> {
    let d = ct.c2.into_group() - ct.c1 * keypair.secret;
    let g = EdwardsAffine::generator().into_group();

    let mut acc = EdwardsProjective::zero();
    for w in 0..=max {
        if acc == d {
            return Some(w);
        }
        acc += g;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::rand::rngs::OsRng;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let seed = derive_option_seed(&[1u8; 32], 0);

        let ct = encrypt_contribution(42, &keypair.public_key(), &seed);
        assert_eq!(decrypt_tally(&ct, &keypair, 100), Some(42));
    }

    #[test]
    fn test_homomorphic_addition() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let pk = keypair.public_key();

        let a = encrypt_contribution(10, &pk, &derive_option_seed(&[1u8; 32], 0));
        let b = encrypt_contribution(25, &pk, &derive_option_seed(&[2u8; 32], 0));

        let sum = TallyCiphertext::zero().add(&a).add(&b);
        assert_eq!(decrypt_tally(&sum, &keypair, 100), Some(35));
    }

    #[test]
    fn test_negation_cancels_contribution() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let pk = keypair.public_key();
        let seed = derive_option_seed(&[5u8; 32], 2);

        let vote = encrypt_contribution(30, &pk, &seed);
        let cancel = encrypt_negated_contribution(30, &pk, &seed);

        let aggregate = vote.add(&cancel);
        assert_eq!(
            decrypt_tally(&aggregate, &keypair, 100),
            Some(0),
            "negated ciphertext should cancel the original exactly"
        );
    }

    #[test]
    fn test_out_of_range_tally_is_none() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let seed = derive_option_seed(&[1u8; 32], 0);

        let ct = encrypt_contribution(500, &keypair.public_key(), &seed);
        assert_eq!(decrypt_tally(&ct, &keypair, 100), None);
    }

    #[test]
    fn test_option_seeds_differ() {
        assert_ne!(
            derive_option_seed(&[1u8; 32], 0),
            derive_option_seed(&[1u8; 32], 1)
        );
    }

    #[test]
    fn test_ciphertext_roundtrip() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let ct = encrypt_contribution(7, &keypair.public_key(), &derive_option_seed(&[9u8; 32], 1));
        assert_eq!(TallyCiphertext::from_bytes(&ct.to_bytes()).unwrap(), ct);
    }
}
