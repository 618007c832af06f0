//! Key hierarchy for shielded accounts.
//!
//! ```text
//! SpendingKey (ask)
//!   ├── NullifierKey  nk  = Poseidon("Calyx.nk",  ask)   — tags spends
//!   ├── ViewingKey    ivk = Poseidon("Calyx.ivk", ask)   — trial-decrypts notes
//!   └── ShieldedAddress A = ivk · G                      — long-term address
//! ```
//!
//! The spending key never leaves the wallet; the viewing key may be shared
//! for read-only scanning; the address is public and is never used directly
//! as a note owner — every output gets a fresh stealth key derived from it.

use ark_std::rand::Rng;

use crate::error::ShieldError;
use crate::field::{
    fe_from_bytes_mod_order, fe_to_bytes, point_from_bytes, point_to_bytes,
    scalar_from_bytes_mod_order, scalar_to_bytes,
};
use crate::nullifier::NullifierKey;
use crate::poseidon;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, Fr as JubjubScalar};

/// Spending key. Loss = loss of funds, compromise = theft of funds.
#[derive(Clone)]
pub struct SpendingKey {
    key: [u8; 32],
}

impl SpendingKey {
    /// Generate a random spending key
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create from raw bytes
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Create from a byte slice, rejecting wrong lengths
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, ShieldError> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ShieldError::InvalidKeyLength {
                expected: 32,
                got: bytes.len(),
            })?;
        Ok(Self { key })
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Derive the nullifier key
    pub fn nullifier_key(&self) -> NullifierKey {
        let ask = fe_from_bytes_mod_order(&self.key);
        let nk = poseidon::hash(poseidon::domain_tag(b"Calyx.nk"), &[ask]);
        NullifierKey::from_bytes(fe_to_bytes(&nk))
    }

    /// Derive the viewing key (read-only access)
    pub fn viewing_key(&self) -> ViewingKey {
        let ask = fe_from_bytes_mod_order(&self.key);
        let ivk = poseidon::hash(poseidon::domain_tag(b"Calyx.ivk"), &[ask]);
        ViewingKey {
            scalar: scalar_from_bytes_mod_order(&fe_to_bytes(&ivk)),
        }
    }

    /// Derive the public shielded address
    pub fn address(&self) -> ShieldedAddress {
        self.viewing_key().address()
    }
}

// Keep key material out of debug output.
impl std::fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SpendingKey(..)")
    }
}

/// Viewing key: detects and decrypts incoming notes, cannot spend them.
#[derive(Clone)]
pub struct ViewingKey {
    scalar: JubjubScalar,
}

impl ViewingKey {
    /// Create from raw scalar bytes (reduced mod the group order)
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            scalar: scalar_from_bytes_mod_order(bytes),
        }
    }

    /// Canonical scalar bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        scalar_to_bytes(&self.scalar)
    }

    /// The scalar, for key agreement
    pub(crate) fn scalar(&self) -> &JubjubScalar {
        &self.scalar
    }

    /// The shielded address this viewing key watches
    pub fn address(&self) -> ShieldedAddress {
        ShieldedAddress((EdwardsAffine::generator() * self.scalar).into_affine())
    }
}

impl std::fmt::Debug for ViewingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ViewingKey(..)")
    }
}

/// Long-term public address of a shielded account (a Jubjub point)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShieldedAddress(pub(crate) EdwardsAffine);

impl ShieldedAddress {
    /// Compressed 32-byte encoding
    pub fn to_bytes(&self) -> [u8; 32] {
        point_to_bytes(&self.0)
    }

    /// Decode, enforcing curve and subgroup membership
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, ShieldError> {
        Ok(Self(point_from_bytes(bytes)?))
    }

    pub(crate) fn as_point(&self) -> &EdwardsAffine {
        &self.0
    }
}

/// Full key bundle for one shielded account
#[derive(Debug, Clone)]
pub struct ShieldedKeyBundle {
    /// Spending key (secret)
    pub spending_key: SpendingKey,
    /// Viewing key (shareable, read-only)
    pub viewing_key: ViewingKey,
    /// Nullifier key (secret, tags spends)
    pub nullifier_key: NullifierKey,
    /// Public address
    pub address: ShieldedAddress,
}

impl ShieldedKeyBundle {
    /// Generate a new random key bundle
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self::from_spending_key(SpendingKey::random(rng))
    }

    /// Restore from a persisted spending key
    pub fn from_spending_key(spending_key: SpendingKey) -> Self {
        let viewing_key = spending_key.viewing_key();
        let nullifier_key = spending_key.nullifier_key();
        let address = viewing_key.address();
        Self {
            spending_key,
            viewing_key,
            nullifier_key,
            address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::rand::rngs::OsRng;

    #[test]
    fn test_key_derivation_deterministic() {
        let mut rng = OsRng;
        let bundle = ShieldedKeyBundle::random(&mut rng);
        let bundle2 = ShieldedKeyBundle::from_spending_key(SpendingKey::from_bytes(
            *bundle.spending_key.as_bytes(),
        ));

        assert_eq!(bundle.address, bundle2.address);
        assert_eq!(bundle.viewing_key.to_bytes(), bundle2.viewing_key.to_bytes());
        assert_eq!(
            bundle.nullifier_key.as_bytes(),
            bundle2.nullifier_key.as_bytes()
        );
    }

    #[test]
    fn test_viewing_key_matches_address() {
        let mut rng = OsRng;
        let sk = SpendingKey::random(&mut rng);
        assert_eq!(sk.address(), sk.viewing_key().address());
    }

    #[test]
    fn test_address_roundtrip() {
        let mut rng = OsRng;
        let addr = SpendingKey::random(&mut rng).address();
        let decoded = ShieldedAddress::from_bytes(&addr.to_bytes()).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let err = SpendingKey::try_from_slice(&[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            ShieldError::InvalidKeyLength {
                expected: 32,
                got: 16
            }
        );
    }
}
