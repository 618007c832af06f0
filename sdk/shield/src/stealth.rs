//! One-time stealth addresses.
//!
//! Senders address a recipient without revealing the recipient's long-term
//! key on-chain:
//!
//! ```text
//! Sender:    r fresh, R = r·G, S = r·A, P = A + H(S)·G    publish (P, R)
//! Recipient: S = ivk·R,        P = A + H(S)·G             recognize P
//! ```
//!
//! Two outputs to the same recipient never share an ephemeral scalar; `r`
//! is drawn fresh on every call and generation fails only if the system
//! RNG does.

use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::EdwardsAffine;
use ark_ff::Zero;
use ark_std::rand::Rng;

use crate::error::ShieldError;
use crate::field::{
    point_from_bytes, point_from_coords, point_to_bytes, point_to_coords,
    scalar_from_bytes_mod_order,
};
use crate::keys::{ShieldedAddress, ViewingKey};
use crate::poseidon;

/// One-time public key owning a single note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealthPublicKey(EdwardsAffine);

impl StealthPublicKey {
    /// Compressed 32-byte encoding (the form absorbed into commitments)
    pub fn to_bytes(&self) -> [u8; 32] {
        point_to_bytes(&self.0)
    }

    /// Decode, enforcing curve and subgroup membership
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, ShieldError> {
        Ok(Self(point_from_bytes(bytes)?))
    }
}

/// Ephemeral key published next to each encrypted note.
///
/// Travels on the wire as uncompressed affine coordinates (x ‖ y).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EphemeralPublicKey(EdwardsAffine);

impl EphemeralPublicKey {
    /// Affine coordinates as two canonical 32-byte field encodings
    pub fn to_coords(&self) -> ([u8; 32], [u8; 32]) {
        point_to_coords(&self.0)
    }

    /// Rebuild from wire coordinates, rejecting invalid points
    pub fn from_coords(x: &[u8; 32], y: &[u8; 32]) -> Result<Self, ShieldError> {
        Ok(Self(point_from_coords(x, y)?))
    }
}

/// A freshly generated one-time address: publish both parts with the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealthAddress {
    /// One-time owner key of the new note
    pub stealth_pk: StealthPublicKey,
    /// Ephemeral key the recipient needs to re-derive it
    pub ephemeral_pk: EphemeralPublicKey,
}

/// Sender-side result of stealth generation
#[derive(Debug, Clone)]
pub struct GeneratedStealth {
    pub address: StealthAddress,
    /// Compressed DH shared point, input to the note-encryption KDF
    pub shared_point: [u8; 32],
}

impl StealthAddress {
    /// Generate a fresh one-time address for a recipient.
    ///
    /// Never deterministic. The only failure mode is the RNG itself, which
    /// is fatal for this call only.
    pub fn generate<R: Rng>(
        recipient: &ShieldedAddress,
        rng: &mut R,
    ) -> Result<GeneratedStealth, ShieldError> {
        // 64 bytes reduced mod the group order keeps the scalar uniform.
        let mut wide = [0u8; 64];
        rng.try_fill_bytes(&mut wide).map_err(|_| ShieldError::Rng)?;
        let r = scalar_from_bytes_mod_order(&wide);
        if r.is_zero() {
            return Err(ShieldError::Rng);
        }

        let ephemeral = (EdwardsAffine::generator() * r).into_affine();
        let shared = (*recipient.as_point() * r).into_affine();
        let stealth = derive_stealth_point(recipient, &shared);

        Ok(GeneratedStealth {
            address: StealthAddress {
                stealth_pk: StealthPublicKey(stealth),
                ephemeral_pk: EphemeralPublicKey(ephemeral),
            },
            shared_point: point_to_bytes(&shared),
        })
    }
}

/// Recipient-side re-derivation from a published ephemeral key.
///
/// Returns the one-time key this ephemeral would address for the viewing
/// key's account, plus the shared point for the decryption KDF. Whether the
/// note is actually ours is decided by the AEAD open + commitment check.
pub fn recover_stealth(
    viewing: &ViewingKey,
    ephemeral: &EphemeralPublicKey,
) -> (StealthPublicKey, [u8; 32]) {
    let shared = (ephemeral.0 * *viewing.scalar()).into_affine();
    let stealth = derive_stealth_point(&viewing.address(), &shared);
    (StealthPublicKey(stealth), point_to_bytes(&shared))
}

/// P = A + H(S)·G with the tweak hashed over the shared point's coordinates
fn derive_stealth_point(address: &ShieldedAddress, shared: &EdwardsAffine) -> EdwardsAffine {
    let (sx, sy) = shared.xy().expect("twisted Edwards affine always has coordinates");
    let tweak_fe = poseidon::hash(poseidon::domain_tag(b"Calyx.st"), &[sx, sy]);
    let tweak = scalar_from_bytes_mod_order(&crate::field::fe_to_bytes(&tweak_fe));
    (EdwardsAffine::generator() * tweak + *address.as_point()).into_affine()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;
    use ark_std::rand::rngs::OsRng;

    #[test]
    fn test_recipient_recovers_stealth_key() {
        let mut rng = OsRng;
        let sk = SpendingKey::random(&mut rng);
        let generated = StealthAddress::generate(&sk.address(), &mut rng).unwrap();

        let (recovered, shared) =
            recover_stealth(&sk.viewing_key(), &generated.address.ephemeral_pk);

        assert_eq!(recovered, generated.address.stealth_pk);
        assert_eq!(shared, generated.shared_point);
    }

    #[test]
    fn test_fresh_ephemeral_every_call() {
        let mut rng = OsRng;
        let addr = SpendingKey::random(&mut rng).address();
        let g1 = StealthAddress::generate(&addr, &mut rng).unwrap();
        let g2 = StealthAddress::generate(&addr, &mut rng).unwrap();
        assert_ne!(g1.address.ephemeral_pk, g2.address.ephemeral_pk);
        assert_ne!(g1.address.stealth_pk, g2.address.stealth_pk);
    }

    #[test]
    fn test_wrong_viewing_key_derives_different_stealth() {
        let mut rng = OsRng;
        let recipient = SpendingKey::random(&mut rng);
        let other = SpendingKey::random(&mut rng);
        let generated = StealthAddress::generate(&recipient.address(), &mut rng).unwrap();

        let (recovered, _) =
            recover_stealth(&other.viewing_key(), &generated.address.ephemeral_pk);
        assert_ne!(recovered, generated.address.stealth_pk);
    }

    #[test]
    fn test_ephemeral_coords_roundtrip() {
        let mut rng = OsRng;
        let addr = SpendingKey::random(&mut rng).address();
        let generated = StealthAddress::generate(&addr, &mut rng).unwrap();
        let (x, y) = generated.address.ephemeral_pk.to_coords();
        assert_eq!(
            EphemeralPublicKey::from_coords(&x, &y).unwrap(),
            generated.address.ephemeral_pk
        );
    }
}
