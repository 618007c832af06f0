//! Field and curve encoding helpers.
//!
//! Commitments, nullifiers and key material travel as 32-byte canonical
//! little-endian field elements; stealth ephemeral keys travel as affine
//! Jubjub coordinates. Everything that crosses the wire goes through the
//! strict decoders here, which reject non-canonical encodings and
//! off-curve points instead of reducing them silently.

use ark_bls12_381::Fr;
use ark_ec::AffineRepr;
use ark_ed_on_bls12_381::{EdwardsAffine, Fr as JubjubScalar};
use ark_ff::{BigInteger, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};

use crate::error::ShieldError;

/// Canonical 32-byte little-endian encoding of a field element
pub fn fe_to_bytes(f: &Fr) -> [u8; 32] {
    let bytes = f.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

/// Strict decode: rejects values at or above the field modulus
pub fn fe_from_bytes(bytes: &[u8; 32]) -> Result<Fr, ShieldError> {
    Fr::deserialize_compressed(bytes.as_slice()).map_err(|_| ShieldError::NonCanonicalField)
}

/// Lenient decode for key material and hash outputs: reduces mod order
pub fn fe_from_bytes_mod_order(bytes: &[u8]) -> Fr {
    Fr::from_le_bytes_mod_order(bytes)
}

/// Canonical 32-byte encoding of a Jubjub scalar
pub fn scalar_to_bytes(s: &JubjubScalar) -> [u8; 32] {
    let bytes = s.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

/// Jubjub scalar from arbitrary bytes, reduced mod the group order
pub fn scalar_from_bytes_mod_order(bytes: &[u8]) -> JubjubScalar {
    JubjubScalar::from_le_bytes_mod_order(bytes)
}

/// Compressed 32-byte encoding of a Jubjub point
pub fn point_to_bytes(p: &EdwardsAffine) -> [u8; 32] {
    let mut buf = [0u8; 32];
    p.serialize_compressed(&mut buf[..])
        .expect("compressed Jubjub point is 32 bytes");
    buf
}

/// Decode a compressed Jubjub point, enforcing curve and subgroup membership
pub fn point_from_bytes(bytes: &[u8; 32]) -> Result<EdwardsAffine, ShieldError> {
    EdwardsAffine::deserialize_compressed(bytes.as_slice()).map_err(|_| ShieldError::InvalidPoint)
}

/// Affine (x, y) coordinates as canonical field encodings
pub fn point_to_coords(p: &EdwardsAffine) -> ([u8; 32], [u8; 32]) {
    let (x, y) = p.xy().expect("twisted Edwards affine always has coordinates");
    (fe_to_bytes(&x), fe_to_bytes(&y))
}

/// Rebuild a point from affine coordinates, enforcing curve and subgroup
/// membership. This is the decoder for the wire's uncompressed ephemeral
/// keys; a forged point that is not in the prime-order subgroup is rejected
/// here, before any key agreement.
pub fn point_from_coords(x: &[u8; 32], y: &[u8; 32]) -> Result<EdwardsAffine, ShieldError> {
    let x = fe_from_bytes(x)?;
    let y = fe_from_bytes(y)?;
    let point = EdwardsAffine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ShieldError::InvalidPoint);
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::CurveGroup;
    use ark_std::UniformRand;

    #[test]
    fn test_fe_roundtrip() {
        let f = Fr::from(123456789u64);
        let bytes = fe_to_bytes(&f);
        assert_eq!(fe_from_bytes(&bytes).unwrap(), f);
    }

    #[test]
    fn test_fe_rejects_modulus() {
        // The modulus itself is the smallest non-canonical encoding.
        let modulus_bytes: [u8; 32] = [
            0x01, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xfe, 0x5b, 0xfe, 0xff, 0x02, 0xa4,
            0xbd, 0x53, 0x05, 0xd8, 0xa1, 0x09, 0x08, 0xd8, 0x39, 0x33, 0x48, 0x7d, 0x9d, 0x29,
            0x53, 0xa7, 0xed, 0x73,
        ];
        assert_eq!(
            fe_from_bytes(&modulus_bytes),
            Err(ShieldError::NonCanonicalField)
        );
    }

    #[test]
    fn test_point_coords_roundtrip() {
        let mut rng = ark_std::test_rng();
        let p = (EdwardsAffine::generator() * JubjubScalar::rand(&mut rng)).into_affine();
        let (x, y) = point_to_coords(&p);
        assert_eq!(point_from_coords(&x, &y).unwrap(), p);
    }

    #[test]
    fn test_point_off_curve_rejected() {
        let x = fe_to_bytes(&Fr::from(3u64));
        let y = fe_to_bytes(&Fr::from(5u64));
        assert_eq!(point_from_coords(&x, &y), Err(ShieldError::InvalidPoint));
    }

    #[test]
    fn test_point_compressed_roundtrip() {
        let mut rng = ark_std::test_rng();
        let p = (EdwardsAffine::generator() * JubjubScalar::rand(&mut rng)).into_affine();
        let bytes = point_to_bytes(&p);
        assert_eq!(point_from_bytes(&bytes).unwrap(), p);
    }
}
