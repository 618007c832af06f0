//! Shared Poseidon sponge configuration.
//!
//! Field: BLS12-381 Fr (255 bits), rate 2, capacity 1, 8 full rounds,
//! 57 partial rounds, alpha 5. These parameters are baked into the proof
//! circuit; changing any of them silently invalidates every proof.

use ark_bls12_381::Fr;
use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge, find_poseidon_ark_and_mds},
};
use ark_ff::PrimeField;
use std::sync::LazyLock;

static CONFIG: LazyLock<PoseidonConfig<Fr>> = LazyLock::new(|| {
    let prime_bits: u64 = 255;
    let rate: usize = 2;
    let capacity: usize = 1;
    let full_rounds: u64 = 8;
    let partial_rounds: u64 = 57;
    let alpha: u64 = 5;
    let skip_matrices: u64 = 0;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        rate,
        full_rounds,
        partial_rounds,
        skip_matrices,
    );

    PoseidonConfig::new(
        full_rounds as usize,
        partial_rounds as usize,
        alpha,
        mds,
        ark,
        rate,
        capacity,
    )
});

/// The crate-wide Poseidon configuration
pub fn config() -> &'static PoseidonConfig<Fr> {
    &CONFIG
}

/// Turn an ASCII tag into a domain-separation field element.
///
/// The tag is zero-padded to 32 bytes and reduced, matching the circuit's
/// constant for the same tag.
pub fn domain_tag(tag: &[u8]) -> Fr {
    assert!(tag.len() <= 32, "domain tag longer than 32 bytes");
    let mut padded = [0u8; 32];
    padded[..tag.len()].copy_from_slice(tag);
    Fr::from_le_bytes_mod_order(&padded)
}

/// Domain-separated Poseidon hash of field elements
pub fn hash(domain: Fr, inputs: &[Fr]) -> Fr {
    let mut sponge = PoseidonSponge::new(config());
    sponge.absorb(&domain);
    for input in inputs {
        sponge.absorb(input);
    }
    sponge.squeeze_field_elements(1)[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let d = domain_tag(b"Calyx.test");
        let h1 = hash(d, &[Fr::from(1u64), Fr::from(2u64)]);
        let h2 = hash(d, &[Fr::from(1u64), Fr::from(2u64)]);
        assert_eq!(h1, h2, "same inputs should hash identically");
    }

    #[test]
    fn test_domain_separation() {
        let inputs = [Fr::from(7u64)];
        let h1 = hash(domain_tag(b"Calyx.a"), &inputs);
        let h2 = hash(domain_tag(b"Calyx.b"), &inputs);
        assert_ne!(h1, h2, "different domains should hash differently");
    }

    #[test]
    fn test_input_order_matters() {
        let d = domain_tag(b"Calyx.test");
        let h1 = hash(d, &[Fr::from(1u64), Fr::from(2u64)]);
        let h2 = hash(d, &[Fr::from(2u64), Fr::from(1u64)]);
        assert_ne!(h1, h2);
    }
}
