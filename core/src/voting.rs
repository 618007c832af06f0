//! Ballots and vote flows.
//!
//! Voting reuses the note machinery: a vote locks (or snapshots) value
//! into a `Position` — a note living in the ballot's own pool context —
//! and contributes an encrypted weight to the ballot's running tally.
//! Tallies stay hidden until the reveal; a vote-change or position-close
//! contributes the modular negation of the original ciphertext, which the
//! ledger's homomorphic tally update cancels exactly.
//!
//! Two binding modes:
//! - **Snapshot**: the voted note stays spendable; a ballot-scoped vote
//!   nullifier prevents the same note voting twice.
//! - **Locked** (spend-to-vote): the voted notes are spent into the
//!   position; closing the position refunds them.

use rand::Rng;
use serde::{Deserialize, Serialize};

use calyx_shield::{
    Nullifier, NullifierKey, PoolContext, ShieldedAddress, TokenId,
    tally::{derive_option_seed, encrypt_contribution, encrypt_negated_contribution},
    TallyPublicKey, seal_note,
};

use crate::error::EngineError;
use crate::orchestrator::flows::{
    BallotCreate, EncryptedWeight, ExecuteAction, FlowKind, OperationPlan, TallyUpdate,
    output_record, sentinel_output, spend_witness, ClaimSettle,
};
use crate::prover::{WitnessMap, WitnessValue};
use crate::scanner::ScannedNote;

/// Ballot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BallotId(pub [u8; 32]);

impl BallotId {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut id = [0u8; 32];
        rng.fill_bytes(&mut id);
        Self(id)
    }
}

/// How a vote binds the underlying value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingMode {
    /// Prove ownership at vote time; tokens stay spendable
    Snapshot,
    /// Lock tokens into the position until it is closed or claimed
    Locked,
}

/// Ballot configuration
#[derive(Debug, Clone)]
pub struct BallotConfig {
    pub options: u32,
    pub tally_pk: TallyPublicKey,
    pub binding: BindingMode,
    /// Voting window, unix seconds
    pub starts_at: u64,
    pub ends_at: u64,
}

/// One ballot
#[derive(Debug, Clone)]
pub struct Ballot {
    pub id: BallotId,
    pub config: BallotConfig,
}

impl Ballot {
    /// The pool context positions of this ballot live in
    pub fn pool_context(&self) -> PoolContext {
        let mut hasher = blake3::Hasher::new_derive_key("calyx/ballot-pool/v1");
        hasher.update(&self.id.0);
        PoolContext(*hasher.finalize().as_bytes())
    }

    pub fn is_active(&self, now: u64) -> bool {
        now >= self.config.starts_at && now < self.config.ends_at
    }
}

/// Build the ballot-creation plan: no inputs, no note outputs, one
/// ballot record created at the execute phase
pub fn build_ballot_plan(ballot: &Ballot) -> OperationPlan {
    let mut witness = WitnessMap::new();
    witness.insert("ballot_id".into(), WitnessValue::Field(ballot.id.0));

    OperationPlan {
        flow: FlowKind::CreateBallot,
        pool_context: ballot.pool_context(),
        circuit: FlowKind::CreateBallot.circuit(),
        witness,
        nullifiers: Vec::new(),
        input_commitments: Vec::new(),
        outputs: Vec::new(),
        action: ExecuteAction::OpenBallot(BallotCreate {
            ballot: ballot.id.0,
            options: ballot.config.options,
            tally_pk: ballot.config.tally_pk.to_bytes(),
            starts_at: ballot.config.starts_at,
            ends_at: ballot.config.ends_at,
            binding: match ballot.config.binding {
                BindingMode::Snapshot => 0,
                BindingMode::Locked => 1,
            },
        }),
    }
}

/// Build a vote: lock (or snapshot) `weight` of `token` behind `option`.
///
/// The inputs must cover the weight; any excess becomes shielded change in
/// locked mode. The per-option tally seed is derived from the position
/// note's randomness, so the voter can reconstruct the exact ciphertext
/// later to negate it.
#[allow(clippy::too_many_arguments)]
pub fn build_vote_plan<R: Rng>(
    ballot: &Ballot,
    option: u32,
    weight: u64,
    inputs: &[ScannedNote],
    nullifier_key: &NullifierKey,
    voter: &ShieldedAddress,
    token: TokenId,
    now: u64,
    rng: &mut R,
) -> Result<OperationPlan, EngineError> {
    if !ballot.is_active(now) {
        return Err(EngineError::BallotNotActive);
    }
    if option >= ballot.config.options {
        return Err(EngineError::Internal(format!(
            "option {option} out of range for ballot with {} options",
            ballot.config.options
        )));
    }

    let ballot_pool = ballot.pool_context();

    // The position: a note in the ballot's pool, carrying its option in
    // the memo so later change/close flows can recover it.
    let position = seal_note(
        voter,
        token,
        weight,
        ballot_pool,
        Some(&option.to_le_bytes()),
        rng,
    )?;
    let position_commitment = position.note.commitment();

    let seed = derive_option_seed(&position.note.randomness, option);
    let ciphertext = encrypt_contribution(weight, &ballot.config.tally_pk, &seed);

    let (flow, nullifiers, outputs) = match ballot.config.binding {
        BindingMode::Snapshot => {
            // Tokens stay spendable: register ballot-scoped vote
            // nullifiers instead of spend nullifiers.
            let nullifiers: Vec<Nullifier> = inputs
                .iter()
                .map(|n| {
                    nullifier_key.derive_vote_nullifier(&n.commitment, n.leaf_index, &ballot.id.0)
                })
                .collect();
            let outputs = vec![output_record(
                ballot_pool,
                position_commitment,
                position.payload,
            )];
            (FlowKind::VoteSnapshot, nullifiers, outputs)
        }
        BindingMode::Locked => {
            let total: u64 = inputs.iter().map(|n| n.note.amount.as_u64()).sum();
            let change = total.checked_sub(weight).ok_or_else(|| {
                EngineError::Internal("vote inputs below weight".into())
            })?;

            let nullifiers: Vec<Nullifier> = inputs
                .iter()
                .map(|n| nullifier_key.derive_nullifier(&n.commitment, n.leaf_index))
                .collect();

            // Change goes back to the token's own pool, not the ballot's.
            let change_record = if change > 0 {
                let sealed = seal_note(voter, token, change, inputs[0].note.context, None, rng)?;
                output_record(inputs[0].note.context, sealed.note.commitment(), sealed.payload)
            } else {
                sentinel_output(inputs[0].note.context)
            };

            let outputs = vec![
                output_record(ballot_pool, position_commitment, position.payload),
                change_record,
            ];
            (FlowKind::VoteSpend, nullifiers, outputs)
        }
    };

    let mut witness = spend_witness(inputs, &nullifiers);
    witness.insert("ballot_id".into(), WitnessValue::Field(ballot.id.0));
    witness.insert("vote_weight".into(), WitnessValue::U64(weight));
    witness.insert(
        "position_commitment".into(),
        WitnessValue::Field(position_commitment.0),
    );

    Ok(OperationPlan {
        flow,
        pool_context: ballot_pool,
        circuit: flow.circuit(),
        witness,
        nullifiers,
        input_commitments: inputs.iter().map(|n| n.commitment).collect(),
        outputs,
        action: ExecuteAction::Tally(TallyUpdate {
            ballot: ballot.id.0,
            weights: vec![EncryptedWeight {
                option,
                ciphertext: ciphertext.to_bytes().to_vec(),
            }],
        }),
    })
}

/// Build a vote change: consume the old position, cancel its tally
/// contribution with a negated ciphertext, and contribute the new one
#[allow(clippy::too_many_arguments)]
pub fn build_change_vote_plan<R: Rng>(
    ballot: &Ballot,
    position: &ScannedNote,
    old_option: u32,
    new_option: u32,
    nullifier_key: &NullifierKey,
    voter: &ShieldedAddress,
    now: u64,
    rng: &mut R,
) -> Result<OperationPlan, EngineError> {
    if !ballot.is_active(now) {
        return Err(EngineError::BallotNotActive);
    }

    let ballot_pool = ballot.pool_context();
    let weight = position.note.amount.as_u64();
    let token = position.note.token_id;

    // Cancel the old contribution: same seed, modularly negated weight.
    let old_seed = derive_option_seed(&position.note.randomness, old_option);
    let cancel = encrypt_negated_contribution(weight, &ballot.config.tally_pk, &old_seed);

    let new_position = seal_note(
        voter,
        token,
        weight,
        ballot_pool,
        Some(&new_option.to_le_bytes()),
        rng,
    )?;
    let new_seed = derive_option_seed(&new_position.note.randomness, new_option);
    let contribute = encrypt_contribution(weight, &ballot.config.tally_pk, &new_seed);

    let inputs = std::slice::from_ref(position);
    let nullifiers = vec![nullifier_key.derive_nullifier(&position.commitment, position.leaf_index)];

    let mut witness = spend_witness(inputs, &nullifiers);
    witness.insert("ballot_id".into(), WitnessValue::Field(ballot.id.0));
    witness.insert("vote_weight".into(), WitnessValue::U64(weight));

    Ok(OperationPlan {
        flow: FlowKind::ChangeVote,
        pool_context: ballot_pool,
        circuit: FlowKind::ChangeVote.circuit(),
        witness,
        nullifiers,
        input_commitments: vec![position.commitment],
        outputs: vec![output_record(
            ballot_pool,
            new_position.note.commitment(),
            new_position.payload,
        )],
        action: ExecuteAction::Tally(TallyUpdate {
            ballot: ballot.id.0,
            weights: vec![
                EncryptedWeight {
                    option: old_option,
                    ciphertext: cancel.to_bytes().to_vec(),
                },
                EncryptedWeight {
                    option: new_option,
                    ciphertext: contribute.to_bytes().to_vec(),
                },
            ],
        }),
    })
}

/// Build a position close: consume the position, cancel its contribution,
/// refund the locked value to the voter's main pool
pub fn build_close_position_plan<R: Rng>(
    ballot: &Ballot,
    position: &ScannedNote,
    option: u32,
    nullifier_key: &NullifierKey,
    voter: &ShieldedAddress,
    refund_pool: PoolContext,
    rng: &mut R,
) -> Result<OperationPlan, EngineError> {
    let weight = position.note.amount.as_u64();
    let token = position.note.token_id;

    let seed = derive_option_seed(&position.note.randomness, option);
    let cancel = encrypt_negated_contribution(weight, &ballot.config.tally_pk, &seed);

    let refund = seal_note(voter, token, weight, refund_pool, None, rng)?;

    let inputs = std::slice::from_ref(position);
    let nullifiers = vec![nullifier_key.derive_nullifier(&position.commitment, position.leaf_index)];

    let mut witness = spend_witness(inputs, &nullifiers);
    witness.insert("ballot_id".into(), WitnessValue::Field(ballot.id.0));

    Ok(OperationPlan {
        flow: FlowKind::ClosePosition,
        pool_context: ballot.pool_context(),
        circuit: FlowKind::ClosePosition.circuit(),
        witness,
        nullifiers,
        input_commitments: vec![position.commitment],
        outputs: vec![output_record(
            refund_pool,
            refund.note.commitment(),
            refund.payload,
        )],
        action: ExecuteAction::Tally(TallyUpdate {
            ballot: ballot.id.0,
            weights: vec![EncryptedWeight {
                option,
                ciphertext: cancel.to_bytes().to_vec(),
            }],
        }),
    })
}

/// Build a claim: after the ballot settles, consume the position and
/// redeem its payout as a spendable note in the target pool
pub fn build_claim_plan<R: Rng>(
    ballot: &Ballot,
    position: &ScannedNote,
    payout_amount: u64,
    nullifier_key: &NullifierKey,
    voter: &ShieldedAddress,
    payout_pool: PoolContext,
    rng: &mut R,
) -> Result<OperationPlan, EngineError> {
    let token = position.note.token_id;

    let payout = seal_note(voter, token, payout_amount, payout_pool, None, rng)?;

    let inputs = std::slice::from_ref(position);
    let nullifiers = vec![nullifier_key.derive_nullifier(&position.commitment, position.leaf_index)];

    let mut witness = spend_witness(inputs, &nullifiers);
    witness.insert("ballot_id".into(), WitnessValue::Field(ballot.id.0));
    witness.insert("payout_amount".into(), WitnessValue::U64(payout_amount));

    Ok(OperationPlan {
        flow: FlowKind::Claim,
        pool_context: ballot.pool_context(),
        circuit: FlowKind::Claim.circuit(),
        witness,
        nullifiers,
        input_commitments: vec![position.commitment],
        outputs: vec![output_record(
            payout_pool,
            payout.note.commitment(),
            payout.payload,
        )],
        action: ExecuteAction::Claim(ClaimSettle {
            ballot: ballot.id.0,
            token: token.0,
            amount: payout_amount,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use calyx_shield::tally::TallyKeypair;
    use calyx_shield::{Note, SpendingKey, StealthAddress};
    use rand::rngs::OsRng;

    fn ballot(binding: BindingMode, keypair: &TallyKeypair) -> Ballot {
        Ballot {
            id: BallotId([5u8; 32]),
            config: BallotConfig {
                options: 3,
                tally_pk: keypair.public_key(),
                binding,
                starts_at: 100,
                ends_at: 200,
            },
        }
    }

    fn scanned_note(owner: &SpendingKey, amount: u64, leaf_index: u64) -> ScannedNote {
        let mut rng = OsRng;
        let stealth = StealthAddress::generate(&owner.address(), &mut rng).unwrap();
        let note = Note::new(
            stealth.address.stealth_pk,
            TokenId([1u8; 32]),
            amount,
            PoolContext([2u8; 32]),
            &mut rng,
        );
        ScannedNote {
            commitment: note.commitment(),
            note,
            leaf_index,
            spent: false,
        }
    }

    #[test]
    fn test_vote_outside_window_rejected() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let ballot = ballot(BindingMode::Locked, &keypair);
        let voter = SpendingKey::random(&mut rng);
        let inputs = vec![scanned_note(&voter, 100, 0)];

        let result = build_vote_plan(
            &ballot,
            0,
            100,
            &inputs,
            &voter.nullifier_key(),
            &voter.address(),
            TokenId([1u8; 32]),
            250, // past ends_at
            &mut rng,
        );
        assert!(matches!(result, Err(EngineError::BallotNotActive)));
    }

    #[test]
    fn test_snapshot_vote_uses_scoped_nullifiers() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let ballot = ballot(BindingMode::Snapshot, &keypair);
        let voter = SpendingKey::random(&mut rng);
        let nk = voter.nullifier_key();
        let inputs = vec![scanned_note(&voter, 100, 7)];

        let plan = build_vote_plan(
            &ballot,
            1,
            100,
            &inputs,
            &nk,
            &voter.address(),
            TokenId([1u8; 32]),
            150,
            &mut rng,
        )
        .unwrap();

        assert_eq!(plan.flow, FlowKind::VoteSnapshot);
        let spend_nf = nk.derive_nullifier(&inputs[0].commitment, 7);
        assert_ne!(
            plan.nullifiers[0], spend_nf,
            "snapshot vote must not publish the spend nullifier"
        );
        assert_eq!(
            plan.nullifiers[0],
            nk.derive_vote_nullifier(&inputs[0].commitment, 7, &ballot.id.0)
        );
    }

    #[test]
    fn test_locked_vote_spends_and_returns_change() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let ballot = ballot(BindingMode::Locked, &keypair);
        let voter = SpendingKey::random(&mut rng);
        let inputs = vec![scanned_note(&voter, 100, 0), scanned_note(&voter, 50, 1)];

        let plan = build_vote_plan(
            &ballot,
            2,
            120,
            &inputs,
            &voter.nullifier_key(),
            &voter.address(),
            TokenId([1u8; 32]),
            150,
            &mut rng,
        )
        .unwrap();

        assert_eq!(plan.flow, FlowKind::VoteSpend);
        assert_eq!(plan.nullifiers.len(), 2);
        // Position in the ballot pool, change back in the token pool.
        assert_eq!(plan.outputs.len(), 2);
        assert_eq!(plan.outputs[0].pool_context, ballot.pool_context());
        assert_eq!(plan.outputs[1].pool_context, PoolContext([2u8; 32]));
    }

    #[test]
    fn test_change_vote_negates_and_recontributes() {
        let mut rng = OsRng;
        let keypair = TallyKeypair::generate(&mut rng).unwrap();
        let ballot = ballot(BindingMode::Locked, &keypair);
        let voter = SpendingKey::random(&mut rng);
        let position = scanned_note(&voter, 80, 3);

        let plan = build_change_vote_plan(
            &ballot,
            &position,
            0,
            2,
            &voter.nullifier_key(),
            &voter.address(),
            150,
            &mut rng,
        )
        .unwrap();

        assert_eq!(plan.flow, FlowKind::ChangeVote);
        match &plan.action {
            ExecuteAction::Tally(update) => {
                assert_eq!(update.weights.len(), 2, "cancel old + contribute new");
                assert_eq!(update.weights[0].option, 0);
                assert_eq!(update.weights[1].option, 2);
            }
            other => panic!("expected tally update, got {other:?}"),
        }
    }
}
