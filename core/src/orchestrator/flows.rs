//! Per-flow phase templates and operation plan builders.
//!
//! Every flow is an instance of the same six-phase template with some
//! phases omitted: a flow runs exactly the phases whose preconditions its
//! inputs can satisfy, always in canonical order. Shield spends nothing,
//! so it has no verify-input or nullifier phase; a plain transfer moves no
//! public balance, so it has no execute phase; creating a ballot produces
//! no note outputs.

use rand::Rng;
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use calyx_shield::{
    Commitment, CommitmentRecord, EncryptedNotePayload, Nullifier, PoolContext, ShieldedAddress,
    TokenId, ZERO_COMMITMENT, seal_note,
};

use crate::error::EngineError;
use crate::prover::{CircuitId, WitnessMap, WitnessValue};
use crate::scanner::ScannedNote;

use super::operation::Phase;

/// Every operation the pool program understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    Shield,
    Transfer,
    Unshield,
    Swap,
    AddLiquidity,
    RemoveLiquidity,
    OpenPerpPosition,
    ClosePerpPosition,
    CreateBallot,
    VoteSnapshot,
    VoteSpend,
    ChangeVote,
    ClosePosition,
    Claim,
}

impl FlowKind {
    /// Does this flow consume an existing commitment?
    ///
    /// Snapshot voting does not remove tokens, but it still consumes a
    /// one-time voting right: it proves the note exists and registers a
    /// ballot-scoped nullifier so the same note cannot vote twice.
    pub fn spends_input(&self) -> bool {
        !matches!(self, FlowKind::Shield | FlowKind::CreateBallot)
    }

    /// Does phase 3 apply a public state change (vault transfer, tally
    /// update, pool balance move)?
    pub fn has_execute_effect(&self) -> bool {
        // A plain shielded transfer only swaps notes.
        !matches!(self, FlowKind::Transfer)
    }

    /// Does this flow create note/position commitments?
    pub fn creates_outputs(&self) -> bool {
        !matches!(self, FlowKind::CreateBallot)
    }

    /// The exact phase sequence for this flow, in canonical order
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = vec![Phase::Open];
        if self.spends_input() {
            phases.push(Phase::VerifyInput);
            phases.push(Phase::CreateNullifiers);
        }
        if self.has_execute_effect() {
            phases.push(Phase::Execute);
        }
        if self.creates_outputs() {
            phases.push(Phase::CreateOutputs);
        }
        phases.push(Phase::Close);
        phases
    }

    /// Which circuit proves this flow
    pub fn circuit(&self) -> CircuitId {
        let name = match self {
            FlowKind::Shield => "calyx-shield-v1",
            FlowKind::Transfer | FlowKind::Unshield => "calyx-spend-v1",
            FlowKind::Swap => "calyx-swap-v1",
            FlowKind::AddLiquidity | FlowKind::RemoveLiquidity => "calyx-liquidity-v1",
            FlowKind::OpenPerpPosition | FlowKind::ClosePerpPosition => "calyx-perp-v1",
            FlowKind::CreateBallot => "calyx-ballot-v1",
            FlowKind::VoteSnapshot | FlowKind::VoteSpend | FlowKind::ChangeVote => "calyx-vote-v1",
            FlowKind::ClosePosition | FlowKind::Claim => "calyx-claim-v1",
        };
        CircuitId(name.to_string())
    }

    pub fn index(&self) -> u8 {
        match self {
            FlowKind::Shield => 0,
            FlowKind::Transfer => 1,
            FlowKind::Unshield => 2,
            FlowKind::Swap => 3,
            FlowKind::AddLiquidity => 4,
            FlowKind::RemoveLiquidity => 5,
            FlowKind::OpenPerpPosition => 6,
            FlowKind::ClosePerpPosition => 7,
            FlowKind::CreateBallot => 8,
            FlowKind::VoteSnapshot => 9,
            FlowKind::VoteSpend => 10,
            FlowKind::ChangeVote => 11,
            FlowKind::ClosePosition => 12,
            FlowKind::Claim => 13,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Some(match index {
            0 => FlowKind::Shield,
            1 => FlowKind::Transfer,
            2 => FlowKind::Unshield,
            3 => FlowKind::Swap,
            4 => FlowKind::AddLiquidity,
            5 => FlowKind::RemoveLiquidity,
            6 => FlowKind::OpenPerpPosition,
            7 => FlowKind::ClosePerpPosition,
            8 => FlowKind::CreateBallot,
            9 => FlowKind::VoteSnapshot,
            10 => FlowKind::VoteSpend,
            11 => FlowKind::ChangeVote,
            12 => FlowKind::ClosePosition,
            13 => FlowKind::Claim,
            _ => return None,
        })
    }
}

/// One encrypted per-option vote weight inside a tally update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct EncryptedWeight {
    pub option: u32,
    /// 64-byte tally ciphertext
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct VaultDeposit {
    pub token: [u8; 32],
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct VaultWithdraw {
    pub token: [u8; 32],
    pub amount: u64,
    /// Public ledger account receiving the funds
    pub recipient: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct TallyUpdate {
    pub ballot: [u8; 32],
    pub weights: Vec<EncryptedWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct BallotCreate {
    pub ballot: [u8; 32],
    pub options: u32,
    pub tally_pk: [u8; 32],
    pub starts_at: u64,
    pub ends_at: u64,
    /// 0 = snapshot (tokens stay spendable), 1 = locked (spend-to-vote)
    pub binding: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct ClaimSettle {
    pub ballot: [u8; 32],
    pub token: [u8; 32],
    pub amount: u64,
}

/// The public state change phase 3 applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub enum ExecuteAction {
    None,
    Deposit(VaultDeposit),
    Withdraw(VaultWithdraw),
    Tally(TallyUpdate),
    OpenBallot(BallotCreate),
    Claim(ClaimSettle),
}

/// A fully assembled operation, ready for the orchestrator
#[derive(Debug, Clone)]
pub struct OperationPlan {
    pub flow: FlowKind,
    pub pool_context: PoolContext,
    pub circuit: CircuitId,
    pub witness: WitnessMap,
    pub nullifiers: Vec<Nullifier>,
    pub input_commitments: Vec<Commitment>,
    pub outputs: Vec<CommitmentRecord>,
    pub action: ExecuteAction,
}

/// A record slot for an output note
pub(crate) fn output_record(
    pool_context: PoolContext,
    commitment: Commitment,
    encrypted_note: EncryptedNotePayload,
) -> CommitmentRecord {
    CommitmentRecord {
        pool_context,
        commitment,
        // Assigned by the ledger at creation time.
        leaf_index: 0,
        encrypted_note,
    }
}

/// The reserved all-zero output filling an unused fixed-arity slot (e.g.
/// an unshield with exactly zero change). The verifier recognizes it and
/// the ledger creates no record for it.
pub(crate) fn sentinel_output(pool_context: PoolContext) -> CommitmentRecord {
    CommitmentRecord {
        pool_context,
        commitment: Commitment(ZERO_COMMITMENT),
        leaf_index: 0,
        encrypted_note: EncryptedNotePayload {
            epk_x: [0u8; 32],
            epk_y: [0u8; 32],
            ciphertext: Vec::new(),
            tag: [0u8; 16],
        },
    }
}

/// Witness entries shared by every spending flow
pub(crate) fn spend_witness(inputs: &[ScannedNote], nullifiers: &[Nullifier]) -> WitnessMap {
    let mut witness = WitnessMap::new();
    witness.insert(
        "input_commitments".into(),
        WitnessValue::Fields(inputs.iter().map(|n| n.commitment.0).collect()),
    );
    witness.insert(
        "input_amounts".into(),
        WitnessValue::U64List(inputs.iter().map(|n| n.note.amount.as_u64()).collect()),
    );
    witness.insert(
        "input_randomness".into(),
        WitnessValue::Fields(inputs.iter().map(|n| n.note.randomness).collect()),
    );
    witness.insert(
        "input_leaf_indices".into(),
        WitnessValue::U64List(inputs.iter().map(|n| n.leaf_index).collect()),
    );
    witness.insert(
        "nullifiers".into(),
        WitnessValue::Fields(nullifiers.iter().map(|n| n.0).collect()),
    );
    witness
}

/// Build a shield plan: no inputs, one new note, a public vault deposit
pub fn build_shield_plan<R: Rng>(
    recipient: &ShieldedAddress,
    token: TokenId,
    amount: u64,
    pool_context: PoolContext,
    rng: &mut R,
) -> Result<OperationPlan, EngineError> {
    let sealed = seal_note(recipient, token, amount, pool_context, None, rng)?;
    let commitment = sealed.note.commitment();

    let mut witness = WitnessMap::new();
    witness.insert("output_commitment".into(), WitnessValue::Field(commitment.0));
    witness.insert("amount".into(), WitnessValue::U64(amount));
    witness.insert(
        "randomness".into(),
        WitnessValue::Field(sealed.note.randomness),
    );

    Ok(OperationPlan {
        flow: FlowKind::Shield,
        pool_context,
        circuit: FlowKind::Shield.circuit(),
        witness,
        nullifiers: Vec::new(),
        input_commitments: Vec::new(),
        outputs: vec![output_record(pool_context, commitment, sealed.payload)],
        action: ExecuteAction::Deposit(VaultDeposit {
            token: token.0,
            amount,
        }),
    })
}

/// Build a transfer plan: spend inputs, produce a recipient note and a
/// change note back to the sender (the all-zero sentinel when change is
/// exactly zero, keeping the circuit's fixed output arity).
#[allow(clippy::too_many_arguments)]
pub fn build_transfer_plan<R: Rng>(
    inputs: &[ScannedNote],
    nullifiers: Vec<Nullifier>,
    recipient: &ShieldedAddress,
    change_owner: &ShieldedAddress,
    token: TokenId,
    amount: u64,
    pool_context: PoolContext,
    rng: &mut R,
) -> Result<OperationPlan, EngineError> {
    let total: u64 = inputs.iter().map(|n| n.note.amount.as_u64()).sum();
    let change = total
        .checked_sub(amount)
        .ok_or_else(|| EngineError::Internal("transfer inputs below amount".into()))?;

    let sealed_out = seal_note(recipient, token, amount, pool_context, None, rng)?;
    let out_record = output_record(pool_context, sealed_out.note.commitment(), sealed_out.payload);

    let change_record = if change > 0 {
        let sealed = seal_note(change_owner, token, change, pool_context, None, rng)?;
        output_record(pool_context, sealed.note.commitment(), sealed.payload)
    } else {
        sentinel_output(pool_context)
    };

    let mut witness = spend_witness(inputs, &nullifiers);
    witness.insert("transfer_amount".into(), WitnessValue::U64(amount));
    witness.insert("change_amount".into(), WitnessValue::U64(change));

    Ok(OperationPlan {
        flow: FlowKind::Transfer,
        pool_context,
        circuit: FlowKind::Transfer.circuit(),
        witness,
        nullifiers,
        input_commitments: inputs.iter().map(|n| n.commitment).collect(),
        outputs: vec![out_record, change_record],
        action: ExecuteAction::None,
    })
}

/// Build an unshield plan: spend inputs, pay out publicly, keep the change
/// shielded (sentinel output when change is zero)
pub fn build_unshield_plan<R: Rng>(
    inputs: &[ScannedNote],
    nullifiers: Vec<Nullifier>,
    change_owner: &ShieldedAddress,
    token: TokenId,
    amount: u64,
    public_recipient: [u8; 32],
    pool_context: PoolContext,
    rng: &mut R,
) -> Result<OperationPlan, EngineError> {
    let total: u64 = inputs.iter().map(|n| n.note.amount.as_u64()).sum();
    let change = total
        .checked_sub(amount)
        .ok_or_else(|| EngineError::Internal("unshield inputs below amount".into()))?;

    let change_record = if change > 0 {
        let sealed = seal_note(change_owner, token, change, pool_context, None, rng)?;
        output_record(pool_context, sealed.note.commitment(), sealed.payload)
    } else {
        sentinel_output(pool_context)
    };

    let mut witness = spend_witness(inputs, &nullifiers);
    witness.insert("withdraw_amount".into(), WitnessValue::U64(amount));
    witness.insert("change_amount".into(), WitnessValue::U64(change));

    Ok(OperationPlan {
        flow: FlowKind::Unshield,
        pool_context,
        circuit: FlowKind::Unshield.circuit(),
        witness,
        nullifiers,
        input_commitments: inputs.iter().map(|n| n.commitment).collect(),
        outputs: vec![change_record],
        action: ExecuteAction::Withdraw(VaultWithdraw {
            token: token.0,
            amount,
            recipient: public_recipient,
        }),
    })
}

/// Build a consolidation merge: spend a batch of small notes, produce one
/// merged note back to the owner
pub fn build_merge_plan<R: Rng>(
    batch: &[ScannedNote],
    nullifiers: Vec<Nullifier>,
    owner: &ShieldedAddress,
    token: TokenId,
    pool_context: PoolContext,
    rng: &mut R,
) -> Result<OperationPlan, EngineError> {
    let total: u64 = batch.iter().map(|n| n.note.amount.as_u64()).sum();

    let sealed = seal_note(owner, token, total, pool_context, None, rng)?;
    let merged = output_record(pool_context, sealed.note.commitment(), sealed.payload);

    let mut witness = spend_witness(batch, &nullifiers);
    witness.insert("merged_amount".into(), WitnessValue::U64(total));

    Ok(OperationPlan {
        flow: FlowKind::Transfer,
        pool_context,
        circuit: FlowKind::Transfer.circuit(),
        witness,
        nullifiers,
        input_commitments: batch.iter().map(|n| n.commitment).collect(),
        // Merge is a self-transfer with no second recipient.
        outputs: vec![merged, sentinel_output(pool_context)],
        action: ExecuteAction::None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_sets_per_flow() {
        assert_eq!(
            FlowKind::Shield.phases(),
            vec![Phase::Open, Phase::Execute, Phase::CreateOutputs, Phase::Close]
        );
        assert_eq!(
            FlowKind::Transfer.phases(),
            vec![
                Phase::Open,
                Phase::VerifyInput,
                Phase::CreateNullifiers,
                Phase::CreateOutputs,
                Phase::Close
            ]
        );
        assert_eq!(
            FlowKind::Unshield.phases(),
            vec![
                Phase::Open,
                Phase::VerifyInput,
                Phase::CreateNullifiers,
                Phase::Execute,
                Phase::CreateOutputs,
                Phase::Close
            ]
        );
        assert_eq!(
            FlowKind::CreateBallot.phases(),
            vec![Phase::Open, Phase::Execute, Phase::Close]
        );
    }

    #[test]
    fn test_phases_are_canonically_ordered() {
        for index in 0.. {
            let Some(flow) = FlowKind::from_index(index) else {
                break;
            };
            let phases = flow.phases();
            let mut sorted = phases.clone();
            sorted.sort();
            assert_eq!(phases, sorted, "{flow:?} phases out of canonical order");
            assert_eq!(phases.first(), Some(&Phase::Open));
            assert_eq!(phases.last(), Some(&Phase::Close));
        }
    }

    #[test]
    fn test_flow_index_roundtrip() {
        for index in 0..=13u8 {
            let flow = FlowKind::from_index(index).unwrap();
            assert_eq!(flow.index(), index);
        }
        assert_eq!(FlowKind::from_index(14), None);
    }
}
