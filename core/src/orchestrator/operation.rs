//! Multi-phase operation state.
//!
//! A `PendingOperation` mirrors the ledger-resident record that tracks one
//! in-flight operation: the proof, the declared nullifiers and output
//! records, the execute action, and the highest confirmed phase. The
//! ledger copy is authoritative — after a crash, recovery re-reads it and
//! resumes from the recorded phase rather than trusting client memory.

use rand::Rng;
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use calyx_shield::{Commitment, CommitmentRecord, Nullifier};

use super::flows::{ExecuteAction, FlowKind};

/// Random 32-byte key of one in-flight multi-phase operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub [u8; 32]);

impl OperationId {
    /// Draw a fresh operation id
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut id = [0u8; 32];
        rng.fill_bytes(&mut id);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// The canonical phase sequence. Every flow runs a subset of these, always
/// in this order; phase k+1 is never submitted before phase k is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Submit the proof and all public values, create the pending record
    Open,
    /// Prove the spent input commitment(s) exist in compressed state
    VerifyInput,
    /// Register the declared nullifier(s) — the double-spend gate
    CreateNullifiers,
    /// Apply the business-logic state change
    Execute,
    /// Register the declared output commitment(s)
    CreateOutputs,
    /// Delete the pending record, reclaiming its storage
    Close,
}

impl Phase {
    pub fn index(&self) -> u8 {
        match self {
            Phase::Open => 0,
            Phase::VerifyInput => 1,
            Phase::CreateNullifiers => 2,
            Phase::Execute => 3,
            Phase::CreateOutputs => 4,
            Phase::Close => 5,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Phase::Open),
            1 => Some(Phase::VerifyInput),
            2 => Some(Phase::CreateNullifiers),
            3 => Some(Phase::Execute),
            4 => Some(Phase::CreateOutputs),
            5 => Some(Phase::Close),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Open => "open",
            Phase::VerifyInput => "verify-input",
            Phase::CreateNullifiers => "create-nullifiers",
            Phase::Execute => "execute",
            Phase::CreateOutputs => "create-outputs",
            Phase::Close => "close",
        };
        f.write_str(name)
    }
}

/// Inclusion proof for a spent input commitment, as submitted on-ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct InclusionProofWire {
    pub root: [u8; 32],
    pub leaf_index: u64,
    pub siblings: Vec<[u8; 32]>,
}

/// Non-inclusion (new-address validity) proof for a to-be-created record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct NonInclusionProofWire {
    pub root: [u8; 32],
    pub low_leaf_index: u64,
    pub siblings: Vec<[u8; 32]>,
}

/// Instruction data for one phase submission.
///
/// Only `Open` declares values; later phases carry just the indexer proofs
/// their checks need — everything else is read from the pending record's
/// committed state on-ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub enum PhasePayload {
    Open(OpenPayload),
    VerifyInput(VerifyInputPayload),
    CreateNullifiers(CreateNullifiersPayload),
    Execute,
    CreateOutputs,
    Close,
}

/// Phase-0 declaration: proof plus every public value of the operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct OpenPayload {
    pub flow: u8,
    pub proof: Vec<u8>,
    pub nullifiers: Vec<[u8; 32]>,
    pub input_commitments: Vec<[u8; 32]>,
    /// Wire-encoded output commitment records
    pub outputs: Vec<Vec<u8>>,
    pub action: ExecuteAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct VerifyInputPayload {
    pub proofs: Vec<InclusionProofWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct CreateNullifiersPayload {
    pub proofs: Vec<NonInclusionProofWire>,
}

/// Client-side mirror of the ledger-resident pending-operation record
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub id: OperationId,
    pub flow: FlowKind,
    pub proof: Vec<u8>,
    pub nullifiers: Vec<Nullifier>,
    pub input_commitments: Vec<Commitment>,
    pub outputs: Vec<CommitmentRecord>,
    pub action: ExecuteAction,
    /// Highest phase the ledger has confirmed, `None` before Open lands
    pub confirmed: Option<Phase>,
}

impl PendingOperation {
    /// The next phase to submit, or `None` when the operation is complete
    pub fn next_phase(&self) -> Option<Phase> {
        let sequence = self.flow.phases();
        match self.confirmed {
            None => sequence.first().copied(),
            Some(done) => sequence
                .iter()
                .skip_while(|p| **p != done)
                .nth(1)
                .copied(),
        }
    }

    /// The phase-0 declaration for this operation
    pub fn open_payload(&self) -> OpenPayload {
        OpenPayload {
            flow: self.flow.index(),
            proof: self.proof.clone(),
            nullifiers: self.nullifiers.iter().map(|n| n.0).collect(),
            input_commitments: self.input_commitments.iter().map(|c| c.0).collect(),
            outputs: self.outputs.iter().map(|o| o.encode()).collect(),
            action: self.action.clone(),
        }
    }
}

/// Ledger wire form of a pending operation (what the record actually holds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct PendingOperationWire {
    pub id: [u8; 32],
    pub flow: u8,
    pub proof: Vec<u8>,
    pub nullifiers: Vec<[u8; 32]>,
    pub input_commitments: Vec<[u8; 32]>,
    pub outputs: Vec<Vec<u8>>,
    pub action: ExecuteAction,
    /// Confirmed phase index + 1; zero means nothing confirmed
    pub confirmed: u8,
}

impl PendingOperationWire {
    pub fn from_pending(op: &PendingOperation) -> Self {
        Self {
            id: op.id.0,
            flow: op.flow.index(),
            proof: op.proof.clone(),
            nullifiers: op.nullifiers.iter().map(|n| n.0).collect(),
            input_commitments: op.input_commitments.iter().map(|c| c.0).collect(),
            outputs: op.outputs.iter().map(|o| o.encode()).collect(),
            action: op.action.clone(),
            confirmed: op.confirmed.map(|p| p.index() + 1).unwrap_or(0),
        }
    }

    pub fn into_pending(self) -> Option<PendingOperation> {
        let outputs = self
            .outputs
            .iter()
            .map(|bytes| CommitmentRecord::parse(bytes).ok())
            .collect::<Option<Vec<_>>>()?;
        Some(PendingOperation {
            id: OperationId(self.id),
            flow: FlowKind::from_index(self.flow)?,
            proof: self.proof,
            nullifiers: self.nullifiers.into_iter().map(Nullifier).collect(),
            input_commitments: self.input_commitments.into_iter().map(Commitment).collect(),
            outputs,
            action: self.action,
            confirmed: if self.confirmed == 0 {
                None
            } else {
                Phase::from_index(self.confirmed - 1)
            },
        })
    }
}

/// Everything a completed (or partially completed) operation produced
#[derive(Debug, Clone)]
pub struct OperationReceipt {
    pub operation: OperationId,
    pub flow: FlowKind,
    /// Confirmed phases with their ledger signatures, in execution order
    pub phases: Vec<(Phase, String)>,
    /// Nullifiers registered by this operation
    pub nullifiers: Vec<Nullifier>,
    /// Real (non-sentinel) output commitments created
    pub new_commitments: Vec<Commitment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use calyx_shield::{EncryptedNotePayload, PoolContext, ZERO_COMMITMENT};

    fn dummy_record() -> CommitmentRecord {
        CommitmentRecord {
            pool_context: PoolContext([1u8; 32]),
            commitment: Commitment([2u8; 32]),
            leaf_index: 0,
            encrypted_note: EncryptedNotePayload {
                epk_x: [0u8; 32],
                epk_y: [0u8; 32],
                ciphertext: vec![1, 2, 3],
                tag: [0u8; 16],
            },
        }
    }

    fn pending(flow: FlowKind, confirmed: Option<Phase>) -> PendingOperation {
        PendingOperation {
            id: OperationId([7u8; 32]),
            flow,
            proof: vec![0u8; 64],
            nullifiers: vec![Nullifier([3u8; 32])],
            input_commitments: vec![Commitment([4u8; 32])],
            outputs: vec![dummy_record()],
            action: ExecuteAction::None,
            confirmed,
        }
    }

    #[test]
    fn test_next_phase_walks_flow_sequence() {
        let op = pending(FlowKind::Transfer, None);
        assert_eq!(op.next_phase(), Some(Phase::Open));

        let op = pending(FlowKind::Transfer, Some(Phase::Open));
        assert_eq!(op.next_phase(), Some(Phase::VerifyInput));

        // Transfer has no Execute phase: CreateNullifiers jumps to outputs.
        let op = pending(FlowKind::Transfer, Some(Phase::CreateNullifiers));
        assert_eq!(op.next_phase(), Some(Phase::CreateOutputs));

        let op = pending(FlowKind::Transfer, Some(Phase::Close));
        assert_eq!(op.next_phase(), None);
    }

    #[test]
    fn test_shield_skips_input_phases() {
        let op = pending(FlowKind::Shield, Some(Phase::Open));
        assert_eq!(op.next_phase(), Some(Phase::Execute));
    }

    #[test]
    fn test_wire_roundtrip() {
        let op = pending(FlowKind::Unshield, Some(Phase::VerifyInput));
        let wire = PendingOperationWire::from_pending(&op);
        assert_eq!(wire.into_pending().unwrap(), op);

        let op = pending(FlowKind::Shield, None);
        let wire = PendingOperationWire::from_pending(&op);
        assert_eq!(wire.confirmed, 0);
        assert_eq!(wire.into_pending().unwrap(), op);
    }

    #[test]
    fn test_phase_index_roundtrip() {
        for index in 0..=5u8 {
            let phase = Phase::from_index(index).unwrap();
            assert_eq!(phase.index(), index);
        }
        assert_eq!(Phase::from_index(6), None);
    }

    #[test]
    fn test_zero_commitment_is_reserved() {
        assert_eq!(Commitment(ZERO_COMMITMENT).0, [0u8; 32]);
    }
}
