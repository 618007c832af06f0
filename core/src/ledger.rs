//! Host ledger boundary.
//!
//! Phase transactions are submitted under a blockhash-and-expiry freshness
//! model: a fresh blockhash is fetched immediately before each submission,
//! "expired" is retryable (rebuild and resubmit that phase only — an
//! expired transaction can no longer land), and "logic rejected" is fatal
//! for the operation. Connectivity failures during submission are
//! surfaced, never silently retried, because the transaction may already
//! have landed.
//!
//! `MockLedger` implements the pool program's phase semantics over
//! in-memory chain state shared with [`crate::indexer::MockIndexer`], so
//! the engine's contracts — phase ordering, nullifier non-inclusion,
//! commitment inclusion — are testable without a validator.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use calyx_shield::{Commitment, CommitmentRecord, Nullifier, ZERO_COMMITMENT};

use crate::indexer::{
    COMMITMENT_RECORD_SEED, CompressedRecord, NULLIFIER_RECORD_SEED, OPERATION_RECORD_SEED,
    derive_record_address,
};
use crate::orchestrator::flows::{ExecuteAction, FlowKind};
use crate::orchestrator::operation::{
    OperationId, PendingOperation, PendingOperationWire, Phase, PhasePayload,
};

use calyx_shield::record::NOTE_RECORD_DISCRIMINATOR;

// ============================================================================
// Types
// ============================================================================

/// A ledger freshness token; phase transactions expire with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blockhash(pub [u8; 32]);

/// Ledger transaction signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSignature(pub String);

impl std::fmt::Display for TxSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Submission outcomes the orchestrator must distinguish
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The freshness token expired; the transaction cannot have landed.
    /// Rebuild with a fresh blockhash and resubmit the same phase.
    #[error("blockhash expired")]
    Expired,

    /// The program's logic rejected the transaction. Fatal for the
    /// operation; the reason names the failed check.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Transport failure; the transaction may or may not have landed.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Ledger Trait
// ============================================================================

/// Submit/confirm boundary to the host ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch a fresh freshness token
    async fn latest_blockhash(&self) -> Result<Blockhash, LedgerError>;

    /// Submit one phase transaction for an operation
    async fn submit_phase(
        &self,
        operation: &OperationId,
        phase: Phase,
        payload: &PhasePayload,
        blockhash: &Blockhash,
    ) -> Result<TxSignature, LedgerError>;

    /// Wait for a submitted transaction to reach finality
    async fn confirm(&self, signature: &TxSignature) -> Result<(), LedgerError>;

    /// Read a pending operation's on-ledger state (recovery path)
    async fn fetch_operation(
        &self,
        operation: &OperationId,
    ) -> Result<Option<PendingOperation>, LedgerError>;
}

// ============================================================================
// Mock Ledger
// ============================================================================

/// Failure the mock injects at a chosen phase (test hook)
#[derive(Debug, Clone)]
pub enum MockFailure {
    Expired,
    Rejected(String),
    Unavailable,
}

/// Shared in-memory chain state behind `MockLedger` + `MockIndexer`
#[derive(Debug, Default)]
pub struct MockChainState {
    pub program_id: [u8; 32],
    /// All compressed records, in creation order
    pub records: Vec<CompressedRecord>,
    /// Addresses of existing records (nullifiers, notes, operations)
    pub addresses: HashSet<[u8; 32]>,
    /// Commitment hashes present in the state tree
    pub commitments: HashSet<[u8; 32]>,
    /// Next leaf index in the append-only commitment structure
    pub next_leaf: u64,
    /// Open pending operations keyed by operation id
    pub pending: HashMap<[u8; 32], PendingOperation>,
    /// Execute-phase actions the "program" applied, in order
    pub executed: Vec<ExecuteAction>,
    /// Simulate indexer connectivity loss
    pub offline: bool,
    /// Inject a failure when this phase is next submitted
    pub fail_phase: Option<(Phase, MockFailure)>,
    blockhash_counter: u64,
}

impl MockChainState {
    pub fn new(program_id: [u8; 32]) -> Self {
        Self {
            program_id,
            ..Default::default()
        }
    }

    /// A stand-in state root that changes with every mutation
    pub fn root(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.next_leaf.to_le_bytes());
        hasher.update(&(self.addresses.len() as u64).to_le_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Append a note record, assigning its leaf index. Used by the
    /// create-outputs phase and by tests seeding pre-existing state.
    pub fn create_note_record(&mut self, record: &CommitmentRecord) -> u64 {
        let leaf_index = self.next_leaf;
        self.next_leaf += 1;

        let mut stored = record.clone();
        stored.leaf_index = leaf_index;

        let address = derive_record_address(
            &self.program_id,
            COMMITMENT_RECORD_SEED,
            stored.commitment.as_bytes(),
        );
        self.records.push(CompressedRecord {
            discriminator: NOTE_RECORD_DISCRIMINATOR,
            address,
            data: stored.encode(),
        });
        self.addresses.insert(address);
        self.commitments.insert(stored.commitment.0);
        leaf_index
    }

    fn nullifier_address(&self, nullifier: &Nullifier) -> [u8; 32] {
        derive_record_address(&self.program_id, NULLIFIER_RECORD_SEED, nullifier.as_bytes())
    }
}

/// Mock ledger executing the pool program's phase semantics in memory
pub struct MockLedger {
    state: Arc<Mutex<MockChainState>>,
}

impl MockLedger {
    pub fn new(state: Arc<Mutex<MockChainState>>) -> Self {
        Self { state }
    }

    /// Arm the failure hook for one phase (persists until cleared)
    pub fn fail_at(&self, phase: Phase, failure: MockFailure) {
        self.state.lock().expect("mock chain lock").fail_phase = Some((phase, failure));
    }

    /// Clear the failure hook
    pub fn clear_failure(&self) {
        self.state.lock().expect("mock chain lock").fail_phase = None;
    }

    fn apply_phase(
        state: &mut MockChainState,
        operation: &OperationId,
        phase: Phase,
        payload: &PhasePayload,
    ) -> Result<(), LedgerError> {
        // Phase 0 creates the record; everything else reads it.
        if phase == Phase::Open {
            let PhasePayload::Open(open) = payload else {
                return Err(LedgerError::Rejected("open phase needs open payload".into()));
            };
            if state.pending.contains_key(&operation.0) {
                return Err(LedgerError::Rejected("operation id already open".into()));
            }

            let flow = FlowKind::from_index(open.flow)
                .ok_or_else(|| LedgerError::Rejected("unknown flow".into()))?;
            let outputs = open
                .outputs
                .iter()
                .map(|bytes| CommitmentRecord::parse(bytes))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| LedgerError::Rejected(format!("bad output record: {e}")))?;

            state.pending.insert(
                operation.0,
                PendingOperation {
                    id: *operation,
                    flow,
                    proof: open.proof.clone(),
                    nullifiers: open.nullifiers.iter().copied().map(Nullifier).collect(),
                    input_commitments: open
                        .input_commitments
                        .iter()
                        .copied()
                        .map(Commitment)
                        .collect(),
                    outputs,
                    action: open.action.clone(),
                    confirmed: Some(Phase::Open),
                },
            );
            state.addresses.insert(derive_record_address(
                &state.program_id,
                OPERATION_RECORD_SEED,
                &operation.0,
            ));
            return Ok(());
        }

        let op = state
            .pending
            .get(&operation.0)
            .cloned()
            .ok_or_else(|| LedgerError::Rejected("operation not open".into()))?;

        // Strictly increasing phase order, per the operation's flow.
        if op.next_phase() != Some(phase) {
            return Err(LedgerError::Rejected(format!(
                "phase out of order: expected {:?}, got {phase}",
                op.next_phase()
            )));
        }

        match (phase, payload) {
            (Phase::VerifyInput, PhasePayload::VerifyInput(_)) => {
                for commitment in &op.input_commitments {
                    if !state.commitments.contains(&commitment.0) {
                        return Err(LedgerError::Rejected("commitment not found".into()));
                    }
                }
            }
            (Phase::CreateNullifiers, PhasePayload::CreateNullifiers(_)) => {
                // Check all before inserting any: the phase is atomic.
                let addresses: Vec<[u8; 32]> =
                    op.nullifiers.iter().map(|n| state.nullifier_address(n)).collect();
                for address in &addresses {
                    if state.addresses.contains(address) {
                        return Err(LedgerError::Rejected("nullifier already exists".into()));
                    }
                }
                for address in addresses {
                    state.addresses.insert(address);
                }
            }
            (Phase::Execute, PhasePayload::Execute) => {
                state.executed.push(op.action.clone());
            }
            (Phase::CreateOutputs, PhasePayload::CreateOutputs) => {
                for record in &op.outputs {
                    // The all-zero commitment is the reserved empty-slot
                    // sentinel; no record is created for it.
                    if record.commitment.0 == ZERO_COMMITMENT {
                        continue;
                    }
                    state.create_note_record(record);
                }
            }
            (Phase::Close, PhasePayload::Close) => {
                state.pending.remove(&operation.0);
                return Ok(());
            }
            _ => {
                return Err(LedgerError::Rejected(format!(
                    "payload does not match phase {phase}"
                )));
            }
        }

        if let Some(op) = state.pending.get_mut(&operation.0) {
            op.confirmed = Some(phase);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn latest_blockhash(&self) -> Result<Blockhash, LedgerError> {
        let mut state = self.state.lock().expect("mock chain lock");
        state.blockhash_counter += 1;
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&state.blockhash_counter.to_le_bytes());
        Ok(Blockhash(hash))
    }

    async fn submit_phase(
        &self,
        operation: &OperationId,
        phase: Phase,
        payload: &PhasePayload,
        _blockhash: &Blockhash,
    ) -> Result<TxSignature, LedgerError> {
        let mut state = self.state.lock().expect("mock chain lock");

        if let Some((fail_phase, failure)) = &state.fail_phase {
            if *fail_phase == phase {
                return Err(match failure {
                    MockFailure::Expired => LedgerError::Expired,
                    MockFailure::Rejected(reason) => LedgerError::Rejected(reason.clone()),
                    MockFailure::Unavailable => {
                        LedgerError::Unavailable("mock ledger offline".into())
                    }
                });
            }
        }

        Self::apply_phase(&mut state, operation, phase, payload)?;
        debug!(%operation, %phase, "mock phase applied");
        Ok(TxSignature(format!("mock_{operation}_{phase}")))
    }

    async fn confirm(&self, _signature: &TxSignature) -> Result<(), LedgerError> {
        // Mock submissions apply synchronously.
        Ok(())
    }

    async fn fetch_operation(
        &self,
        operation: &OperationId,
    ) -> Result<Option<PendingOperation>, LedgerError> {
        let state = self.state.lock().expect("mock chain lock");
        Ok(state.pending.get(&operation.0).cloned())
    }
}

// ============================================================================
// RPC Ledger
// ============================================================================

use solana_client::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};

/// RPC ledger configuration
#[derive(Debug, Clone)]
pub struct RpcLedgerConfig {
    /// RPC URL
    pub rpc_url: String,
    /// Pool program ID
    pub program_id: String,
    /// Confirmation commitment level
    pub commitment: CommitmentConfig,
}

impl Default for RpcLedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            program_id: "CxPooLk4vDq1yTfF2mJhq9XyBW7dq3jNCiLe9rQmGSaw".to_string(),
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

impl RpcLedgerConfig {
    pub fn from_config(cfg: &calyx_config::LedgerConfig) -> Self {
        Self {
            rpc_url: cfg.rpc_url.clone(),
            program_id: cfg.pool_program_id.clone(),
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

/// Ledger backend over a Solana-style RPC node
pub struct RpcLedger {
    rpc: RpcClient,
    payer: Arc<Keypair>,
    program_id: Pubkey,
}

impl RpcLedger {
    pub fn new(config: RpcLedgerConfig, payer: Keypair) -> anyhow::Result<Self> {
        let rpc = RpcClient::new_with_commitment(config.rpc_url.clone(), config.commitment);
        let program_id = Pubkey::from_str(&config.program_id)
            .map_err(|e| anyhow::anyhow!("invalid pool program ID: {e}"))?;
        Ok(Self {
            rpc,
            payer: Arc::new(payer),
            program_id,
        })
    }

    /// PDA holding one operation's pending record
    fn operation_pda(&self, operation: &OperationId) -> Pubkey {
        let (pda, _) =
            Pubkey::find_program_address(&[b"operation", &operation.0], &self.program_id);
        pda
    }

    fn classify(error: impl std::fmt::Display) -> LedgerError {
        let message = error.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("blockhash") {
            LedgerError::Expired
        } else if lowered.contains("custom program error")
            || lowered.contains("instructionerror")
            || lowered.contains("instruction error")
        {
            LedgerError::Rejected(message)
        } else {
            LedgerError::Unavailable(message)
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn latest_blockhash(&self) -> Result<Blockhash, LedgerError> {
        let hash = self.rpc.get_latest_blockhash().map_err(Self::classify)?;
        Ok(Blockhash(hash.to_bytes()))
    }

    async fn submit_phase(
        &self,
        operation: &OperationId,
        phase: Phase,
        payload: &PhasePayload,
        blockhash: &Blockhash,
    ) -> Result<TxSignature, LedgerError> {
        let mut data = Vec::with_capacity(64);
        data.push(phase.index());
        data.extend_from_slice(&operation.0);
        let encoded = wincode::serialize(payload)
            .map_err(|e| LedgerError::Rejected(format!("payload encoding failed: {e:?}")))?;
        data.extend_from_slice(&encoded);

        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new(self.operation_pda(operation), false),
            ],
            data,
        };

        let transaction = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&self.payer.pubkey()),
            &[self.payer.as_ref()],
            Hash::new_from_array(blockhash.0),
        );

        let signature = self
            .rpc
            .send_and_confirm_transaction(&transaction)
            .map_err(Self::classify)?;
        Ok(TxSignature(signature.to_string()))
    }

    async fn confirm(&self, signature: &TxSignature) -> Result<(), LedgerError> {
        let signature = Signature::from_str(&signature.0)
            .map_err(|e| LedgerError::Unavailable(format!("bad signature: {e}")))?;
        let confirmed = self
            .rpc
            .confirm_transaction(&signature)
            .map_err(Self::classify)?;
        if confirmed {
            Ok(())
        } else {
            Err(LedgerError::Unavailable("transaction not confirmed".into()))
        }
    }

    async fn fetch_operation(
        &self,
        operation: &OperationId,
    ) -> Result<Option<PendingOperation>, LedgerError> {
        let pda = self.operation_pda(operation);
        let data = match self.rpc.get_account_data(&pda) {
            Ok(data) => data,
            Err(e) => {
                let message = e.to_string();
                if message.to_lowercase().contains("accountnotfound")
                    || message.to_lowercase().contains("could not find account")
                {
                    return Ok(None);
                }
                return Err(Self::classify(e));
            }
        };

        let wire: PendingOperationWire = wincode::deserialize(&data)
            .map_err(|e| LedgerError::Unavailable(format!("bad operation record: {e:?}")))?;
        Ok(wire.into_pending())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::operation::{
        CreateNullifiersPayload, OpenPayload, VerifyInputPayload,
    };

    fn chain() -> (Arc<Mutex<MockChainState>>, MockLedger) {
        let state = Arc::new(Mutex::new(MockChainState::new([9u8; 32])));
        let ledger = MockLedger::new(state.clone());
        (state, ledger)
    }

    fn open_payload(flow: FlowKind, nullifiers: Vec<[u8; 32]>, inputs: Vec<[u8; 32]>) -> PhasePayload {
        PhasePayload::Open(OpenPayload {
            flow: flow.index(),
            proof: vec![0u8; 64],
            nullifiers,
            input_commitments: inputs,
            outputs: Vec::new(),
            action: ExecuteAction::None,
        })
    }

    #[tokio::test]
    async fn test_phase_order_enforced() {
        let (_state, ledger) = chain();
        let id = OperationId([1u8; 32]);
        let blockhash = ledger.latest_blockhash().await.unwrap();

        // CreateOutputs before Open must be rejected.
        let result = ledger
            .submit_phase(&id, Phase::CreateOutputs, &PhasePayload::CreateOutputs, &blockhash)
            .await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));

        ledger
            .submit_phase(
                &id,
                Phase::Open,
                &open_payload(FlowKind::Transfer, vec![[2u8; 32]], vec![[3u8; 32]]),
                &blockhash,
            )
            .await
            .unwrap();

        // Skipping VerifyInput must be rejected for a spending flow.
        let result = ledger
            .submit_phase(
                &id,
                Phase::CreateNullifiers,
                &PhasePayload::CreateNullifiers(CreateNullifiersPayload { proofs: vec![] }),
                &blockhash,
            )
            .await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_verify_input_requires_known_commitment() {
        let (_state, ledger) = chain();
        let id = OperationId([1u8; 32]);
        let blockhash = ledger.latest_blockhash().await.unwrap();

        ledger
            .submit_phase(
                &id,
                Phase::Open,
                &open_payload(FlowKind::Transfer, vec![[2u8; 32]], vec![[3u8; 32]]),
                &blockhash,
            )
            .await
            .unwrap();

        let result = ledger
            .submit_phase(
                &id,
                Phase::VerifyInput,
                &PhasePayload::VerifyInput(VerifyInputPayload { proofs: vec![] }),
                &blockhash,
            )
            .await;
        match result {
            Err(LedgerError::Rejected(reason)) => assert!(reason.contains("commitment not found")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_nullify_rejected() {
        let (state, ledger) = chain();
        let nullifier = [7u8; 32];

        // Pre-register the nullifier as if a prior spend created it.
        {
            let mut s = state.lock().unwrap();
            let address = s.nullifier_address(&Nullifier(nullifier));
            s.addresses.insert(address);
            s.commitments.insert([3u8; 32]);
        }

        let id = OperationId([1u8; 32]);
        let blockhash = ledger.latest_blockhash().await.unwrap();
        ledger
            .submit_phase(
                &id,
                Phase::Open,
                &open_payload(FlowKind::Transfer, vec![nullifier], vec![[3u8; 32]]),
                &blockhash,
            )
            .await
            .unwrap();
        ledger
            .submit_phase(
                &id,
                Phase::VerifyInput,
                &PhasePayload::VerifyInput(VerifyInputPayload { proofs: vec![] }),
                &blockhash,
            )
            .await
            .unwrap();

        let result = ledger
            .submit_phase(
                &id,
                Phase::CreateNullifiers,
                &PhasePayload::CreateNullifiers(CreateNullifiersPayload { proofs: vec![] }),
                &blockhash,
            )
            .await;
        match result {
            Err(LedgerError::Rejected(reason)) => {
                assert!(reason.contains("nullifier already exists"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blockhashes_are_fresh() {
        let (_state, ledger) = chain();
        let b1 = ledger.latest_blockhash().await.unwrap();
        let b2 = ledger.latest_blockhash().await.unwrap();
        assert_ne!(b1, b2);
    }
}
