//! Multi-Phase Transaction Orchestrator
//!
//! One logical state transition — "nullify note A, create notes B and C,
//! move a vault balance" — cannot fit in a single ledger transaction once
//! a zero-knowledge proof, indexer inclusion proofs, and a value transfer
//! all have to be authorized together. The pool program therefore exposes
//! each step as its own instruction against a pending-operation record,
//! and this orchestrator drives them as a saga:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      Multi-Phase Orchestrator                        │
//! │                                                                      │
//! │  ┌────────┐   ┌─────────────┐   ┌───────────────┐   ┌────────────┐   │
//! │  │  Open  │──▶│ VerifyInput │──▶│ CreateNullif. │──▶│  Execute   │   │
//! │  │ (proof)│   │ (inclusion) │   │(non-inclusion)│   │ (effect)   │   │
//! │  └────────┘   └─────────────┘   └───────────────┘   └────────────┘   │
//! │                                                          │           │
//! │                              ┌───────────────┐   ┌───────▼────────┐  │
//! │                              │     Close     │◀──│ CreateOutputs  │  │
//! │                              │ (free record) │   │ (new notes)    │  │
//! │                              └───────────────┘   └────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Phase k+1 is submitted only after phase k is confirmed — its
//! instruction reads phase k's committed state from the pending record.
//! There is no rollback: a rejected phase leaves earlier phases on ledger
//! (reverting a nullifier would reopen a double-spend window) and the
//! pending record open for inspection; `resume` continues from on-ledger
//! truth.

pub mod flows;
pub mod operation;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use calyx_shield::ZERO_COMMITMENT;

use crate::error::EngineError;
use crate::indexer::{IndexerClient, NULLIFIER_RECORD_SEED, derive_record_address};
use crate::ledger::{LedgerClient, LedgerError, TxSignature};
use crate::prover::ProofBackend;

use self::flows::OperationPlan;
use self::operation::{
    CreateNullifiersPayload, InclusionProofWire, NonInclusionProofWire, OperationId,
    OperationReceipt, PendingOperation, Phase, PhasePayload, VerifyInputPayload,
};

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wait before re-querying the indexer for state a just-confirmed
    /// phase should have produced. Tolerates indexer lag behind the
    /// ledger; this is a tunable, not a correctness guarantee — the
    /// ledger's own checks stay authoritative.
    pub settle_delay: Duration,
    /// Indexer proof-query attempts per phase
    pub proof_query_retries: u32,
    /// Blockhash refreshes allowed per phase submission
    pub max_blockhash_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1_500),
            proof_query_retries: 3,
            max_blockhash_retries: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_config(cfg: &calyx_config::CalyxConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(cfg.engine.settle_delay_ms),
            proof_query_retries: cfg.indexer.max_read_retries,
            max_blockhash_retries: cfg.ledger.max_blockhash_retries,
        }
    }
}

/// Drives multi-phase operations against the ledger, indexer and prover
pub struct Orchestrator {
    ledger: Arc<dyn LedgerClient>,
    indexer: Arc<dyn IndexerClient>,
    prover: Arc<dyn ProofBackend>,
    program_id: [u8; 32],
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        indexer: Arc<dyn IndexerClient>,
        prover: Arc<dyn ProofBackend>,
        program_id: [u8; 32],
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            indexer,
            prover,
            program_id,
            config,
        }
    }

    /// Prove and execute a planned operation, phase by phase.
    ///
    /// On a phase rejection the error carries the operation id and the
    /// last confirmed phase; the pending record stays open on ledger and
    /// [`Orchestrator::resume`] can pick it up later.
    pub async fn execute(&self, plan: OperationPlan) -> Result<OperationReceipt, EngineError> {
        let id = OperationId::random(&mut rand::thread_rng());
        let proof = self.prove(&plan).await?;

        let pending = PendingOperation {
            id,
            flow: plan.flow,
            proof,
            nullifiers: plan.nullifiers,
            input_commitments: plan.input_commitments,
            outputs: plan.outputs,
            action: plan.action,
            confirmed: None,
        };

        info!(operation = %id, flow = ?pending.flow, "Opening multi-phase operation");
        self.drive(pending).await
    }

    /// Resume a partially executed operation from its on-ledger state.
    ///
    /// The pending record is authoritative: whatever phases it shows as
    /// confirmed are skipped, the rest are driven to completion.
    pub async fn resume(&self, operation: OperationId) -> Result<OperationReceipt, EngineError> {
        let pending = self
            .ledger
            .fetch_operation(&operation)
            .await
            .map_err(read_error)?
            .ok_or(EngineError::OperationNotFound { operation })?;

        info!(
            operation = %operation,
            confirmed = ?pending.confirmed,
            "Resuming operation from on-ledger state"
        );
        self.drive(pending).await
    }

    async fn prove(&self, plan: &OperationPlan) -> Result<Vec<u8>, EngineError> {
        let prover = Arc::clone(&self.prover);
        let circuit = plan.circuit.clone();
        let witness = plan.witness.clone();

        // Proving is long-running and CPU-bound; keep it off the runtime.
        tokio::task::spawn_blocking(move || prover.prove(&circuit, &witness))
            .await
            .map_err(|e| EngineError::Internal(format!("prover task panicked: {e}")))?
            .map_err(|e| EngineError::ProofFailed(e.to_string()))
    }

    async fn drive(&self, mut pending: PendingOperation) -> Result<OperationReceipt, EngineError> {
        let mut receipt = OperationReceipt {
            operation: pending.id,
            flow: pending.flow,
            phases: Vec::new(),
            nullifiers: pending.nullifiers.clone(),
            new_commitments: pending
                .outputs
                .iter()
                .map(|o| o.commitment)
                .filter(|c| c.0 != ZERO_COMMITMENT)
                .collect(),
        };

        while let Some(phase) = pending.next_phase() {
            let payload = self.build_payload(&pending, phase).await?;
            let signature = self.submit_with_freshness(&pending, phase, &payload).await?;

            pending.confirmed = Some(phase);
            info!(operation = %pending.id, %phase, %signature, "Phase confirmed");
            receipt.phases.push((phase, signature.0));
        }

        Ok(receipt)
    }

    async fn build_payload(
        &self,
        pending: &PendingOperation,
        phase: Phase,
    ) -> Result<PhasePayload, EngineError> {
        match phase {
            Phase::Open => Ok(PhasePayload::Open(pending.open_payload())),
            Phase::VerifyInput => {
                let mut proofs = Vec::with_capacity(pending.input_commitments.len());
                for commitment in &pending.input_commitments {
                    let proof = self
                        .with_settle_retry(|| self.indexer.inclusion_proof(&commitment.0))
                        .await?;
                    proofs.push(InclusionProofWire {
                        root: proof.root,
                        leaf_index: proof.leaf_index,
                        siblings: proof.siblings,
                    });
                }
                Ok(PhasePayload::VerifyInput(VerifyInputPayload { proofs }))
            }
            Phase::CreateNullifiers => {
                let mut proofs = Vec::with_capacity(pending.nullifiers.len());
                for nullifier in &pending.nullifiers {
                    let address = derive_record_address(
                        &self.program_id,
                        NULLIFIER_RECORD_SEED,
                        nullifier.as_bytes(),
                    );
                    let proof = self
                        .with_settle_retry(|| self.indexer.non_inclusion_proof(&address))
                        .await?;
                    proofs.push(NonInclusionProofWire {
                        root: proof.root,
                        low_leaf_index: proof.low_leaf_index,
                        siblings: proof.siblings,
                    });
                }
                Ok(PhasePayload::CreateNullifiers(CreateNullifiersPayload {
                    proofs,
                }))
            }
            Phase::Execute => Ok(PhasePayload::Execute),
            Phase::CreateOutputs => Ok(PhasePayload::CreateOutputs),
            Phase::Close => Ok(PhasePayload::Close),
        }
    }

    /// Indexer proof queries retried across the settle delay: the indexer
    /// may briefly lag the ledger state a just-confirmed phase produced.
    async fn with_settle_retry<T, F, Fut>(&self, query: F) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>>,
    {
        let mut last = None;
        for attempt in 0..=self.config.proof_query_retries {
            if attempt > 0 {
                warn!(attempt, "Indexer proof query lagging, retrying after settle delay");
                tokio::time::sleep(self.config.settle_delay).await;
            }
            match query().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => last = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| EngineError::Internal("settle retry underflow".into())))
    }

    /// Submit one phase under the freshness model: fetch a blockhash
    /// immediately before submission, resubmit only on expiry, and never
    /// auto-retry a submission that may have landed.
    async fn submit_with_freshness(
        &self,
        pending: &PendingOperation,
        phase: Phase,
        payload: &PhasePayload,
    ) -> Result<TxSignature, EngineError> {
        for attempt in 0..=self.config.max_blockhash_retries {
            let blockhash = self.ledger.latest_blockhash().await.map_err(read_error)?;

            match self
                .ledger
                .submit_phase(&pending.id, phase, payload, &blockhash)
                .await
            {
                Ok(signature) => {
                    match self.ledger.confirm(&signature).await {
                        Ok(()) => return Ok(signature),
                        Err(LedgerError::Rejected(reason)) => {
                            return Err(EngineError::PhaseRejected {
                                operation: pending.id,
                                phase,
                                last_confirmed: pending.confirmed,
                                reason,
                            });
                        }
                        Err(e) => {
                            // The transaction may still land; surface so the
                            // caller can inspect on-ledger state first.
                            return Err(EngineError::LedgerUnavailable(format!(
                                "confirmation of phase {phase} failed: {e}"
                            )));
                        }
                    }
                }
                Err(LedgerError::Expired) => {
                    warn!(
                        operation = %pending.id,
                        %phase,
                        attempt,
                        "Blockhash expired, rebuilding phase submission"
                    );
                    continue;
                }
                Err(LedgerError::Rejected(reason)) => {
                    return Err(EngineError::PhaseRejected {
                        operation: pending.id,
                        phase,
                        last_confirmed: pending.confirmed,
                        reason,
                    });
                }
                Err(LedgerError::Unavailable(message)) => {
                    return Err(EngineError::LedgerUnavailable(format!(
                        "phase {phase} submission: {message}; \
                         check on-ledger state before resubmitting"
                    )));
                }
            }
        }

        Err(EngineError::BlockhashExhausted {
            operation: pending.id,
            phase,
        })
    }
}

fn read_error(e: LedgerError) -> EngineError {
    EngineError::LedgerUnavailable(e.to_string())
}
