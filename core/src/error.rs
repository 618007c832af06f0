//! Engine error taxonomy.
//!
//! Four classes with different handling:
//! - cryptographic/input errors: fatal, never retried
//! - connectivity errors: retryable with backoff for read-only queries,
//!   surfaced (never silently retried) once a phase submission may have
//!   landed
//! - protocol rejections: fatal for the operation, structured so the
//!   caller can present exactly which check failed
//! - partial multi-phase failure: carries the operation id and the last
//!   confirmed phase so a recovery routine can resume or abandon

use thiserror::Error;

use calyx_shield::ShieldError;

use crate::orchestrator::operation::{OperationId, Phase};

/// Errors surfaced by the client engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad key material, malformed point, truncated ciphertext
    #[error(transparent)]
    Crypto(#[from] ShieldError),

    /// Indexer could not be reached or answered garbage
    #[error("indexer unavailable: {0}")]
    IndexerUnavailable(String),

    /// Ledger RPC could not be reached
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The proving subsystem reported failure (opaque, no partial output)
    #[error("proof generation failed: {0}")]
    ProofFailed(String),

    /// A phase ran out of blockhash-refresh attempts
    #[error("blockhash kept expiring while submitting phase {phase} of operation {operation}")]
    BlockhashExhausted {
        operation: OperationId,
        phase: Phase,
    },

    /// The ledger's program logic rejected a phase. Earlier phases stay on
    /// ledger; the pending operation is left open for inspection.
    #[error(
        "ledger rejected phase {phase} of operation {operation} \
         (last confirmed: {last_confirmed:?}): {reason}"
    )]
    PhaseRejected {
        operation: OperationId,
        phase: Phase,
        last_confirmed: Option<Phase>,
        reason: String,
    },

    /// Insufficient unspent balance for the requested amount
    #[error("insufficient balance for token {token}: have {have}, need {need}")]
    InsufficientBalance {
        token: String,
        have: u64,
        need: u64,
    },

    /// Covering the amount needs more input notes than the circuit accepts
    #[error(
        "balance too fragmented: covering {need} needs more than {max_inputs} notes; \
         consolidate first"
    )]
    TooFragmented { need: u64, max_inputs: usize },

    /// The ballot is outside its voting window
    #[error("ballot is not active")]
    BallotNotActive,

    /// A mutating operation is already in flight for this wallet/token
    #[error("an operation is already in flight for this wallet and token")]
    WalletBusy,

    /// No pending operation with this id exists on ledger
    #[error("operation {operation} not found on ledger")]
    OperationNotFound { operation: OperationId },

    /// A persisted wallet snapshot failed to decode
    #[error("wallet snapshot malformed")]
    BadSnapshot,

    /// Invariant violation inside the engine
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller may safely retry the same call.
    ///
    /// Only read-side connectivity failures qualify; a rejected or
    /// possibly-landed phase submission never does.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::IndexerUnavailable(_) | EngineError::LedgerUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::IndexerUnavailable("timeout".into()).is_retryable());
        assert!(!EngineError::BallotNotActive.is_retryable());
        assert!(
            !EngineError::PhaseRejected {
                operation: OperationId([1u8; 32]),
                phase: Phase::CreateNullifiers,
                last_confirmed: Some(Phase::VerifyInput),
                reason: "nullifier exists".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_phase_rejected_message_names_the_check() {
        let e = EngineError::PhaseRejected {
            operation: OperationId([0xAB; 32]),
            phase: Phase::CreateNullifiers,
            last_confirmed: Some(Phase::VerifyInput),
            reason: "nullifier already exists".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("nullifier already exists"));
        assert!(msg.contains("create-nullifiers"));
    }
}
