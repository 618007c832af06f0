//! Calyx Core
//!
//! Client-side engine for the Calyx shielded pool: reconstructs a
//! wallet's private note set from public encrypted ledger state, plans
//! note consolidation, and drives multi-phase shielded operations against
//! the host ledger, the compressed-state indexer, and the proving
//! service.
//!
//! Layering (no cycles):
//!
//! ```text
//! calyx-shield (primitives)
//!     ▲
//!     │
//! indexer / ledger / prover     (external-service boundaries + mocks)
//!     ▲
//!     │
//! scanner ──▶ consolidate       (note discovery, fragmentation planning)
//!     ▲
//!     │
//! orchestrator / voting         (phase machine, flow builders)
//!     ▲
//!     │
//! session                       (per-wallet locking, flow entry points)
//! ```

pub mod consolidate;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod orchestrator;
pub mod prover;
pub mod scanner;
pub mod session;
pub mod voting;

pub use consolidate::{ConsolidationConfig, ConsolidationPlan, ConsolidationPlanner, FragmentationReport};
pub use error::EngineError;
pub use indexer::{CompressedRecord, HttpIndexer, HttpIndexerConfig, IndexerClient, MockIndexer};
pub use ledger::{Blockhash, LedgerClient, MockChainState, MockLedger, RpcLedger, RpcLedgerConfig, TxSignature};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use orchestrator::flows::{FlowKind, OperationPlan};
pub use orchestrator::operation::{OperationId, OperationReceipt, PendingOperation, Phase};
pub use prover::{CircuitId, HttpProver, HttpProverConfig, MockProver, ProofBackend, WitnessMap, WitnessValue};
pub use scanner::{NoteScanner, NoteSet, ScannedNote};
pub use session::{ConsolidationOutcome, WalletSession, token_pool_context};
pub use voting::{Ballot, BallotConfig, BallotId, BindingMode};
