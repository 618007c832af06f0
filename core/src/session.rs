//! Wallet session.
//!
//! The single logical owner of one wallet's note set. Serializes mutating
//! operations per (wallet, token): the whole "scan → select notes → build
//! proof → submit phases" pipeline runs under a per-token lock, and a
//! concurrent attempt is rejected with `WalletBusy` rather than queued or
//! interleaved — two interleaved spends would select the same unspent
//! notes and race to nullify them. Operations on different tokens may run
//! concurrently.
//!
//! After any mutating operation the session invalidates the scanner cache;
//! the next scan re-reads ledger truth instead of trusting an optimistic
//! local mutation.

use dashmap::DashMap;
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use wincode::{SchemaRead, SchemaWrite};

use calyx_shield::{
    Note, NoteValue, PoolContext, ShieldedAddress, ShieldedKeyBundle, StealthPublicKey, TokenId,
};

use crate::consolidate::{ConsolidationPlan, ConsolidationPlanner};
use crate::error::EngineError;
use crate::indexer::IndexerClient;
use crate::ledger::LedgerClient;
use crate::orchestrator::flows::{
    build_merge_plan, build_shield_plan, build_transfer_plan, build_unshield_plan,
};
use crate::orchestrator::operation::{OperationId, OperationReceipt};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::prover::ProofBackend;
use crate::scanner::{NoteScanner, NoteSet, ScannedNote};
use crate::voting::{
    Ballot, build_ballot_plan, build_change_vote_plan, build_claim_plan,
    build_close_position_plan, build_vote_plan,
};

/// The pool context a token's ordinary notes live in
pub fn token_pool_context(token: &TokenId) -> PoolContext {
    let mut hasher = blake3::Hasher::new_derive_key("calyx/token-pool/v1");
    hasher.update(&token.0);
    PoolContext(*hasher.finalize().as_bytes())
}

/// Result of a consolidation run
#[derive(Debug)]
pub struct ConsolidationOutcome {
    /// Merge rounds executed
    pub rounds: u32,
    /// One receipt per executed merge batch
    pub receipts: Vec<OperationReceipt>,
    /// Unspent note count for the token after the final rescan
    pub final_note_count: usize,
}

/// Versioned wallet-state snapshot (opaque bytes to the caller)
#[derive(Debug, Clone, PartialEq, SchemaRead, SchemaWrite)]
struct WalletSnapshot {
    version: u8,
    spending_key: [u8; 32],
    notes: Vec<CachedNoteWire>,
}

#[derive(Debug, Clone, PartialEq, SchemaRead, SchemaWrite)]
struct CachedNoteWire {
    commitment: [u8; 32],
    owner: [u8; 32],
    token: [u8; 32],
    amount: u64,
    randomness: [u8; 32],
    context: [u8; 32],
}

const SNAPSHOT_VERSION: u8 = 1;

/// One wallet's view of the shielded pool
pub struct WalletSession {
    keys: ShieldedKeyBundle,
    orchestrator: Orchestrator,
    scanner: tokio::sync::Mutex<NoteScanner>,
    /// Per-token operation locks
    locks: DashMap<TokenId, Arc<tokio::sync::Mutex<()>>>,
    planner: ConsolidationPlanner,
}

impl WalletSession {
    pub fn new(
        keys: ShieldedKeyBundle,
        ledger: Arc<dyn LedgerClient>,
        indexer: Arc<dyn IndexerClient>,
        prover: Arc<dyn ProofBackend>,
        program_id: [u8; 32],
        orchestrator_config: OrchestratorConfig,
        planner: ConsolidationPlanner,
    ) -> Self {
        let scanner = NoteScanner::new(
            Arc::clone(&indexer),
            program_id,
            keys.viewing_key.clone(),
            keys.nullifier_key.clone(),
        );
        let orchestrator = Orchestrator::new(ledger, indexer, prover, program_id, orchestrator_config);

        Self {
            keys,
            orchestrator,
            scanner: tokio::sync::Mutex::new(scanner),
            locks: DashMap::new(),
            planner,
        }
    }

    /// This wallet's public shielded address
    pub fn address(&self) -> ShieldedAddress {
        self.keys.address
    }

    /// Scan the ledger for this wallet's notes. `fresh` drops the
    /// decryption cache first — required after anything that may have
    /// changed spendability.
    pub async fn scan(&self, fresh: bool) -> Result<NoteSet, EngineError> {
        let mut scanner = self.scanner.lock().await;
        if fresh {
            scanner.invalidate();
        }
        scanner.scan(None).await
    }

    /// Scan restricted to one pool context
    pub async fn scan_pool(&self, pool: &PoolContext, fresh: bool) -> Result<NoteSet, EngineError> {
        let mut scanner = self.scanner.lock().await;
        if fresh {
            scanner.invalidate();
        }
        scanner.scan(Some(pool)).await
    }

    /// Private balance for one token
    pub async fn balance(&self, token: &TokenId) -> Result<u64, EngineError> {
        Ok(self.scan(false).await?.balance(token))
    }

    // ------------------------------------------------------------------
    // Flows
    // ------------------------------------------------------------------

    /// Shield public funds into a fresh note
    pub async fn shield(&self, token: TokenId, amount: u64) -> Result<OperationReceipt, EngineError> {
        let _guard = self.try_lock(token)?;
        let plan = build_shield_plan(
            &self.keys.address,
            token,
            amount,
            token_pool_context(&token),
            &mut OsRng,
        )?;
        self.run(plan).await
    }

    /// Transfer shielded value to another shielded address
    pub async fn transfer(
        &self,
        recipient: &ShieldedAddress,
        token: TokenId,
        amount: u64,
    ) -> Result<OperationReceipt, EngineError> {
        let _guard = self.try_lock(token)?;
        let inputs = self.select_inputs(&token, amount).await?;
        let nullifiers = inputs
            .iter()
            .map(|n| n.nullifier(&self.keys.nullifier_key))
            .collect();

        let plan = build_transfer_plan(
            &inputs,
            nullifiers,
            recipient,
            &self.keys.address,
            token,
            amount,
            token_pool_context(&token),
            &mut OsRng,
        )?;
        self.run(plan).await
    }

    /// Unshield value to a public ledger account
    pub async fn unshield(
        &self,
        token: TokenId,
        amount: u64,
        public_recipient: [u8; 32],
    ) -> Result<OperationReceipt, EngineError> {
        let _guard = self.try_lock(token)?;
        let inputs = self.select_inputs(&token, amount).await?;
        let nullifiers = inputs
            .iter()
            .map(|n| n.nullifier(&self.keys.nullifier_key))
            .collect();

        let plan = build_unshield_plan(
            &inputs,
            nullifiers,
            &self.keys.address,
            token,
            amount,
            public_recipient,
            token_pool_context(&token),
            &mut OsRng,
        )?;
        self.run(plan).await
    }

    /// Merge small notes until the balance fits one spend (or the target
    /// is reachable within the circuit's input limit).
    ///
    /// Re-scans after every executed batch: the unspent set changed, so
    /// the pre-batch note list is stale by construction.
    pub async fn consolidate(
        &self,
        token: TokenId,
        target: Option<u64>,
    ) -> Result<ConsolidationOutcome, EngineError> {
        let _guard = self.try_lock(token)?;
        let pool = token_pool_context(&token);
        let mut receipts = Vec::new();
        let mut rounds = 0u32;

        loop {
            let notes = self.scan(true).await?;
            let unspent: Vec<ScannedNote> = notes
                .unspent_for(&token)
                .into_iter()
                .filter(|n| n.note.context == pool)
                .collect();

            match self.planner.plan(&unspent, target) {
                ConsolidationPlan::InsufficientBalance { have, need } => {
                    return Err(EngineError::InsufficientBalance {
                        token: hex::encode(token.0),
                        have,
                        need,
                    });
                }
                ConsolidationPlan::AlreadySpendable => {
                    info!(rounds, "Consolidation complete");
                    return Ok(ConsolidationOutcome {
                        rounds,
                        receipts,
                        final_note_count: unspent.len(),
                    });
                }
                ConsolidationPlan::Merge { batches } => {
                    if rounds >= self.planner.config().iteration_cap {
                        warn!(rounds, "Consolidation iteration cap reached");
                        return Ok(ConsolidationOutcome {
                            rounds,
                            receipts,
                            final_note_count: unspent.len(),
                        });
                    }

                    // Execute only the first batch, then rescan: later
                    // batches were planned against a note set this merge
                    // just changed.
                    let batch = &batches[0];
                    let nullifiers = batch
                        .iter()
                        .map(|n| n.nullifier(&self.keys.nullifier_key))
                        .collect();
                    let plan = build_merge_plan(
                        batch,
                        nullifiers,
                        &self.keys.address,
                        token,
                        pool,
                        &mut OsRng,
                    )?;
                    let receipt = self.run(plan).await?;
                    receipts.push(receipt);
                    rounds += 1;
                }
            }
        }
    }

    /// Create a ballot
    pub async fn create_ballot(&self, ballot: &Ballot) -> Result<OperationReceipt, EngineError> {
        let plan = build_ballot_plan(ballot);
        self.run(plan).await
    }

    /// Vote `weight` of `token` for `option`
    pub async fn vote(
        &self,
        ballot: &Ballot,
        option: u32,
        token: TokenId,
        weight: u64,
    ) -> Result<OperationReceipt, EngineError> {
        let _guard = self.try_lock(token)?;
        let inputs = self.select_inputs(&token, weight).await?;
        let plan = build_vote_plan(
            ballot,
            option,
            weight,
            &inputs,
            &self.keys.nullifier_key,
            &self.keys.address,
            token,
            unix_now(),
            &mut OsRng,
        )?;
        self.run(plan).await
    }

    /// Move a position's weight to a different option
    pub async fn change_vote(
        &self,
        ballot: &Ballot,
        position: &ScannedNote,
        old_option: u32,
        new_option: u32,
    ) -> Result<OperationReceipt, EngineError> {
        let _guard = self.try_lock(position.note.token_id)?;
        let plan = build_change_vote_plan(
            ballot,
            position,
            old_option,
            new_option,
            &self.keys.nullifier_key,
            &self.keys.address,
            unix_now(),
            &mut OsRng,
        )?;
        self.run(plan).await
    }

    /// Close a position, cancelling its tally contribution and refunding
    /// the locked value
    pub async fn close_position(
        &self,
        ballot: &Ballot,
        position: &ScannedNote,
        option: u32,
    ) -> Result<OperationReceipt, EngineError> {
        let token = position.note.token_id;
        let _guard = self.try_lock(token)?;
        let plan = build_close_position_plan(
            ballot,
            position,
            option,
            &self.keys.nullifier_key,
            &self.keys.address,
            token_pool_context(&token),
            &mut OsRng,
        )?;
        self.run(plan).await
    }

    /// Claim a settled position's payout into a spendable note
    pub async fn claim(
        &self,
        ballot: &Ballot,
        position: &ScannedNote,
        payout_amount: u64,
    ) -> Result<OperationReceipt, EngineError> {
        let token = position.note.token_id;
        let _guard = self.try_lock(token)?;
        let plan = build_claim_plan(
            ballot,
            position,
            payout_amount,
            &self.keys.nullifier_key,
            &self.keys.address,
            token_pool_context(&token),
            &mut OsRng,
        )?;
        self.run(plan).await
    }

    /// Resume a partially executed operation from its on-ledger state
    pub async fn resume(&self, operation: OperationId) -> Result<OperationReceipt, EngineError> {
        let receipt = self.orchestrator.resume(operation).await;
        self.invalidate_cache().await;
        receipt
    }

    // ------------------------------------------------------------------
    // Wallet-state snapshot (opaque bytes for the calling application)
    // ------------------------------------------------------------------

    /// Export the spending key and decrypted-note cache as opaque bytes
    pub async fn export_state(&self) -> Result<Vec<u8>, EngineError> {
        let scanner = self.scanner.lock().await;
        let notes = scanner
            .cached_notes()
            .map(|(commitment, note)| CachedNoteWire {
                commitment: *commitment,
                owner: note.owner.to_bytes(),
                token: note.token_id.0,
                amount: note.amount.as_u64(),
                randomness: note.randomness,
                context: note.context.0,
            })
            .collect();

        let snapshot = WalletSnapshot {
            version: SNAPSHOT_VERSION,
            spending_key: *self.keys.spending_key.as_bytes(),
            notes,
        };
        wincode::serialize(&snapshot).map_err(|_| EngineError::BadSnapshot)
    }

    /// Restore a session's decryption cache from exported bytes. The
    /// snapshot's spending key must match this session's.
    pub async fn import_state(&self, bytes: &[u8]) -> Result<usize, EngineError> {
        let snapshot: WalletSnapshot =
            wincode::deserialize(bytes).map_err(|_| EngineError::BadSnapshot)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::BadSnapshot);
        }
        if &snapshot.spending_key != self.keys.spending_key.as_bytes() {
            return Err(EngineError::BadSnapshot);
        }

        let mut scanner = self.scanner.lock().await;
        let mut loaded = 0usize;
        for wire in snapshot.notes {
            let owner = StealthPublicKey::from_bytes(&wire.owner)?;
            let note = Note {
                owner,
                token_id: TokenId(wire.token),
                amount: NoteValue::new(wire.amount),
                randomness: wire.randomness,
                context: PoolContext(wire.context),
            };
            // Distrust snapshots the same way we distrust the wire.
            if note.commitment().0 != wire.commitment {
                return Err(EngineError::BadSnapshot);
            }
            scanner.preload(wire.commitment, note);
            loaded += 1;
        }
        Ok(loaded)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Acquire the per-token operation lock, rejecting concurrency
    fn try_lock(
        &self,
        token: TokenId,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, EngineError> {
        let lock = self
            .locks
            .entry(token)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.try_lock_owned().map_err(|_| EngineError::WalletBusy)
    }

    /// Execute a plan and invalidate the note cache regardless of outcome
    async fn run(
        &self,
        plan: crate::orchestrator::flows::OperationPlan,
    ) -> Result<OperationReceipt, EngineError> {
        let result = self.orchestrator.execute(plan).await;
        // Even a failed operation may have landed phases; only a fresh
        // scan can say what is still spendable.
        self.invalidate_cache().await;
        result
    }

    async fn invalidate_cache(&self) {
        self.scanner.lock().await.invalidate();
    }

    /// Select unspent inputs covering `amount`, fewest notes first.
    ///
    /// Only notes in the token's main pool qualify — ballot positions
    /// carry the same token id but live in their ballot's context and are
    /// consumed by the vote flows, never by ordinary spends.
    async fn select_inputs(
        &self,
        token: &TokenId,
        amount: u64,
    ) -> Result<Vec<ScannedNote>, EngineError> {
        if amount == 0 {
            return Err(EngineError::Internal("amount must be positive".into()));
        }

        let pool = token_pool_context(token);
        let notes = self.scan(true).await?;
        let mut unspent: Vec<ScannedNote> = notes
            .unspent_for(token)
            .into_iter()
            .filter(|n| n.note.context == pool)
            .collect();
        let total: u64 = unspent.iter().map(|n| n.note.amount.as_u64()).sum();
        if total < amount {
            return Err(EngineError::InsufficientBalance {
                token: hex::encode(token.0),
                have: total,
                need: amount,
            });
        }

        // Largest first keeps the input count minimal.
        unspent.reverse();
        let mut selected = Vec::new();
        let mut sum = 0u64;
        for note in unspent {
            sum += note.note.amount.as_u64();
            selected.push(note);
            if sum >= amount {
                break;
            }
        }

        let max_inputs = self.planner.config().max_input_notes;
        if selected.len() > max_inputs {
            return Err(EngineError::TooFragmented {
                need: amount,
                max_inputs,
            });
        }
        Ok(selected)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
