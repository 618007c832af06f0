//! Note scanner.
//!
//! Reconstructs "what do I own and what is still spendable" from public,
//! encrypted, append-only ledger state, with no private index assistance:
//! fetch every program record, filter by type tag, trial-decrypt with the
//! viewing key, and classify each hit as spent/unspent by nullifier
//! lookup.
//!
//! This is a linear scan over *all* program records — cost grows with
//! total protocol usage, not with the caller's own note count. That is
//! the price of having no private index, and the primary scalability
//! caveat of the design.
//!
//! Decrypted notes are memoized by commitment so a refresh does not
//! re-attempt decryption of every record; spent/unspent status is always
//! re-queried. The cache must be invalidated (not refreshed) after any
//! operation that may have changed spendability — stale cached notes
//! otherwise scan as unspent and feed the next spend decision.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use calyx_shield::{
    Commitment, CommitmentRecord, ENCRYPTED_NOTE_OVERHEAD, NOTE_RECORD_DISCRIMINATOR, Note,
    Nullifier, NullifierKey, PoolContext, TokenId, ViewingKey, ZERO_COMMITMENT,
    record::COMMITMENT_RECORD_HEADER, try_decrypt_note,
};

use crate::error::EngineError;
use crate::indexer::{IndexerClient, NULLIFIER_RECORD_SEED, derive_record_address};

/// One of the caller's notes, as found on ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedNote {
    pub note: Note,
    pub commitment: Commitment,
    pub leaf_index: u64,
    /// Whether this note's nullifier is already on ledger
    pub spent: bool,
}

impl ScannedNote {
    /// The nullifier that spends (or spent) this note
    pub fn nullifier(&self, nk: &NullifierKey) -> Nullifier {
        nk.derive_nullifier(&self.commitment, self.leaf_index)
    }
}

/// The result of one full scan
#[derive(Debug, Clone, Default)]
pub struct NoteSet {
    pub notes: Vec<ScannedNote>,
}

impl NoteSet {
    /// All notes still spendable
    pub fn unspent(&self) -> impl Iterator<Item = &ScannedNote> {
        self.notes.iter().filter(|n| !n.spent)
    }

    /// Unspent notes of one token, smallest first
    pub fn unspent_for(&self, token: &TokenId) -> Vec<ScannedNote> {
        let mut notes: Vec<ScannedNote> = self
            .unspent()
            .filter(|n| &n.note.token_id == token)
            .cloned()
            .collect();
        notes.sort_by_key(|n| n.note.amount.as_u64());
        notes
    }

    /// Private balance for one token (sum of unspent amounts)
    pub fn balance(&self, token: &TokenId) -> u64 {
        self.unspent()
            .filter(|n| &n.note.token_id == token)
            .map(|n| n.note.amount.as_u64())
            .sum()
    }

    /// Private balance per token
    pub fn balances(&self) -> BTreeMap<TokenId, u64> {
        let mut balances = BTreeMap::new();
        for note in self.unspent() {
            *balances.entry(note.note.token_id).or_insert(0u64) += note.note.amount.as_u64();
        }
        balances
    }
}

/// Scans compressed ledger state for one wallet's notes
pub struct NoteScanner {
    indexer: Arc<dyn IndexerClient>,
    program_id: [u8; 32],
    viewing_key: ViewingKey,
    nullifier_key: NullifierKey,
    /// Decrypted notes memoized by commitment
    cache: HashMap<[u8; 32], Note>,
}

impl NoteScanner {
    pub fn new(
        indexer: Arc<dyn IndexerClient>,
        program_id: [u8; 32],
        viewing_key: ViewingKey,
        nullifier_key: NullifierKey,
    ) -> Self {
        Self {
            indexer,
            program_id,
            viewing_key,
            nullifier_key,
            cache: HashMap::new(),
        }
    }

    /// Drop every memoized decryption. Call after any operation that may
    /// have changed spendability, before the next spend decision.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    /// Memoized decryptions, for wallet-state snapshots
    pub fn cached_notes(&self) -> impl Iterator<Item = (&[u8; 32], &Note)> {
        self.cache.iter()
    }

    /// Seed the memo cache from a wallet-state snapshot. Only skips the
    /// decryption work — spent/unspent status is still re-queried on scan.
    pub fn preload(&mut self, commitment: [u8; 32], note: Note) {
        self.cache.insert(commitment, note);
    }

    /// Scan all program records, optionally restricted to one pool.
    ///
    /// Read-only and idempotent: scanning unchanged state twice yields the
    /// same set. A malformed record is skipped, never fatal; an indexer
    /// failure aborts the whole scan — partial results are never returned.
    pub async fn scan(&mut self, pool: Option<&PoolContext>) -> Result<NoteSet, EngineError> {
        let records = self
            .indexer
            .records_for_program(&self.program_id, pool)
            .await?;

        let mut notes = Vec::new();
        let mut skipped = 0usize;

        for record in &records {
            if record.discriminator != NOTE_RECORD_DISCRIMINATOR {
                continue;
            }
            // Too short to hold a well-formed encrypted note: an older or
            // foreign record format.
            if record.data.len() < COMMITMENT_RECORD_HEADER + ENCRYPTED_NOTE_OVERHEAD {
                skipped += 1;
                continue;
            }

            let parsed = match CommitmentRecord::parse(&record.data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(address = %hex::encode(&record.address[..8]), error = %e, "Skipping malformed record");
                    skipped += 1;
                    continue;
                }
            };

            if let Some(pool) = pool {
                if &parsed.pool_context != pool {
                    continue;
                }
            }
            if parsed.commitment.0 == ZERO_COMMITMENT {
                continue;
            }

            let note = match self.cache.get(&parsed.commitment.0) {
                Some(note) => note.clone(),
                None => {
                    match try_decrypt_note(
                        &parsed.encrypted_note,
                        &self.viewing_key,
                        parsed.pool_context,
                        &parsed.commitment,
                    ) {
                        Some((note, _memo)) => {
                            self.cache.insert(parsed.commitment.0, note.clone());
                            note
                        }
                        // Not ours — the expected outcome for almost every
                        // record on the ledger.
                        None => continue,
                    }
                }
            };

            let nullifier = self
                .nullifier_key
                .derive_nullifier(&parsed.commitment, parsed.leaf_index);
            let nullifier_address = derive_record_address(
                &self.program_id,
                NULLIFIER_RECORD_SEED,
                nullifier.as_bytes(),
            );
            let spent = self.indexer.record_exists(&nullifier_address).await?;

            notes.push(ScannedNote {
                note,
                commitment: parsed.commitment,
                leaf_index: parsed.leaf_index,
                spent,
            });
        }

        info!(
            records = records.len(),
            owned = notes.len(),
            unspent = notes.iter().filter(|n| !n.spent).count(),
            skipped,
            "Scan complete"
        );

        Ok(NoteSet { notes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{CompressedRecord, MockIndexer};
    use crate::ledger::MockChainState;
    use calyx_shield::{SpendingKey, seal_note};
    use rand::rngs::OsRng;
    use std::sync::Mutex;

    const PROGRAM: [u8; 32] = [9u8; 32];
    const TOKEN: TokenId = TokenId([1u8; 32]);
    const POOL: PoolContext = PoolContext([2u8; 32]);

    fn scanner_for(
        sk: &SpendingKey,
        state: Arc<Mutex<MockChainState>>,
    ) -> NoteScanner {
        NoteScanner::new(
            Arc::new(MockIndexer::new(state)),
            PROGRAM,
            sk.viewing_key(),
            sk.nullifier_key(),
        )
    }

    fn seed_note(state: &Arc<Mutex<MockChainState>>, sk: &SpendingKey, amount: u64) -> Commitment {
        let mut rng = OsRng;
        let sealed = seal_note(&sk.address(), TOKEN, amount, POOL, None, &mut rng).unwrap();
        let commitment = sealed.note.commitment();
        let record = CommitmentRecord {
            pool_context: POOL,
            commitment,
            leaf_index: 0,
            encrypted_note: sealed.payload,
        };
        state.lock().unwrap().create_note_record(&record);
        commitment
    }

    #[tokio::test]
    async fn test_scan_finds_own_notes_only() {
        let state = Arc::new(Mutex::new(MockChainState::new(PROGRAM)));
        let mut rng = OsRng;
        let me = SpendingKey::random(&mut rng);
        let other = SpendingKey::random(&mut rng);

        seed_note(&state, &me, 1000);
        seed_note(&state, &other, 5000);

        let mut scanner = scanner_for(&me, state);
        let set = scanner.scan(None).await.unwrap();

        assert_eq!(set.notes.len(), 1);
        assert_eq!(set.balance(&TOKEN), 1000);
    }

    #[tokio::test]
    async fn test_scan_idempotent() {
        let state = Arc::new(Mutex::new(MockChainState::new(PROGRAM)));
        let mut rng = OsRng;
        let me = SpendingKey::random(&mut rng);
        seed_note(&state, &me, 10);
        seed_note(&state, &me, 20);

        let mut scanner = scanner_for(&me, state);
        let first = scanner.scan(None).await.unwrap();
        let second = scanner.scan(None).await.unwrap();

        assert_eq!(first.notes, second.notes);
        assert_eq!(second.balance(&TOKEN), 30);
    }

    #[tokio::test]
    async fn test_malformed_record_skipped() {
        let state = Arc::new(Mutex::new(MockChainState::new(PROGRAM)));
        let mut rng = OsRng;
        let me = SpendingKey::random(&mut rng);
        seed_note(&state, &me, 1000);

        // A record with the right tag but garbage contents.
        state.lock().unwrap().records.push(CompressedRecord {
            discriminator: NOTE_RECORD_DISCRIMINATOR,
            address: [0xEE; 32],
            data: vec![0xAB; 200],
        });
        // And one with a foreign tag.
        state.lock().unwrap().records.push(CompressedRecord {
            discriminator: *b"somethin",
            address: [0xEF; 32],
            data: vec![0u8; 16],
        });

        let mut scanner = scanner_for(&me, state);
        let set = scanner.scan(None).await.unwrap();
        assert_eq!(set.notes.len(), 1, "malformed records must not abort the scan");
    }

    #[tokio::test]
    async fn test_indexer_failure_aborts_scan() {
        let state = Arc::new(Mutex::new(MockChainState::new(PROGRAM)));
        let mut rng = OsRng;
        let me = SpendingKey::random(&mut rng);
        seed_note(&state, &me, 1000);
        state.lock().unwrap().offline = true;

        let mut scanner = scanner_for(&me, state);
        let result = scanner.scan(None).await;
        assert!(matches!(result, Err(EngineError::IndexerUnavailable(_))));
    }

    #[tokio::test]
    async fn test_pool_filter() {
        let state = Arc::new(Mutex::new(MockChainState::new(PROGRAM)));
        let mut rng = OsRng;
        let me = SpendingKey::random(&mut rng);
        seed_note(&state, &me, 1000);

        let other_pool = PoolContext([0xCC; 32]);
        let mut scanner = scanner_for(&me, state);
        assert_eq!(scanner.scan(Some(&POOL)).await.unwrap().notes.len(), 1);
        assert_eq!(scanner.scan(Some(&other_pool)).await.unwrap().notes.len(), 0);
    }
}
