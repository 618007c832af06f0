//! Note consolidation planning.
//!
//! The spend circuit accepts a bounded number of input notes, so a
//! fragmented balance (many small notes) can make a spend impossible until
//! small notes are merged. The planner is pure: it scores fragmentation
//! and partitions notes into merge batches. The merge *loop* lives in
//! [`crate::session::WalletSession::consolidate`], because every executed
//! batch changes the unspent set and the planner's input must come from a
//! fresh scan, never from the pre-batch list.

use serde::{Deserialize, Serialize};

use crate::scanner::ScannedNote;

/// Planner tunables
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Amounts at or below this count as dust
    pub dust_threshold: u64,
    /// Maximum input notes the spend circuit accepts
    pub max_input_notes: usize,
    /// Note count per token above which consolidation is recommended
    pub max_notes_per_token: usize,
    /// Safety cap on merge rounds
    pub iteration_cap: u32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            dust_threshold: 1_000,
            max_input_notes: 3,
            max_notes_per_token: 16,
            iteration_cap: 16,
        }
    }
}

impl ConsolidationConfig {
    pub fn from_config(cfg: &calyx_config::EngineConfig) -> Self {
        Self {
            dust_threshold: cfg.dust_threshold,
            max_input_notes: cfg.max_input_notes,
            max_notes_per_token: cfg.max_notes_per_token,
            iteration_cap: cfg.consolidation_iteration_cap,
        }
    }
}

/// How fragmented one token's balance is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentationReport {
    /// Unspent notes held
    pub note_count: usize,
    /// Notes at or below the dust threshold
    pub dust_count: usize,
    /// Largest amount spendable in a single operation (sum of the biggest
    /// `max_input_notes` notes)
    pub max_single_spend: u64,
    /// 0.0 = consolidated, grows past 1.0 as the wallet fragments
    pub score: f64,
    pub needs_consolidation: bool,
}

/// What the planner decided
#[derive(Debug, Clone, PartialEq)]
pub enum ConsolidationPlan {
    /// The whole balance cannot cover the target
    InsufficientBalance { have: u64, need: u64 },
    /// The target (or the whole balance) already fits the input limit
    AlreadySpendable,
    /// Merge these batches, smallest notes first
    Merge { batches: Vec<Vec<ScannedNote>> },
}

/// Pure fragmentation analysis and batch planning
pub struct ConsolidationPlanner {
    config: ConsolidationConfig,
}

impl ConsolidationPlanner {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Score fragmentation of one token's unspent notes
    pub fn report(&self, unspent: &[ScannedNote]) -> FragmentationReport {
        let note_count = unspent.len();
        let dust_count = unspent
            .iter()
            .filter(|n| n.note.amount.as_u64() <= self.config.dust_threshold)
            .count();

        let mut amounts: Vec<u64> = unspent.iter().map(|n| n.note.amount.as_u64()).collect();
        amounts.sort_unstable_by(|a, b| b.cmp(a));
        let max_single_spend = amounts.iter().take(self.config.max_input_notes).sum();

        let count_ratio = note_count as f64 / self.config.max_notes_per_token as f64;
        let dust_ratio = if note_count == 0 {
            0.0
        } else {
            dust_count as f64 / note_count as f64
        };
        let score = 0.5 * count_ratio + 0.5 * dust_ratio;

        FragmentationReport {
            note_count,
            dust_count,
            max_single_spend,
            score,
            needs_consolidation: note_count > self.config.max_notes_per_token
                || note_count > self.config.max_input_notes && dust_count > 0,
        }
    }

    /// Plan merge batches for one token's unspent notes.
    ///
    /// With a target, selects the smallest notes whose running sum first
    /// reaches it; if that selection already fits the circuit's input
    /// limit the plan stops early — no proofs, no transactions. Without a
    /// target, batches the globally smallest notes until the whole balance
    /// fits one spend.
    pub fn plan(&self, unspent: &[ScannedNote], target: Option<u64>) -> ConsolidationPlan {
        let mut sorted: Vec<ScannedNote> = unspent.to_vec();
        sorted.sort_by_key(|n| n.note.amount.as_u64());

        let selection: Vec<ScannedNote> = match target {
            Some(target) => {
                let total: u64 = sorted.iter().map(|n| n.note.amount.as_u64()).sum();
                if total < target {
                    return ConsolidationPlan::InsufficientBalance {
                        have: total,
                        need: target,
                    };
                }

                let mut sum = 0u64;
                let mut selection = Vec::new();
                for note in &sorted {
                    sum += note.note.amount.as_u64();
                    selection.push(note.clone());
                    if sum >= target {
                        break;
                    }
                }
                selection
            }
            None => sorted,
        };

        if selection.len() <= self.config.max_input_notes {
            return ConsolidationPlan::AlreadySpendable;
        }

        let batches: Vec<Vec<ScannedNote>> = selection
            .chunks(self.config.max_input_notes)
            .filter(|chunk| chunk.len() >= 2) // merging one note is a no-op
            .map(|chunk| chunk.to_vec())
            .collect();

        if batches.is_empty() {
            return ConsolidationPlan::AlreadySpendable;
        }

        ConsolidationPlan::Merge { batches }
    }
}
