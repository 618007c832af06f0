//! Calyx Shield SDK
//!
//! Note-based privacy primitives for the Calyx shielded pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Shielded Operation                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │  Nullifiers  │  │ Commitments  │  │   Encrypted Outputs   │  │
//! │  │  (spent)     │  │  (new notes) │  │   (for recipients)    │  │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘  │
//! │         │                 │                     │               │
//! │         ▼                 ▼                     ▼               │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                   ZK Proof (external)                    │   │
//! │  │  • Valid nullifier derivation                            │   │
//! │  │  • Valid commitment structure                            │   │
//! │  │  • Balance preservation: Σ inputs = Σ outputs            │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every hash in this crate must reproduce, bit for bit, the function the
//! proof circuit enforces: same Poseidon parameters, same domain tags, same
//! field encoding of every input. The wire layouts in [`record`] likewise
//! must match the deployed ledger/indexer pair exactly.

pub mod commitment;
pub mod encryption;
pub mod error;
pub mod field;
pub mod keys;
pub mod note;
pub mod nullifier;
pub mod poseidon;
pub mod record;
pub mod stealth;
pub mod tally;

pub use commitment::{Commitment, CommitmentScheme};
pub use encryption::{SealedNote, seal_note, try_decrypt_note};
pub use error::ShieldError;
pub use keys::{ShieldedAddress, ShieldedKeyBundle, SpendingKey, ViewingKey};
pub use note::{Note, NoteValue, PoolContext, TokenId};
pub use nullifier::{Nullifier, NullifierKey};
pub use record::{
    CommitmentRecord, ENCRYPTED_NOTE_OVERHEAD, EncryptedNotePayload, NOTE_RECORD_DISCRIMINATOR,
    ZERO_COMMITMENT,
};
pub use stealth::{StealthAddress, StealthPublicKey};
pub use tally::{TallyCiphertext, TallyKeypair, TallyPublicKey};
