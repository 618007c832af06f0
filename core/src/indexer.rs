//! Compressed-state indexer boundary.
//!
//! The indexer maintains a queryable, proof-generating view of the
//! ledger's compressed records. Everything here is read-only: the engine
//! never mutates indexer state directly, only via ledger transactions the
//! indexer subsequently reflects.
//!
//! Read queries are retried with exponential backoff — they are
//! side-effect free, unlike phase submissions, which are never silently
//! retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use calyx_shield::PoolContext;

use crate::error::EngineError;
use crate::ledger::MockChainState;

// ============================================================================
// Record Address Derivation
// ============================================================================

/// Seed namespace for nullifier records
pub const NULLIFIER_RECORD_SEED: &[u8] = b"calyx/nullifier";
/// Seed namespace for commitment records
pub const COMMITMENT_RECORD_SEED: &[u8] = b"calyx/commitment";
/// Seed namespace for pending-operation records
pub const OPERATION_RECORD_SEED: &[u8] = b"calyx/operation";

/// Derive the compressed-state address of a record.
///
/// This is the single authoritative derivation — every code path that
/// needs a record address (scanner spent-checks, nullifier non-inclusion
/// queries, operation lookup) goes through here. It must match the
/// derivation the deployed indexer uses bit for bit.
pub fn derive_record_address(program: &[u8; 32], seed: &[u8], value: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(program);
    hasher.update(seed);
    hasher.update(value);
    hasher.finalize().into()
}

// ============================================================================
// Types
// ============================================================================

/// One compressed record as returned by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedRecord {
    /// Record type tag
    pub discriminator: [u8; 8],
    /// Compressed-state address
    pub address: [u8; 32],
    /// Record payload (layout depends on the discriminator)
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Proof that a hash is present in the compressed state tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub root: [u8; 32],
    pub leaf_index: u64,
    pub siblings: Vec<[u8; 32]>,
}

/// Proof that an address is absent (valid for creation)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonInclusionProof {
    pub root: [u8; 32],
    pub low_leaf_index: u64,
    pub siblings: Vec<[u8; 32]>,
}

// ============================================================================
// Indexer Trait
// ============================================================================

/// Read-only view of compressed ledger state
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// List all compressed records owned by a program, optionally filtered
    /// to one pool context
    async fn records_for_program(
        &self,
        program: &[u8; 32],
        pool: Option<&PoolContext>,
    ) -> Result<Vec<CompressedRecord>, EngineError>;

    /// Does a record exist at this address?
    async fn record_exists(&self, address: &[u8; 32]) -> Result<bool, EngineError>;

    /// Inclusion proof for an existing hash
    async fn inclusion_proof(&self, hash: &[u8; 32]) -> Result<InclusionProof, EngineError>;

    /// Non-inclusion (validity) proof for a to-be-created address
    async fn non_inclusion_proof(
        &self,
        address: &[u8; 32],
    ) -> Result<NonInclusionProof, EngineError>;
}

// ============================================================================
// HTTP Indexer
// ============================================================================

/// Configuration for the HTTP indexer client
#[derive(Debug, Clone)]
pub struct HttpIndexerConfig {
    /// Base URL of the indexer
    pub url: String,
    /// Retries for read queries
    pub max_read_retries: u32,
    /// Base delay between retries (exponential backoff)
    pub retry_base: Duration,
}

impl Default for HttpIndexerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8784".to_string(),
            max_read_retries: 3,
            retry_base: Duration::from_millis(500),
        }
    }
}

impl HttpIndexerConfig {
    pub fn from_config(cfg: &calyx_config::IndexerConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            max_read_retries: cfg.max_read_retries,
            retry_base: Duration::from_millis(cfg.retry_base_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ApiResponse<T> {
    Success { data: T },
    Error { message: String, code: Option<String> },
}

#[derive(Debug, Serialize)]
struct ListRecordsRequest {
    program: String,
    pool: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordDto {
    discriminator: String,
    address: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct AddressRequest {
    address: String,
}

#[derive(Debug, Serialize)]
struct HashRequest {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct ExistsDto {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct InclusionDto {
    root: String,
    leaf_index: u64,
    siblings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NonInclusionDto {
    root: String,
    low_leaf_index: u64,
    siblings: Vec<String>,
}

/// HTTP client for the compressed-state indexer
pub struct HttpIndexer {
    config: HttpIndexerConfig,
    client: reqwest::Client,
}

impl HttpIndexer {
    pub fn new(config: HttpIndexerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    /// POST a read query with retry + exponential backoff
    async fn post_read<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, EngineError> {
        let url = format!("{}{}", self.config.url, path);
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_read_retries {
            if attempt > 0 {
                let delay = self.config.retry_base * (1 << (attempt - 1));
                warn!(%url, attempt, "Retrying indexer query after {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.post(&url).json(body).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            if !response.status().is_success() {
                last_error = format!("HTTP {}", response.status());
                continue;
            }

            let api_response: ApiResponse<T> = match response.json().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("bad response body: {e}");
                    continue;
                }
            };

            match api_response {
                ApiResponse::Success { data } => return Ok(data),
                ApiResponse::Error { message, code } => {
                    // A structured indexer error is not connectivity; do
                    // not keep retrying it.
                    return Err(EngineError::IndexerUnavailable(format!(
                        "indexer error ({}): {}",
                        code.unwrap_or_else(|| "unknown".to_string()),
                        message
                    )));
                }
            }
        }

        Err(EngineError::IndexerUnavailable(last_error))
    }
}

fn decode_hash(hex_str: &str, what: &str) -> Result<[u8; 32], EngineError> {
    let bytes = hex::decode(hex_str)
        .map_err(|_| EngineError::IndexerUnavailable(format!("bad {what} hex")))?;
    bytes
        .try_into()
        .map_err(|_| EngineError::IndexerUnavailable(format!("bad {what} length")))
}

#[async_trait]
impl IndexerClient for HttpIndexer {
    async fn records_for_program(
        &self,
        program: &[u8; 32],
        pool: Option<&PoolContext>,
    ) -> Result<Vec<CompressedRecord>, EngineError> {
        let request = ListRecordsRequest {
            program: hex::encode(program),
            pool: pool.map(|p| hex::encode(p.0)),
        };
        let dtos: Vec<RecordDto> = self.post_read("/v1/records/list", &request).await?;

        let mut records = Vec::with_capacity(dtos.len());
        for dto in dtos {
            let discriminator: [u8; 8] = hex::decode(&dto.discriminator)
                .ok()
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| {
                    EngineError::IndexerUnavailable("bad record discriminator".into())
                })?;
            records.push(CompressedRecord {
                discriminator,
                address: decode_hash(&dto.address, "record address")?,
                data: hex::decode(&dto.data)
                    .map_err(|_| EngineError::IndexerUnavailable("bad record data hex".into()))?,
            });
        }
        Ok(records)
    }

    async fn record_exists(&self, address: &[u8; 32]) -> Result<bool, EngineError> {
        let request = AddressRequest {
            address: hex::encode(address),
        };
        let dto: ExistsDto = self.post_read("/v1/records/exists", &request).await?;
        Ok(dto.exists)
    }

    async fn inclusion_proof(&self, hash: &[u8; 32]) -> Result<InclusionProof, EngineError> {
        let request = HashRequest {
            hash: hex::encode(hash),
        };
        let dto: InclusionDto = self.post_read("/v1/proofs/inclusion", &request).await?;
        let mut siblings = Vec::with_capacity(dto.siblings.len());
        for s in &dto.siblings {
            siblings.push(decode_hash(s, "sibling")?);
        }
        Ok(InclusionProof {
            root: decode_hash(&dto.root, "root")?,
            leaf_index: dto.leaf_index,
            siblings,
        })
    }

    async fn non_inclusion_proof(
        &self,
        address: &[u8; 32],
    ) -> Result<NonInclusionProof, EngineError> {
        let request = AddressRequest {
            address: hex::encode(address),
        };
        let dto: NonInclusionDto = self.post_read("/v1/proofs/non-inclusion", &request).await?;
        let mut siblings = Vec::with_capacity(dto.siblings.len());
        for s in &dto.siblings {
            siblings.push(decode_hash(s, "sibling")?);
        }
        Ok(NonInclusionProof {
            root: decode_hash(&dto.root, "root")?,
            low_leaf_index: dto.low_leaf_index,
            siblings,
        })
    }
}

// ============================================================================
// Mock Indexer
// ============================================================================

/// In-memory indexer over shared mock chain state.
///
/// Shares its state with [`crate::ledger::MockLedger`], so records created
/// by phase submissions become visible to scans exactly the way a real
/// indexer reflects the ledger.
pub struct MockIndexer {
    state: Arc<Mutex<MockChainState>>,
}

impl MockIndexer {
    pub fn new(state: Arc<Mutex<MockChainState>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl IndexerClient for MockIndexer {
    async fn records_for_program(
        &self,
        program: &[u8; 32],
        pool: Option<&PoolContext>,
    ) -> Result<Vec<CompressedRecord>, EngineError> {
        let state = self.state.lock().expect("mock chain lock");
        if state.offline {
            return Err(EngineError::IndexerUnavailable("mock indexer offline".into()));
        }
        if &state.program_id != program {
            return Ok(Vec::new());
        }
        Ok(state
            .records
            .iter()
            .filter(|r| match pool {
                // Pool filtering uses the record header prefix; records too
                // short to carry one are returned unfiltered, as a real
                // indexer filtering on raw bytes would.
                Some(p) => r.data.len() >= 32 && r.data[..32] == p.0,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn record_exists(&self, address: &[u8; 32]) -> Result<bool, EngineError> {
        let state = self.state.lock().expect("mock chain lock");
        if state.offline {
            return Err(EngineError::IndexerUnavailable("mock indexer offline".into()));
        }
        Ok(state.addresses.contains(address))
    }

    async fn inclusion_proof(&self, hash: &[u8; 32]) -> Result<InclusionProof, EngineError> {
        let state = self.state.lock().expect("mock chain lock");
        if state.offline {
            return Err(EngineError::IndexerUnavailable("mock indexer offline".into()));
        }
        if !state.commitments.contains(hash) {
            return Err(EngineError::IndexerUnavailable(
                "hash not present in compressed state".into(),
            ));
        }
        Ok(InclusionProof {
            root: state.root(),
            leaf_index: 0,
            siblings: Vec::new(),
        })
    }

    async fn non_inclusion_proof(
        &self,
        address: &[u8; 32],
    ) -> Result<NonInclusionProof, EngineError> {
        let state = self.state.lock().expect("mock chain lock");
        if state.offline {
            return Err(EngineError::IndexerUnavailable("mock indexer offline".into()));
        }
        if state.addresses.contains(address) {
            return Err(EngineError::IndexerUnavailable(
                "address already exists".into(),
            ));
        }
        Ok(NonInclusionProof {
            root: state.root(),
            low_leaf_index: 0,
            siblings: Vec::new(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
