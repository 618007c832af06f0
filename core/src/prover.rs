//! Proving subsystem boundary.
//!
//! The engine treats proof generation as an opaque service: named
//! witnesses in, fixed-size proof bytes out, no partial output on failure.
//! `prove` is synchronous from the caller's perspective but long-running;
//! the orchestrator invokes it on a blocking thread.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

// ============================================================================
// Witness Types
// ============================================================================

/// Identifies a proof circuit (and its version) to the proving service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitId(pub String);

impl std::fmt::Display for CircuitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named witness input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WitnessValue {
    /// A single field element, canonically encoded
    Field([u8; 32]),
    /// An array of field elements
    Fields(Vec<[u8; 32]>),
    /// A small public integer
    U64(u64),
    /// An array of small public integers
    U64List(Vec<u64>),
}

/// Named witnesses for one proof
pub type WitnessMap = BTreeMap<String, WitnessValue>;

// ============================================================================
// Prover Trait
// ============================================================================

/// Trait for ZK proof generation
pub trait ProofBackend: Send + Sync {
    /// Generate a proof. Blocking; run via `spawn_blocking` from async code.
    fn prove(&self, circuit: &CircuitId, witness: &WitnessMap) -> Result<Vec<u8>>;
}

// ============================================================================
// Mock Prover
// ============================================================================

/// Mock prover for tests: deterministic fake proofs, no circuits involved
pub struct MockProver {
    /// Simulated proving time in ms
    prove_time_ms: u64,
}

impl MockProver {
    pub fn new() -> Self {
        Self { prove_time_ms: 0 }
    }

    /// Create with simulated proving time (for pipeline timing tests)
    pub fn with_prove_time(ms: u64) -> Self {
        Self { prove_time_ms: ms }
    }
}

impl Default for MockProver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofBackend for MockProver {
    fn prove(&self, circuit: &CircuitId, witness: &WitnessMap) -> Result<Vec<u8>> {
        if self.prove_time_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.prove_time_ms));
        }

        // Mock proof is a hash of the inputs padded to a plausible size.
        let mut hasher = blake3::Hasher::new();
        hasher.update(circuit.0.as_bytes());
        for (name, value) in witness {
            hasher.update(name.as_bytes());
            match value {
                WitnessValue::Field(bytes) => {
                    hasher.update(bytes);
                }
                WitnessValue::Fields(list) => {
                    for bytes in list {
                        hasher.update(bytes);
                    }
                }
                WitnessValue::U64(v) => {
                    hasher.update(&v.to_le_bytes());
                }
                WitnessValue::U64List(list) => {
                    for v in list {
                        hasher.update(&v.to_le_bytes());
                    }
                }
            }
        }

        let mut proof = Vec::with_capacity(256);
        proof.extend_from_slice(hasher.finalize().as_bytes());
        proof.extend_from_slice(&[0u8; 224]);
        Ok(proof)
    }
}

// ============================================================================
// HTTP Prover
// ============================================================================

/// Configuration for the HTTP proving-service client
#[derive(Debug, Clone)]
pub struct HttpProverConfig {
    /// Base URL of the proving service
    pub url: String,
    /// Timeout for proof generation
    pub proof_timeout: Duration,
    /// Polling interval for job status checks
    pub poll_interval: Duration,
}

impl Default for HttpProverConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3001".to_string(),
            proof_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl HttpProverConfig {
    pub fn from_config(cfg: &calyx_config::ProverConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            proof_timeout: Duration::from_secs(cfg.proof_timeout_secs),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
        }
    }
}

/// API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ApiResponse<T> {
    Success { data: T },
    Error { message: String, code: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProveRequest {
    circuit: String,
    witness: WitnessMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProveJobResponse {
    job_id: String,
    estimated_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProofResult {
    job_id: String,
    /// Hex-encoded proof bytes
    proof_bytes: String,
    proving_time_ms: u64,
}

/// Client for the HTTP proving service
pub struct HttpProver {
    config: HttpProverConfig,
    client: reqwest::Client,
}

impl HttpProver {
    pub fn new(config: HttpProverConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.proof_timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    /// Check if the proving service is healthy
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/v1/health", self.config.url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("Prover health check failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Submit a witness for proving and wait for the result
    pub async fn prove_async(&self, circuit: &CircuitId, witness: &WitnessMap) -> Result<Vec<u8>> {
        let start = std::time::Instant::now();

        let request = ProveRequest {
            circuit: circuit.0.clone(),
            witness: witness.clone(),
        };

        let job = self.submit_request(&request).await?;
        info!(
            circuit = %circuit,
            job_id = %job.job_id,
            estimated_ms = job.estimated_time_ms,
            "Proof job created"
        );

        let result = self.poll_for_completion(&job.job_id).await?;

        info!(
            circuit = %circuit,
            elapsed_ms = start.elapsed().as_millis() as u64,
            proving_time_ms = result.proving_time_ms,
            "Proof completed"
        );

        hex::decode(&result.proof_bytes).context("Invalid proof bytes hex")
    }

    async fn submit_request(&self, request: &ProveRequest) -> Result<ProveJobResponse> {
        let url = format!("{}/v1/prove", self.config.url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to connect to proving service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Proving service returned {}: {}", status, body));
        }

        let api_response: ApiResponse<ProveJobResponse> = response
            .json()
            .await
            .context("Failed to parse prover response")?;

        match api_response {
            ApiResponse::Success { data } => Ok(data),
            ApiResponse::Error { message, code } => Err(anyhow!(
                "Prover error ({}): {}",
                code.unwrap_or_else(|| "unknown".to_string()),
                message
            )),
        }
    }

    async fn poll_for_completion(&self, job_id: &str) -> Result<ProofResult> {
        let poll_timeout = self.config.proof_timeout;
        let poll_interval = self.config.poll_interval;

        timeout(poll_timeout, async {
            loop {
                match self.get_proof(job_id).await? {
                    Some(result) => return Ok(result),
                    None => {
                        debug!(job_id, "Proof not ready yet");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        })
        .await
        .map_err(|_| anyhow!("Proof generation timed out after {:?}", poll_timeout))?
    }

    /// `Ok(None)` means the job is still running
    async fn get_proof(&self, job_id: &str) -> Result<Option<ProofResult>> {
        let url = format!("{}/v1/proof/{}", self.config.url, job_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch proof")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to get proof: {} - {}", status, body));
        }

        let api_response: ApiResponse<ProofResult> = response
            .json()
            .await
            .context("Failed to parse proof response")?;

        match api_response {
            ApiResponse::Success { data } => Ok(Some(data)),
            ApiResponse::Error { message, code } => match code.as_deref() {
                Some("NOT_READY") => Ok(None),
                _ => Err(anyhow!("Proof generation failed: {}", message)),
            },
        }
    }
}

impl ProofBackend for HttpProver {
    fn prove(&self, circuit: &CircuitId, witness: &WitnessMap) -> Result<Vec<u8>> {
        // ProofBackend::prove is sync; bridge onto the current runtime.
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| anyhow!("No tokio runtime available"))?;
        rt.block_on(self.prove_async(circuit, witness))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_witness() -> WitnessMap {
        let mut witness = WitnessMap::new();
        witness.insert("amount".into(), WitnessValue::U64(1000));
        witness.insert("randomness".into(), WitnessValue::Field([7u8; 32]));
        witness
    }

    #[test]
    fn test_mock_prover_deterministic() {
        let prover = MockProver::new();
        let circuit = CircuitId("calyx-spend-v1".into());

        let p1 = prover.prove(&circuit, &sample_witness()).unwrap();
        let p2 = prover.prove(&circuit, &sample_witness()).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(p1.len(), 256);
    }

    #[test]
    fn test_mock_prover_binds_witness() {
        let prover = MockProver::new();
        let circuit = CircuitId("calyx-spend-v1".into());

        let mut other = sample_witness();
        other.insert("amount".into(), WitnessValue::U64(2000));

        let p1 = prover.prove(&circuit, &sample_witness()).unwrap();
        let p2 = prover.prove(&circuit, &other).unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_http_prover_config_default() {
        let config = HttpProverConfig::default();
        assert_eq!(config.proof_timeout, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }
}
