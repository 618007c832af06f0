//! Calyx Configuration
//!
//! Shared configuration crate for the Calyx client engine.
//!
//! Handles loading configuration from:
//! 1. CX_CONFIG env var (explicit path)
//! 2. ./calyx.toml (current directory)
//! 3. ~/.calyx/calyx.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::{env, fs};

/// Global config instance for convenience access
pub static GLOBAL_CONFIG: OnceLock<CalyxConfig> = OnceLock::new();

const CONFIG_FILE_NAME: &str = "calyx.toml";
const CONFIG_DIR_NAME: &str = ".calyx";

// ============================================================================
// Default Constants (avoid repeated allocations)
// ============================================================================

const DEFAULT_INDEXER_URL: &str = "http://127.0.0.1:8784";
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8899";
const DEFAULT_PROVER_URL: &str = "http://127.0.0.1:3001";
const DEFAULT_POOL_PROGRAM: &str = "CxPooLk4vDq1yTfF2mJhq9XyBW7dq3jNCiLe9rQmGSaw";

const DEFAULT_MAX_READ_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_SETTLE_DELAY_MS: u64 = 1_500;
const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PROOF_TIMEOUT_SECS: u64 = 300;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_MAX_BLOCKHASH_RETRIES: u32 = 3;
const DEFAULT_DUST_THRESHOLD: u64 = 1_000;
const DEFAULT_MAX_INPUT_NOTES: usize = 3;
const DEFAULT_MAX_NOTES_PER_TOKEN: usize = 16;
const DEFAULT_CONSOLIDATION_ITERATION_CAP: u32 = 16;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalyxConfig {
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub prover: ProverConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Compressed-state indexer connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default = "default_indexer_url")]
    pub url: String,
    /// Retries for read-only queries (scans, existence checks)
    #[serde(default = "default_max_read_retries")]
    pub max_read_retries: u32,
    /// Base delay between read retries (exponential backoff)
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_INDEXER_URL.into(),
            max_read_retries: DEFAULT_MAX_READ_RETRIES,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
        }
    }
}

fn default_indexer_url() -> String {
    DEFAULT_INDEXER_URL.into()
}
fn default_max_read_retries() -> u32 {
    DEFAULT_MAX_READ_RETRIES
}
fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}

/// Host ledger connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_pool_program")]
    pub pool_program_id: String,
    /// Seconds to wait for a phase transaction to reach finality
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    /// Resubmissions allowed when a blockhash expires under a phase
    #[serde(default = "default_max_blockhash_retries")]
    pub max_blockhash_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.into(),
            pool_program_id: DEFAULT_POOL_PROGRAM.into(),
            confirm_timeout_secs: DEFAULT_CONFIRM_TIMEOUT_SECS,
            max_blockhash_retries: DEFAULT_MAX_BLOCKHASH_RETRIES,
        }
    }
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.into()
}
fn default_pool_program() -> String {
    DEFAULT_POOL_PROGRAM.into()
}
fn default_confirm_timeout() -> u64 {
    DEFAULT_CONFIRM_TIMEOUT_SECS
}
fn default_max_blockhash_retries() -> u32 {
    DEFAULT_MAX_BLOCKHASH_RETRIES
}

/// Proving service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProverConfig {
    #[serde(default = "default_prover_url")]
    pub url: String,
    #[serde(default = "default_proof_timeout")]
    pub proof_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROVER_URL.into(),
            proof_timeout_secs: DEFAULT_PROOF_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

fn default_prover_url() -> String {
    DEFAULT_PROVER_URL.into()
}
fn default_proof_timeout() -> u64 {
    DEFAULT_PROOF_TIMEOUT_SECS
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay before querying the indexer for state a just-confirmed phase
    /// should have produced. Tolerates indexer lag behind the ledger; a
    /// tunable, not a correctness guarantee.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Notes at or below this amount count as dust
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: u64,
    /// Maximum input notes the spend circuit accepts
    #[serde(default = "default_max_input_notes")]
    pub max_input_notes: usize,
    /// Note count per token above which consolidation is recommended
    #[serde(default = "default_max_notes_per_token")]
    pub max_notes_per_token: usize,
    /// Safety cap on consolidation rounds
    #[serde(default = "default_consolidation_cap")]
    pub consolidation_iteration_cap: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            max_input_notes: DEFAULT_MAX_INPUT_NOTES,
            max_notes_per_token: DEFAULT_MAX_NOTES_PER_TOKEN,
            consolidation_iteration_cap: DEFAULT_CONSOLIDATION_ITERATION_CAP,
        }
    }
}

fn default_settle_delay() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}
fn default_dust_threshold() -> u64 {
    DEFAULT_DUST_THRESHOLD
}
fn default_max_input_notes() -> usize {
    DEFAULT_MAX_INPUT_NOTES
}
fn default_max_notes_per_token() -> usize {
    DEFAULT_MAX_NOTES_PER_TOKEN
}
fn default_consolidation_cap() -> u32 {
    DEFAULT_CONSOLIDATION_ITERATION_CAP
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Set field from env var if present
fn env_string(key: &str, field: &mut String) {
    if let Ok(v) = env::var(key) {
        *field = v;
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = env::var(key) {
        if let Ok(parsed) = v.parse() {
            *field = parsed;
        }
    }
}

// ============================================================================
// Implementation
// ============================================================================

impl CalyxConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check CX_CONFIG env var
        if let Ok(path) = env::var("CX_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Check ./calyx.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.calyx/calyx.toml
        dirs::home_dir()
            .map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Indexer
        env_string("CX_INDEXER_URL", &mut self.indexer.url);
        env_parse("CX_INDEXER_RETRIES", &mut self.indexer.max_read_retries);
        env_parse("CX_INDEXER_RETRY_BASE_MS", &mut self.indexer.retry_base_ms);

        // Ledger
        env_string("CX_RPC_URL", &mut self.ledger.rpc_url);
        env_string("CX_POOL_PROGRAM", &mut self.ledger.pool_program_id);
        env_parse("CX_CONFIRM_TIMEOUT", &mut self.ledger.confirm_timeout_secs);
        env_parse(
            "CX_BLOCKHASH_RETRIES",
            &mut self.ledger.max_blockhash_retries,
        );

        // Prover
        env_string("CX_PROVER_URL", &mut self.prover.url);
        env_parse("CX_PROOF_TIMEOUT_SECS", &mut self.prover.proof_timeout_secs);
        env_parse("CX_PROVER_POLL_MS", &mut self.prover.poll_interval_ms);

        // Engine
        env_parse("CX_SETTLE_DELAY_MS", &mut self.engine.settle_delay_ms);
        env_parse("CX_DUST_THRESHOLD", &mut self.engine.dust_threshold);
        env_parse("CX_MAX_INPUT_NOTES", &mut self.engine.max_input_notes);
        env_parse(
            "CX_MAX_NOTES_PER_TOKEN",
            &mut self.engine.max_notes_per_token,
        );
        env_parse(
            "CX_CONSOLIDATION_CAP",
            &mut self.engine.consolidation_iteration_cap,
        );
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Get the global config instance, initializing it if necessary.
    ///
    /// Falls back to defaults if loading fails.
    pub fn global() -> &'static CalyxConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            })
        })
    }

    /// Initialize the global config with a specific instance.
    ///
    /// Returns `Err(config)` if already initialized.
    pub fn set_global(config: CalyxConfig) -> Result<(), CalyxConfig> {
        GLOBAL_CONFIG.set(config)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CalyxConfig::default();
        assert_eq!(config.indexer.url, DEFAULT_INDEXER_URL);
        assert_eq!(config.ledger.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.engine.max_input_notes, DEFAULT_MAX_INPUT_NOTES);
        assert_eq!(config.engine.settle_delay_ms, DEFAULT_SETTLE_DELAY_MS);
    }

    #[test]
    fn test_generate_sample() {
        let sample = CalyxConfig::generate_sample();
        assert!(sample.contains("[indexer]"));
        assert!(sample.contains("[ledger]"));
        assert!(sample.contains("[prover]"));
        assert!(sample.contains("[engine]"));
    }

    #[test]
    fn test_parse_sample() {
        let sample = CalyxConfig::generate_sample();
        let parsed: CalyxConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.indexer.url, DEFAULT_INDEXER_URL);
        assert_eq!(parsed.engine.dust_threshold, DEFAULT_DUST_THRESHOLD);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: CalyxConfig =
            toml::from_str("[indexer]\nurl = \"http://indexer:9000\"\n").unwrap();
        assert_eq!(parsed.indexer.url, "http://indexer:9000");
        assert_eq!(parsed.indexer.max_read_retries, DEFAULT_MAX_READ_RETRIES);
        assert_eq!(parsed.ledger.rpc_url, DEFAULT_RPC_URL);
    }
}
