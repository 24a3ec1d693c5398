//! Configuration loading from TOML files and environment variables
//!
//! Everything the core consumes but does not own: endpoint list with
//! priorities, failover budget, breaker thresholds, bucket parameters,
//! per-protocol polling settings, and validator cache sizing.

use crate::types::Protocol;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transport layer configuration
    pub rpc: RpcConfig,

    /// Per-protocol polling configuration
    #[serde(default)]
    pub protocols: ProtocolsConfig,

    /// Token validator configuration
    #[serde(default)]
    pub validator: ValidatorConfig,

    /// Confidence scoring configuration
    #[serde(default)]
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// RPC endpoints in priority order
    pub endpoints: Vec<EndpointEntry>,

    /// Overall failover budget for a single logical call
    #[serde(default = "default_failover_budget_ms")]
    pub failover_budget_ms: u64,

    /// How long a call may queue for local admission before failing
    #[serde(default = "default_queue_deadline_ms")]
    pub queue_deadline_ms: u64,

    /// Per-attempt request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Concurrent socket cap per endpoint
    #[serde(default = "default_max_sockets")]
    pub max_sockets_per_endpoint: usize,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub bucket: BucketConfig,
}

/// A single endpoint: URL plus priority rank (lower = preferred)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub url: String,

    #[serde(default)]
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within the rolling window before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Rolling window for counting failures
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,

    /// Time an open breaker waits before permitting a trial call
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_ms: default_failure_window_ms(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Steady-state refill rate (tokens per second)
    #[serde(default = "default_bucket_rate")]
    pub rate_per_sec: f64,

    /// Steady-state capacity
    #[serde(default = "default_bucket_capacity")]
    pub capacity: f64,

    /// Burst capacity multiplier
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f64,

    /// How long a burst lasts once armed
    #[serde(default = "default_burst_duration_ms")]
    pub burst_duration_ms: u64,

    /// Cooldown before burst can re-trigger
    #[serde(default = "default_burst_cooldown_ms")]
    pub burst_cooldown_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: default_bucket_rate(),
            capacity: default_bucket_capacity(),
            burst_multiplier: default_burst_multiplier(),
            burst_duration_ms: default_burst_duration_ms(),
            burst_cooldown_ms: default_burst_cooldown_ms(),
        }
    }
}

/// Polling settings for one protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Interval between poll cycles
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Result-count limit for the signature listing
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            batch_limit: default_batch_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolsConfig {
    #[serde(default)]
    pub raydium: PollConfig,

    #[serde(default)]
    pub pumpfun: PollConfig,

    #[serde(default)]
    pub orca: PollConfig,

    /// TTL for the per-signature transaction body cache
    #[serde(default = "default_tx_cache_ttl_ms")]
    pub tx_cache_ttl_ms: u64,

    /// TTL for the processed-signature dedup set
    #[serde(default = "default_seen_ttl_ms")]
    pub seen_ttl_ms: u64,
}

impl Default for ProtocolsConfig {
    fn default() -> Self {
        Self {
            raydium: PollConfig::default(),
            pumpfun: PollConfig::default(),
            orca: PollConfig::default(),
            tx_cache_ttl_ms: default_tx_cache_ttl_ms(),
            seen_ttl_ms: default_seen_ttl_ms(),
        }
    }
}

impl ProtocolsConfig {
    pub fn for_protocol(&self, protocol: Protocol) -> &PollConfig {
        match protocol {
            Protocol::Raydium => &self.raydium,
            Protocol::PumpFun => &self.pumpfun,
            Protocol::Orca => &self.orca,
            Protocol::Unknown => &self.raydium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Bounded cache capacity (entries)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Cache entry TTL
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Aggressive network validation timeout
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Concurrent network validations
    #[serde(default = "default_max_concurrent_validations")]
    pub max_concurrent: usize,

    /// Age after which a stuck in-flight entry is cleaned up
    #[serde(default = "default_inflight_max_age_ms")]
    pub inflight_max_age_ms: u64,

    /// Confidence at or above which a network result is promoted to the
    /// known-token set
    #[serde(default = "default_promote_confidence")]
    pub promote_confidence: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            cache_ttl_ms: default_cache_ttl_ms(),
            network_timeout_ms: default_network_timeout_ms(),
            max_concurrent: default_max_concurrent_validations(),
            inflight_max_age_ms: default_inflight_max_age_ms(),
            promote_confidence: default_promote_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Minimum combined confidence for emission
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Weight of the parser's structural confidence
    #[serde(default = "default_parser_weight")]
    pub parser_weight: f64,

    /// Weight of each token validation (primary and secondary)
    #[serde(default = "default_validator_weight")]
    pub validator_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            parser_weight: default_parser_weight(),
            validator_weight: default_validator_weight(),
        }
    }
}

fn default_failover_budget_ms() -> u64 {
    5_000
}

fn default_queue_deadline_ms() -> u64 {
    250
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

fn default_max_sockets() -> usize {
    16
}

fn default_failure_threshold() -> usize {
    5
}

fn default_failure_window_ms() -> u64 {
    10_000
}

fn default_recovery_timeout_ms() -> u64 {
    15_000
}

fn default_bucket_rate() -> f64 {
    50.0
}

fn default_bucket_capacity() -> f64 {
    50.0
}

fn default_burst_multiplier() -> f64 {
    2.0
}

fn default_burst_duration_ms() -> u64 {
    2_000
}

fn default_burst_cooldown_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    400
}

fn default_batch_limit() -> usize {
    25
}

fn default_tx_cache_ttl_ms() -> u64 {
    30_000
}

fn default_seen_ttl_ms() -> u64 {
    120_000
}

fn default_cache_capacity() -> usize {
    4_096
}

fn default_cache_ttl_ms() -> u64 {
    60_000
}

fn default_network_timeout_ms() -> u64 {
    8
}

fn default_max_concurrent_validations() -> usize {
    32
}

fn default_inflight_max_age_ms() -> u64 {
    5_000
}

fn default_promote_confidence() -> f64 {
    0.85
}

fn default_confidence_floor() -> f64 {
    0.65
}

fn default_parser_weight() -> f64 {
    0.6
}

fn default_validator_weight() -> f64 {
    0.2
}

/// Configuration-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("failed to read {}: {}", path.display(), e)))?;

        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the `LP_RPC_ENDPOINTS` environment variable
    /// (comma-separated URL list, priority = list position)
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoints_str = std::env::var("LP_RPC_ENDPOINTS")
            .map_err(|_| ConfigError::MissingEnvVar("LP_RPC_ENDPOINTS".to_string()))?;

        let endpoints: Vec<EndpointEntry> = endpoints_str
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, url)| EndpointEntry {
                url: url.to_string(),
                priority: i as u8,
            })
            .collect();

        let config = Config {
            rpc: RpcConfig {
                endpoints,
                failover_budget_ms: default_failover_budget_ms(),
                queue_deadline_ms: default_queue_deadline_ms(),
                request_timeout_ms: default_request_timeout_ms(),
                max_sockets_per_endpoint: default_max_sockets(),
                breaker: BreakerConfig::default(),
                bucket: BucketConfig::default(),
            },
            protocols: ProtocolsConfig::default(),
            validator: ValidatorConfig::default(),
            scoring: ScoringConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants before any component is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.endpoints.is_empty() {
            return Err(ConfigError::Validation(
                "at least one RPC endpoint must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.rpc.endpoints {
            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "invalid URL format: {}",
                    endpoint.url
                )));
            }
            if !seen.insert(&endpoint.url) {
                return Err(ConfigError::Validation(format!(
                    "duplicate RPC URL: {}",
                    endpoint.url
                )));
            }
        }

        if self.rpc.breaker.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "breaker failure_threshold must be > 0".to_string(),
            ));
        }

        if self.rpc.bucket.rate_per_sec <= 0.0 || !self.rpc.bucket.rate_per_sec.is_finite() {
            return Err(ConfigError::Validation(
                "bucket rate_per_sec must be > 0".to_string(),
            ));
        }

        if self.rpc.bucket.burst_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "bucket burst_multiplier must be >= 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.scoring.confidence_floor) {
            return Err(ConfigError::Validation(
                "scoring confidence_floor must be within 0.0..=1.0".to_string(),
            ));
        }

        let weight_sum = self.scoring.parser_weight + 2.0 * self.scoring.validator_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Validation(format!(
                "scoring weights must sum to 1.0 (got {:.3})",
                weight_sum
            )));
        }

        if self.validator.cache_capacity == 0 {
            return Err(ConfigError::Validation(
                "validator cache_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Minimal configuration for a list of URLs, defaults everywhere else
    pub fn from_urls(urls: &[String]) -> Self {
        Config {
            rpc: RpcConfig {
                endpoints: urls
                    .iter()
                    .enumerate()
                    .map(|(i, url)| EndpointEntry {
                        url: url.clone(),
                        priority: i as u8,
                    })
                    .collect(),
                failover_budget_ms: default_failover_budget_ms(),
                queue_deadline_ms: default_queue_deadline_ms(),
                request_timeout_ms: default_request_timeout_ms(),
                max_sockets_per_endpoint: default_max_sockets(),
                breaker: BreakerConfig::default(),
                bucket: BucketConfig::default(),
            },
            protocols: ProtocolsConfig::default(),
            validator: ValidatorConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}
