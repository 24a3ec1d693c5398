//! Tiered token validation with caching and in-flight deduplication
//!
//! Tiers short-circuit on the first high-certainty result: format check,
//! known-token accept, known-invalid reject, bounded TTL cache, in-flight
//! coalescing, and finally a network lookup under an aggressive timeout.
//! Timeouts and network errors fall back to a permissive low-confidence
//! accept: a brand-new legitimate mint is indistinguishable from a transient
//! error, and discarding it costs more than one downstream false positive.

use super::telemetry::PipelineTelemetry;
use crate::config::ValidatorConfig;
use crate::rpc::RpcPool;
use dashmap::{DashMap, DashSet};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// SPL token programs; a mint account must be owned by one of these
static TOKEN_PROGRAMS: Lazy<[Pubkey; 2]> = Lazy::new(|| {
    [
        Pubkey::from_str("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA").unwrap(),
        Pubkey::from_str("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb").unwrap(),
    ]
});

/// Well-known base assets: instant accept
static KNOWN_TOKENS: &[&str] = &[
    "So11111111111111111111111111111111111111112",  // wrapped SOL
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", // USDC
    "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", // USDT
];

/// System and program addresses that can never be token mints: instant reject
static KNOWN_INVALID: &[&str] = &[
    "11111111111111111111111111111111",             // system program
    "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",  // token program
    "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL", // associated token program
    "SysvarRent111111111111111111111111111111111",
    "SysvarC1ock11111111111111111111111111111111",
    "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", // Raydium AMM v4
    "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",  // Pump.fun
    "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",  // Orca Whirlpool
];

/// Which tier produced a validation result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTier {
    Format,
    KnownToken,
    KnownInvalid,
    Cache,
    InFlight,
    Network,
    NetworkFallback,
}

/// Validation verdict with the certainty the producing tier carries
#[derive(Debug, Clone, Copy)]
pub struct TokenCheck {
    pub valid: bool,
    pub confidence: f64,
    pub tier: ValidationTier,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    valid: bool,
    confidence: f64,
    cached_at: Instant,
}

/// Quick shape check for raw address strings (base58, 32 bytes)
pub fn is_wellformed_address(address: &str) -> bool {
    bs58::decode(address)
        .into_vec()
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}

#[derive(Debug, Default)]
struct InFlightInner {
    set: HashSet<Pubkey>,
    started: HashMap<Pubkey, Instant>,
}

/// Addresses currently being validated plus their start timestamps.
///
/// Invariant: the set and the timestamp map always hold the same keys.
/// Cleanup snapshots the key set before mutating; removing entries while
/// iterating the live collection under concurrent begin/finish calls is the
/// corruption mode this structure exists to rule out.
#[derive(Debug, Default)]
pub struct InFlightTable {
    inner: Mutex<InFlightInner>,
}

impl InFlightTable {
    /// Register an address; false when a validation for it is already
    /// running
    pub fn begin(&self, address: Pubkey) -> bool {
        let mut inner = self.inner.lock();
        if inner.set.contains(&address) {
            return false;
        }
        inner.set.insert(address);
        inner.started.insert(address, Instant::now());
        debug_assert_eq!(inner.set.len(), inner.started.len());
        true
    }

    pub fn finish(&self, address: &Pubkey) {
        let mut inner = self.inner.lock();
        inner.set.remove(address);
        inner.started.remove(address);
        debug_assert_eq!(inner.set.len(), inner.started.len());
    }

    /// Remove entries older than `max_age`. Keys are snapshotted into an
    /// owned list first so concurrent begin/finish calls cannot interleave
    /// with a live iteration.
    pub fn cleanup_expired(&self, max_age: Duration) -> usize {
        let snapshot: Vec<Pubkey> = {
            let inner = self.inner.lock();
            inner.started.keys().copied().collect()
        };

        let mut removed = 0;
        for address in snapshot {
            let mut inner = self.inner.lock();
            let expired = inner
                .started
                .get(&address)
                .is_some_and(|started| started.elapsed() > max_age);
            if expired {
                inner.set.remove(&address);
                inner.started.remove(&address);
                removed += 1;
            }
            debug_assert_eq!(inner.set.len(), inner.started.len());
        }
        removed
    }

    /// (set size, timestamp-map size); equal by invariant
    pub fn sizes(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.set.len(), inner.started.len())
    }
}

pub struct TokenValidator {
    pool: Arc<RpcPool>,
    telemetry: Arc<PipelineTelemetry>,
    config: ValidatorConfig,
    known_tokens: DashSet<Pubkey>,
    known_invalid: DashSet<Pubkey>,
    cache: DashMap<Pubkey, CacheEntry>,
    in_flight: InFlightTable,
    network_permits: Semaphore,
}

impl TokenValidator {
    pub fn new(
        pool: Arc<RpcPool>,
        telemetry: Arc<PipelineTelemetry>,
        config: ValidatorConfig,
    ) -> Self {
        let known_tokens = KNOWN_TOKENS
            .iter()
            .map(|s| Pubkey::from_str(s).unwrap())
            .collect();
        let known_invalid = KNOWN_INVALID
            .iter()
            .map(|s| Pubkey::from_str(s).unwrap())
            .collect();

        Self {
            pool,
            telemetry,
            network_permits: Semaphore::new(config.max_concurrent.max(1)),
            config,
            known_tokens,
            known_invalid,
            cache: DashMap::new(),
            in_flight: InFlightTable::default(),
        }
    }

    /// Validate a mint address through the tier ladder
    pub async fn validate(&self, mint: &Pubkey) -> TokenCheck {
        // Tier 1: format. Typed addresses are structurally sound; the
        // all-zeros key is the one malformed value that survives decoding.
        if *mint == Pubkey::default() {
            return TokenCheck {
                valid: false,
                confidence: 1.0,
                tier: ValidationTier::Format,
            };
        }

        // Tier 2/3: membership tests
        if self.known_tokens.contains(mint) {
            return TokenCheck {
                valid: true,
                confidence: 1.0,
                tier: ValidationTier::KnownToken,
            };
        }
        if self.known_invalid.contains(mint) {
            return TokenCheck {
                valid: false,
                confidence: 1.0,
                tier: ValidationTier::KnownInvalid,
            };
        }

        // Tier 4: bounded cache
        if let Some(entry) = self.cache.get(mint) {
            if entry.cached_at.elapsed() < Duration::from_millis(self.config.cache_ttl_ms) {
                PipelineTelemetry::incr(&self.telemetry.validation_cache_hits);
                return TokenCheck {
                    valid: entry.valid,
                    confidence: entry.confidence,
                    tier: ValidationTier::Cache,
                };
            }
        }

        self.in_flight
            .cleanup_expired(Duration::from_millis(self.config.inflight_max_age_ms));

        // Tier 5: coalesce onto an already-running validation
        if !self.in_flight.begin(*mint) {
            PipelineTelemetry::incr(&self.telemetry.validations_coalesced);
            return TokenCheck {
                valid: true,
                confidence: 0.3,
                tier: ValidationTier::InFlight,
            };
        }

        // Tier 6: network, aggressively bounded
        let check = self.validate_over_network(mint).await;
        self.in_flight.finish(mint);

        self.cache_result(*mint, &check);
        check
    }

    async fn validate_over_network(&self, mint: &Pubkey) -> TokenCheck {
        let _permit = match self.network_permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return self.permissive_fallback(mint, "semaphore closed"),
        };

        let timeout = Duration::from_millis(self.config.network_timeout_ms);
        let call = self.pool.call(
            "getAccountInfo",
            json!([mint.to_string(), { "encoding": "base64" }]),
        );

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => {
                let mut check = classify_account_info(&result);
                if check.valid {
                    check = self.confirm_supply(mint, check, timeout).await;
                }
                trace!(mint = %mint, valid = check.valid, "network validation completed");
                check
            }
            Ok(Err(err)) => {
                debug!(mint = %mint, error = %err, "network validation error, accepting permissively");
                self.permissive_fallback(mint, "rpc error")
            }
            Err(_) => {
                PipelineTelemetry::incr(&self.telemetry.validation_timeouts);
                debug!(mint = %mint, timeout_ms = self.config.network_timeout_ms,
                    "network validation timeout, accepting permissively");
                self.permissive_fallback(mint, "timeout")
            }
        }
    }

    /// Supply lookup as a second signal once the account shape checks out:
    /// an initialized mint reports a supply. Failure or timeout here never
    /// downgrades the verdict, it only withholds the confidence bump.
    async fn confirm_supply(&self, mint: &Pubkey, check: TokenCheck, timeout: Duration) -> TokenCheck {
        let call = self.pool.call("getTokenSupply", json!([mint.to_string()]));
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => {
                let has_amount = result
                    .get("value")
                    .and_then(|v| v.get("amount"))
                    .and_then(Value::as_str)
                    .is_some();
                if has_amount {
                    TokenCheck {
                        confidence: 0.95,
                        ..check
                    }
                } else {
                    check
                }
            }
            _ => check,
        }
    }

    /// New legitimately-created tokens are indistinguishable from errors;
    /// rejecting them would discard real opportunities
    fn permissive_fallback(&self, mint: &Pubkey, cause: &str) -> TokenCheck {
        trace!(mint = %mint, cause, "permissive low-confidence accept");
        TokenCheck {
            valid: true,
            confidence: 0.4,
            tier: ValidationTier::NetworkFallback,
        }
    }

    fn cache_result(&self, mint: Pubkey, check: &TokenCheck) {
        // Only settled network verdicts are worth remembering; fallback
        // results would pin a low-confidence accept for the full TTL
        if check.tier != ValidationTier::Network {
            return;
        }

        if self.cache.len() >= self.config.cache_capacity {
            self.evict_oldest();
        }
        self.cache.insert(
            mint,
            CacheEntry {
                valid: check.valid,
                confidence: check.confidence,
                cached_at: Instant::now(),
            },
        );

        if check.valid && check.confidence >= self.config.promote_confidence {
            self.known_tokens.insert(mint);
        }
    }

    fn evict_oldest(&self) {
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);
        self.cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);

        // Still full after TTL sweep: drop the stalest entry
        if self.cache.len() >= self.config.cache_capacity {
            if let Some(oldest) = self
                .cache
                .iter()
                .max_by_key(|entry| entry.cached_at.elapsed())
                .map(|entry| *entry.key())
            {
                self.cache.remove(&oldest);
            }
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn in_flight(&self) -> &InFlightTable {
        &self.in_flight
    }

    pub fn is_known_token(&self, mint: &Pubkey) -> bool {
        self.known_tokens.contains(mint)
    }
}

/// Interpret a `getAccountInfo` result for a would-be mint
fn classify_account_info(result: &Value) -> TokenCheck {
    let value = result.get("value");
    match value {
        // Account does not exist: confidently not a live mint
        Some(Value::Null) | None => TokenCheck {
            valid: false,
            confidence: 0.8,
            tier: ValidationTier::Network,
        },
        Some(account) => {
            let owner = account
                .get("owner")
                .and_then(Value::as_str)
                .and_then(|s| Pubkey::from_str(s).ok());

            let owned_by_token_program =
                owner.is_some_and(|owner| TOKEN_PROGRAMS.iter().any(|p| *p == owner));

            if owned_by_token_program {
                TokenCheck {
                    valid: true,
                    confidence: 0.9,
                    tier: ValidationTier::Network,
                }
            } else {
                TokenCheck {
                    valid: false,
                    confidence: 0.7,
                    tier: ValidationTier::Network,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn validator_with_pool(url: &str) -> TokenValidator {
        let config = Config::from_urls(&[url.to_string()]);
        let pool = Arc::new(RpcPool::new(&config.rpc));
        TokenValidator::new(
            pool,
            Arc::new(PipelineTelemetry::new()),
            config.validator.clone(),
        )
    }

    fn offline_validator() -> TokenValidator {
        validator_with_pool("http://127.0.0.1:1")
    }

    #[test]
    fn test_wellformed_address_check() {
        assert!(is_wellformed_address(
            "So11111111111111111111111111111111111111112"
        ));
        assert!(!is_wellformed_address("not-base58-!!"));
        assert!(!is_wellformed_address("abc"));
    }

    #[tokio::test]
    async fn test_format_tier_rejects_default_pubkey() {
        let validator = offline_validator();
        let check = validator.validate(&Pubkey::default()).await;

        assert!(!check.valid);
        assert_eq!(check.tier, ValidationTier::Format);
    }

    #[tokio::test]
    async fn test_known_token_instant_accept() {
        let validator = offline_validator();
        let wsol = Pubkey::from_str("So11111111111111111111111111111111111111112").unwrap();

        let check = validator.validate(&wsol).await;
        assert!(check.valid);
        assert_eq!(check.tier, ValidationTier::KnownToken);
        assert!((check.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_known_invalid_instant_reject() {
        let validator = offline_validator();
        let system = Pubkey::from_str("11111111111111111111111111111111").unwrap();

        let check = validator.validate(&system).await;
        assert!(!check.valid);
        assert_eq!(check.tier, ValidationTier::KnownInvalid);
    }

    #[tokio::test]
    async fn test_network_error_falls_back_to_permissive_accept() {
        let validator = offline_validator();
        let mint = Pubkey::new_unique();

        let check = validator.validate(&mint).await;
        assert!(check.valid, "errors must not reject new tokens");
        assert_eq!(check.tier, ValidationTier::NetworkFallback);
        assert!(check.confidence < 0.5);

        // In-flight entry was released
        assert_eq!(validator.in_flight().sizes(), (0, 0));
    }

    #[tokio::test]
    async fn test_in_flight_coalescing() {
        let validator = offline_validator();
        let mint = Pubkey::new_unique();

        assert!(validator.in_flight().begin(mint));
        let check = validator.validate(&mint).await;

        assert_eq!(check.tier, ValidationTier::InFlight);
        assert!(check.valid);
        assert!(check.confidence <= 0.3 + f64::EPSILON);
    }

    #[tokio::test]
    async fn test_network_validation_accepts_token_program_owner() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"getAccountInfo"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":1},"value":{
                    "owner":"TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                    "lamports":1461600,"data":["","base64"],"executable":false}}}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"getTokenSupply"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":1},"value":{
                    "amount":"1000000000","decimals":6,"uiAmount":1000.0,"uiAmountString":"1000"}}}"#,
            )
            .create_async()
            .await;

        let mut config = Config::from_urls(&[server.url()]);
        // Generous timeout: this test exercises classification, not latency
        config.validator.network_timeout_ms = 2_000;
        let pool = Arc::new(RpcPool::new(&config.rpc));
        let validator = TokenValidator::new(
            pool,
            Arc::new(PipelineTelemetry::new()),
            config.validator.clone(),
        );

        let mint = Pubkey::new_unique();
        let check = validator.validate(&mint).await;

        assert!(check.valid);
        assert_eq!(check.tier, ValidationTier::Network);
        // Supply confirmation lifts the account-shape confidence
        assert!((check.confidence - 0.95).abs() < f64::EPSILON);
        // High-confidence result promoted to the known-token set and cached
        assert!(validator.is_known_token(&mint));
        assert_eq!(validator.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_missing_account_is_confident_reject() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":1},"value":null}}"#)
            .create_async()
            .await;

        let mut config = Config::from_urls(&[server.url()]);
        config.validator.network_timeout_ms = 2_000;
        let pool = Arc::new(RpcPool::new(&config.rpc));
        let validator = TokenValidator::new(
            pool,
            Arc::new(PipelineTelemetry::new()),
            config.validator.clone(),
        );

        let check = validator.validate(&Pubkey::new_unique()).await;
        assert!(!check.valid);
        assert_eq!(check.tier, ValidationTier::Network);
    }

    #[tokio::test]
    async fn test_cache_tier_short_circuits() {
        let validator = offline_validator();
        let mint = Pubkey::new_unique();

        validator.cache.insert(
            mint,
            CacheEntry {
                valid: true,
                confidence: 0.9,
                cached_at: Instant::now(),
            },
        );

        let check = validator.validate(&mint).await;
        assert_eq!(check.tier, ValidationTier::Cache);
        assert!(check.valid);
    }

    #[tokio::test]
    async fn test_cache_eviction_respects_capacity() {
        let mut config = Config::from_urls(&["http://127.0.0.1:1".to_string()]);
        config.validator.cache_capacity = 4;
        let pool = Arc::new(RpcPool::new(&config.rpc));
        let validator = TokenValidator::new(
            pool,
            Arc::new(PipelineTelemetry::new()),
            config.validator.clone(),
        );

        for _ in 0..10 {
            validator.cache_result(
                Pubkey::new_unique(),
                &TokenCheck {
                    valid: true,
                    confidence: 0.5,
                    tier: ValidationTier::Network,
                },
            );
        }

        assert!(validator.cache_size() <= 4);
    }

    #[test]
    fn test_in_flight_table_sizes_stay_equal() {
        let table = InFlightTable::default();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();

        assert!(table.begin(a));
        assert!(table.begin(b));
        assert!(!table.begin(a), "duplicate begin must be refused");
        assert_eq!(table.sizes(), (2, 2));

        table.finish(&a);
        assert_eq!(table.sizes(), (1, 1));

        table.finish(&b);
        assert_eq!(table.sizes(), (0, 0));
    }

    #[test]
    fn test_in_flight_cleanup_removes_only_expired() {
        let table = InFlightTable::default();
        let stale = Pubkey::new_unique();
        let fresh = Pubkey::new_unique();

        table.begin(stale);
        std::thread::sleep(Duration::from_millis(30));
        table.begin(fresh);

        let removed = table.cleanup_expired(Duration::from_millis(20));
        assert_eq!(removed, 1);
        assert_eq!(table.sizes(), (1, 1));
    }
}
