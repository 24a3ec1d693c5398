//! Endpoint registry entry: keep-alive transport, health stats, breaker, bucket

use super::breaker::{BreakerState, CircuitBreaker};
use super::token_bucket::TokenBucket;
use crate::config::RpcConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// EWMA smoothing factor: 20% weight to new samples
const EWMA_ALPHA: f64 = 0.2;

/// Lock-free request statistics for a single endpoint
#[derive(Debug, Default)]
pub struct EndpointStats {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub consecutive_errors: AtomicU64,
    /// EWMA latency in microseconds
    ewma_latency_us: AtomicU64,
}

impl EndpointStats {
    pub fn record_success(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Relaxed);
        self.update_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
        self.update_latency(latency);
    }

    fn update_latency(&self, latency: Duration) {
        let sample = latency.as_micros() as u64;
        let prev = self.ewma_latency_us.load(Ordering::Relaxed);
        let next = if prev == 0 {
            sample
        } else {
            (EWMA_ALPHA * sample as f64 + (1.0 - EWMA_ALPHA) * prev as f64) as u64
        };
        self.ewma_latency_us.store(next, Ordering::Relaxed);
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let errors = self.total_errors.load(Ordering::Relaxed);
        (total - errors) as f64 / total as f64
    }

    pub fn ewma_latency_ms(&self) -> f64 {
        self.ewma_latency_us.load(Ordering::Relaxed) as f64 / 1_000.0
    }
}

/// A configured RPC endpoint. Created at startup, never destroyed; health
/// and breaker state mutate on every call outcome.
#[derive(Debug)]
pub struct Endpoint {
    pub url: String,
    pub priority: u8,
    pub client: reqwest::Client,
    pub breaker: CircuitBreaker,
    pub bucket: TokenBucket,
    pub stats: EndpointStats,
    /// Concurrent-socket cap; acquisition is bounded by the queue deadline
    pub permits: Semaphore,
}

impl Endpoint {
    pub fn new(url: String, priority: u8, config: &RpcConfig) -> Self {
        // Persistent keep-alive transport: warm connections are reused
        // across calls, capped per endpoint
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .pool_max_idle_per_host(config.max_sockets_per_endpoint)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            url,
            priority,
            client,
            breaker: CircuitBreaker::new(
                config.breaker.failure_threshold,
                Duration::from_millis(config.breaker.failure_window_ms),
                Duration::from_millis(config.breaker.recovery_timeout_ms),
            ),
            bucket: TokenBucket::new(&config.bucket),
            stats: EndpointStats::default(),
            permits: Semaphore::new(config.max_sockets_per_endpoint),
        }
    }

    /// Rolling health score in 0.0..=100.0, combining success rate and EWMA
    /// latency. Read by the selection loop to skip degraded endpoints.
    pub fn health_score(&self) -> f64 {
        let mut score = 100.0;

        let latency_penalty = (self.stats.ewma_latency_ms() / 10.0).min(50.0);
        score -= latency_penalty;

        score += (self.stats.success_rate() - 0.5) * 40.0;

        let consecutive = self.stats.consecutive_errors.load(Ordering::Relaxed) as f64;
        score -= (consecutive * 10.0).min(30.0);

        score.clamp(0.0, 100.0)
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}

/// Point-in-time endpoint summary for the pool stats surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct EndpointSnapshot {
    pub url: String,
    pub priority: u8,
    pub breaker: &'static str,
    pub health_score: f64,
    pub success_rate: f64,
    pub ewma_latency_ms: f64,
    pub total_requests: u64,
    pub in_flight: usize,
}

impl Endpoint {
    pub fn snapshot(&self, max_permits: usize) -> EndpointSnapshot {
        EndpointSnapshot {
            url: self.url.clone(),
            priority: self.priority,
            breaker: self.breaker.state().as_str(),
            health_score: self.health_score(),
            success_rate: self.stats.success_rate(),
            ewma_latency_ms: self.stats.ewma_latency_ms(),
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            in_flight: max_permits.saturating_sub(self.permits.available_permits()),
        }
    }
}
