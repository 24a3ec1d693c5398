//! Multi-endpoint RPC pool with rotation, admission control, and bounded failover
//!
//! Selection is round-robin over the priority-ordered endpoint list,
//! restricted to endpoints whose breaker admits traffic and whose health
//! score has not collapsed. Failures rotate immediately to the next
//! eligible endpoint with no artificial delay, bounded by the overall
//! failover budget.

use super::endpoint::{Endpoint, EndpointSnapshot};
use super::errors::RpcError;
use crate::config::RpcConfig;
use crate::types::{EndpointEvent, EndpointEventReceiver};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::breaker::BreakerState;

/// Health score below which an endpoint is passed over while any better
/// peer is eligible
const SKIP_SCORE: f64 = 20.0;

/// Pause between full unsuccessful rotation passes
const ROTATION_BACKOFF_MS: u64 = 5;

/// Point-in-time pool summary for health-check collaborators
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub total_endpoints: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub endpoints: Vec<EndpointSnapshot>,
}

pub struct RpcPool {
    endpoints: Vec<Arc<Endpoint>>,
    cursor: AtomicUsize,
    failover_budget: Duration,
    queue_deadline: Duration,
    request_timeout_ms: u64,
    max_sockets: usize,
    request_id: AtomicU64,
    event_tx: broadcast::Sender<EndpointEvent>,
}

impl std::fmt::Debug for RpcPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPool")
            .field("endpoints", &self.endpoints.len())
            .field("failover_budget", &self.failover_budget)
            .finish_non_exhaustive()
    }
}

impl RpcPool {
    pub fn new(config: &RpcConfig) -> Self {
        let mut entries = config.endpoints.clone();
        entries.sort_by_key(|e| e.priority);

        let endpoints = entries
            .into_iter()
            .map(|entry| Arc::new(Endpoint::new(entry.url, entry.priority, config)))
            .collect();

        let (event_tx, _) = broadcast::channel(64);

        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            failover_budget: Duration::from_millis(config.failover_budget_ms),
            queue_deadline: Duration::from_millis(config.queue_deadline_ms),
            request_timeout_ms: config.request_timeout_ms,
            max_sockets: config.max_sockets_per_endpoint,
            request_id: AtomicU64::new(1),
            event_tx,
        }
    }

    /// Subscribe to endpoint degraded/recovered transitions
    pub fn subscribe_events(&self) -> EndpointEventReceiver {
        self.event_tx.subscribe()
    }

    /// Issue a JSON-RPC call, failing over across endpoints within the
    /// failover budget.
    ///
    /// Returns `AllEndpointsExhausted` only when every endpoint's breaker is
    /// OPEN with no trial due; any CLOSED or HALF_OPEN endpoint keeps the
    /// call rotating until the budget expires, at which point the last
    /// transport error is surfaced.
    #[instrument(skip(self, params), fields(method = method))]
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let budget_deadline = Instant::now() + self.failover_budget;
        let mut last_err: Option<RpcError> = None;

        loop {
            match self.select_endpoint() {
                Selection::Endpoint(endpoint) => {
                    let queue_deadline =
                        (Instant::now() + self.queue_deadline).min(budget_deadline);

                    if !self.admit(&endpoint, queue_deadline).await {
                        debug!(url = %endpoint.url, "admission queue deadline exceeded");
                        self.resolve_dangling_probe(&endpoint);
                        last_err = Some(RpcError::RateLimited {
                            endpoint: endpoint.url.clone(),
                        });
                    } else {
                        match self.call_endpoint(&endpoint, method, params.clone()).await {
                            Ok(result) => return Ok(result),
                            Err(err) if err.is_retryable() => {
                                debug!(url = %endpoint.url, error = %err, "attempt failed, rotating");
                                last_err = Some(err);
                            }
                            // Request-shaped errors will fail everywhere
                            Err(err) => return Err(err),
                        }
                    }
                }
                Selection::AllOpen { total, open } => {
                    warn!(total, open, "every endpoint breaker is open");
                    return Err(RpcError::AllEndpointsExhausted { total, open });
                }
                Selection::NoneEligible => {
                    // HALF_OPEN probes in flight or lost acquisition races;
                    // brief pause before the next pass
                    let jitter = fastrand::u64(0..ROTATION_BACKOFF_MS);
                    tokio::time::sleep(Duration::from_millis(ROTATION_BACKOFF_MS + jitter)).await;
                }
            }

            if Instant::now() >= budget_deadline {
                return Err(last_err.unwrap_or(RpcError::Timeout {
                    endpoint: "pool".to_string(),
                    timeout_ms: self.failover_budget.as_millis() as u64,
                }));
            }
        }
    }

    /// Round-robin selection among endpoints whose breaker admits traffic.
    /// Healthy-enough endpoints are preferred; a collapsed health score only
    /// defers an endpoint, it never excludes the last resort.
    fn select_endpoint(&self) -> Selection {
        let n = self.endpoints.len();
        let mut open = 0usize;
        let mut fallback: Option<Arc<Endpoint>> = None;

        for _ in 0..n {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            let endpoint = &self.endpoints[idx];

            if !endpoint.breaker.can_pass() {
                open += 1;
                continue;
            }

            if endpoint.health_score() < SKIP_SCORE && fallback.is_none() {
                fallback = Some(endpoint.clone());
                continue;
            }

            if endpoint.breaker.try_acquire() {
                return Selection::Endpoint(endpoint.clone());
            }
        }

        if let Some(endpoint) = fallback {
            if endpoint.breaker.try_acquire() {
                return Selection::Endpoint(endpoint);
            }
        }

        if open == n {
            Selection::AllOpen { total: n, open }
        } else {
            Selection::NoneEligible
        }
    }

    /// Token-bucket admission, queueing briefly up to the deadline.
    /// Saturation arms the bucket's burst headroom once before queueing.
    async fn admit(&self, endpoint: &Endpoint, deadline: Instant) -> bool {
        if endpoint.bucket.try_consume(1.0) {
            return true;
        }

        if endpoint.bucket.arm_burst() && endpoint.bucket.try_consume(1.0) {
            debug!(url = %endpoint.url, "burst armed for saturated bucket");
            return true;
        }

        while Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(2)).await;
            if endpoint.bucket.try_consume(1.0) {
                return true;
            }
        }

        false
    }

    /// One attempt against one endpoint over its keep-alive transport
    async fn call_endpoint(
        &self,
        endpoint: &Endpoint,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        // Socket cap: queue up to the admission deadline, then backpressure
        let permit = match tokio::time::timeout(self.queue_deadline, endpoint.permits.acquire())
            .await
        {
            Ok(permit) => permit.expect("endpoint semaphore is never closed"),
            Err(_) => {
                self.resolve_dangling_probe(endpoint);
                return Err(RpcError::RateLimited {
                    endpoint: endpoint.url.clone(),
                });
            }
        };

        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let started = Instant::now();
        let outcome = self.execute(endpoint, &body).await;
        let latency = started.elapsed();
        drop(permit);

        let state_before = endpoint.breaker.state();
        match &outcome {
            Ok(_) => {
                endpoint.breaker.record_success();
                endpoint.stats.record_success(latency);
            }
            Err(err) if err.counts_against_endpoint() => {
                endpoint.breaker.record_failure();
                endpoint.stats.record_failure(latency);
            }
            Err(_) => {
                // Application-level error: the endpoint answered, so a
                // HALF_OPEN trial still counts as transport recovery
                if endpoint.breaker.state() == BreakerState::HalfOpen {
                    endpoint.breaker.record_success();
                }
            }
        }
        self.emit_transition(endpoint, state_before);

        outcome
    }

    async fn execute(&self, endpoint: &Endpoint, body: &Value) -> Result<Value, RpcError> {
        let response = endpoint
            .client
            .post(&endpoint.url)
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError::from_http_error(&e, &endpoint.url, self.request_timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Rpc {
                endpoint: endpoint.url.clone(),
                code: status.as_u16() as i64,
                message: format!("HTTP {}", status),
            });
        }

        let payload: Value = response.json().await.map_err(|e| RpcError::InvalidResponse {
            message: e.to_string(),
        })?;

        if let Some(error) = payload.get("error") {
            return Err(RpcError::Rpc {
                endpoint: endpoint.url.clone(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse {
                message: "missing result field".to_string(),
            })
    }

    /// A selected endpoint may hold a claimed HALF_OPEN trial slot. If the
    /// trial never reaches the wire (local admission failed), the slot must
    /// be resolved or the breaker would reject every future probe. Local
    /// timeouts are treated as failures for breaker purposes: re-open with
    /// the timer reset.
    fn resolve_dangling_probe(&self, endpoint: &Endpoint) {
        if endpoint.breaker.state() == BreakerState::HalfOpen {
            endpoint.breaker.record_failure();
        }
    }

    fn emit_transition(&self, endpoint: &Endpoint, before: BreakerState) {
        let after = endpoint.breaker.state();
        if before == after {
            return;
        }
        match after {
            BreakerState::Open => {
                info!(url = %endpoint.url, "endpoint degraded");
                let _ = self.event_tx.send(EndpointEvent::Degraded {
                    url: endpoint.url.clone(),
                });
            }
            BreakerState::Closed if before == BreakerState::HalfOpen => {
                info!(url = %endpoint.url, "endpoint recovered");
                let _ = self.event_tx.send(EndpointEvent::Recovered {
                    url: endpoint.url.clone(),
                });
            }
            _ => {}
        }
    }

    /// Pool summary for the external health-check collaborator
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total_endpoints: self.endpoints.len(),
            closed: 0,
            open: 0,
            half_open: 0,
            endpoints: Vec::with_capacity(self.endpoints.len()),
        };

        for endpoint in &self.endpoints {
            match endpoint.breaker.state() {
                BreakerState::Closed => stats.closed += 1,
                BreakerState::Open => stats.open += 1,
                BreakerState::HalfOpen => stats.half_open += 1,
            }
            stats.endpoints.push(endpoint.snapshot(self.max_sockets));
        }

        stats
    }

    #[cfg(test)]
    pub(crate) fn endpoint(&self, idx: usize) -> &Arc<Endpoint> {
        &self.endpoints[idx]
    }
}

enum Selection {
    Endpoint(Arc<Endpoint>),
    AllOpen { total: usize, open: usize },
    NoneEligible,
}
