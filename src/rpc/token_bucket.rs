//! Token-bucket admission control with bounded burst

use crate::config::BucketConfig;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    burst_until: Option<Instant>,
    cooldown_until: Option<Instant>,
}

/// Non-blocking rate limiter with continuous time-based refill.
///
/// Refill is computed from elapsed wall time, so calling `try_consume` at any
/// frequency yields the same admission curve. Burst mode raises capacity to
/// `capacity * burst_multiplier` for a bounded duration; once it expires the
/// level decays back to steady-state capacity and a cooldown must pass before
/// burst can be armed again.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate_per_sec: f64,
    capacity: f64,
    burst_capacity: f64,
    burst_duration: Duration,
    burst_cooldown: Duration,
}

impl TokenBucket {
    pub fn new(config: &BucketConfig) -> Self {
        let capacity = config.capacity.max(1.0);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                burst_until: None,
                cooldown_until: None,
            }),
            rate_per_sec: config.rate_per_sec,
            capacity,
            burst_capacity: capacity * config.burst_multiplier.max(1.0),
            burst_duration: Duration::from_millis(config.burst_duration_ms),
            burst_cooldown: Duration::from_millis(config.burst_cooldown_ms),
        }
    }

    /// Try to consume `n` tokens. O(1), never blocks, never drives the level
    /// negative.
    pub fn try_consume(&self, n: f64) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.refill(&mut state, now);

        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Arm burst mode if the cooldown has passed. Returns whether burst is
    /// now active (either freshly armed or already running).
    pub fn arm_burst(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.refill(&mut state, now);

        if state.burst_until.is_some_and(|until| now < until) {
            return true;
        }

        if state.cooldown_until.is_some_and(|until| now < until) {
            return false;
        }

        state.burst_until = Some(now + self.burst_duration);
        state.cooldown_until = Some(now + self.burst_duration + self.burst_cooldown);
        // Grant the extra headroom immediately
        state.tokens = self.burst_capacity;
        true
    }

    /// Current token level after refill; primarily for diagnostics
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.refill(&mut state, now);
        state.tokens
    }

    pub fn burst_active(&self) -> bool {
        let state = self.state.lock();
        state.burst_until.is_some_and(|until| Instant::now() < until)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let cap = if state.burst_until.is_some_and(|until| now < until) {
            self.burst_capacity
        } else {
            // Burst over: decay any excess back to steady-state capacity
            if state.burst_until.take().is_some() && state.tokens > self.capacity {
                state.tokens = self.capacity;
            }
            self.capacity
        };

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(cap);
    }
}
