//! Per-endpoint circuit breaker state machine

use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Breaker state, owned exclusively by its endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// CLOSED → OPEN after `failure_threshold` failures inside the rolling
/// window; OPEN → HALF_OPEN once `recovery_timeout` elapses (single trial
/// call); HALF_OPEN → CLOSED on success, → OPEN with timer reset on failure.
///
/// `record_success` / `record_failure` are the only mutators that complete a
/// transition; `can_pass` is a pure read. The pool claims the HALF_OPEN
/// trial through `try_acquire`, which performs the due OPEN→HALF_OPEN move
/// atomically so exactly one probe is admitted.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicCell<BreakerState>,
    opened_at: Mutex<Instant>,
    failures: Mutex<VecDeque<Instant>>,
    failure_threshold: usize,
    failure_window: Duration,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(
        failure_threshold: usize,
        failure_window: Duration,
        recovery_timeout: Duration,
    ) -> Self {
        Self {
            state: AtomicCell::new(BreakerState::Closed),
            opened_at: Mutex::new(Instant::now()),
            failures: Mutex::new(VecDeque::new()),
            failure_threshold: failure_threshold.max(1),
            failure_window,
            recovery_timeout,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state.load()
    }

    /// Pure read: would a call be admitted right now?
    ///
    /// OPEN reports passable once the recovery timeout has elapsed (a trial
    /// is due); the actual transition happens in `try_acquire`.
    pub fn can_pass(&self) -> bool {
        match self.state.load() {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => self.opened_at.lock().elapsed() >= self.recovery_timeout,
        }
    }

    /// Claim admission for one call. CLOSED admits freely; a due OPEN
    /// breaker moves to HALF_OPEN and admits exactly the caller that won the
    /// transition; HALF_OPEN rejects further callers while the probe is out.
    pub fn try_acquire(&self) -> bool {
        match self.state.load() {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                if self.opened_at.lock().elapsed() < self.recovery_timeout {
                    return false;
                }
                let won = self
                    .state
                    .compare_exchange(BreakerState::Open, BreakerState::HalfOpen)
                    .is_ok();
                if won {
                    debug!("breaker half-open, admitting trial call");
                }
                won
            }
        }
    }

    pub fn record_success(&self) {
        match self.state.load() {
            BreakerState::HalfOpen => {
                self.state.store(BreakerState::Closed);
                self.failures.lock().clear();
                debug!("breaker closed after successful trial");
            }
            BreakerState::Closed => {
                self.failures.lock().clear();
            }
            // A late success from a call issued before the breaker opened
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        match self.state.load() {
            BreakerState::HalfOpen => {
                self.open_at(now);
                debug!("trial call failed, breaker re-opened");
            }
            BreakerState::Closed => {
                let mut failures = self.failures.lock();
                failures.push_back(now);
                while let Some(&oldest) = failures.front() {
                    if now.duration_since(oldest) > self.failure_window {
                        failures.pop_front();
                    } else {
                        break;
                    }
                }
                if failures.len() >= self.failure_threshold {
                    drop(failures);
                    self.open_at(now);
                    debug!(
                        threshold = self.failure_threshold,
                        "failure threshold reached, breaker opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    fn open_at(&self, now: Instant) {
        *self.opened_at.lock() = now;
        self.state.store(BreakerState::Open);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            threshold,
            Duration::from_secs(10),
            Duration::from_millis(recovery_ms),
        )
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let b = breaker(3, 1_000);
        assert_eq!(b.state(), BreakerState::Closed);

        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.can_pass());

        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.can_pass());
        assert!(!b.try_acquire());
    }

    #[test]
    fn test_success_resets_failure_window() {
        let b = breaker(3, 1_000);

        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();

        // Never reached three failures without an intervening success
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_trial_then_closed() {
        let b = breaker(2, 20);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert!(b.can_pass());

        // First caller wins the trial, the second is rejected
        assert!(b.try_acquire());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.try_acquire());

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.try_acquire());
    }

    #[test]
    fn test_half_open_failure_reopens_with_timer_reset() {
        let b = breaker(2, 40);
        b.record_failure();
        b.record_failure();

        std::thread::sleep(Duration::from_millis(50));
        assert!(b.try_acquire());
        b.record_failure();

        assert_eq!(b.state(), BreakerState::Open);
        // Timer was reset: not passable again immediately
        assert!(!b.can_pass());

        std::thread::sleep(Duration::from_millis(50));
        assert!(b.can_pass());
    }

    #[test]
    fn test_can_pass_is_side_effect_free() {
        let b = breaker(1, 10);
        b.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        // Repeated reads never consume the trial or change state
        for _ in 0..5 {
            assert!(b.can_pass());
            assert_eq!(b.state(), BreakerState::Open);
        }
    }

    #[test]
    fn test_only_one_concurrent_probe() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let b = Arc::new(breaker(1, 10));
        b.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        let admitted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let b = b.clone();
            let admitted = admitted.clone();
            handles.push(std::thread::spawn(move || {
                if b.try_acquire() {
                    admitted.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::Relaxed), 1);
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }
}
