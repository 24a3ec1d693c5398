//! Pipeline telemetry with atomic counters for zero-overhead hot-path tracking

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by every pipeline stage; snapshot on demand
#[derive(Debug, Default)]
pub struct PipelineTelemetry {
    /// Signatures returned by protocol listings
    pub signatures_seen: AtomicU64,
    /// Signatures dropped as duplicates or already processed
    pub signatures_deduped: AtomicU64,
    /// Full transaction bodies served from the signature cache
    pub tx_cache_hits: AtomicU64,
    /// Transaction fetches that failed (skipped, not fatal)
    pub fetch_errors: AtomicU64,
    /// Instructions inspected by the parser
    pub instructions_parsed: AtomicU64,
    /// Instructions whose program is not in the dispatch table
    pub unrecognized_programs: AtomicU64,
    /// Recognized-program instructions that yielded no candidate
    pub no_candidate: AtomicU64,
    /// Candidates produced by the structural heuristic
    pub heuristic_candidates: AtomicU64,
    /// Validation results served from the cache
    pub validation_cache_hits: AtomicU64,
    /// Validations coalesced onto an already-running lookup
    pub validations_coalesced: AtomicU64,
    /// Network validations that timed out (permissive fallback taken)
    pub validation_timeouts: AtomicU64,
    /// Candidates discarded below the confidence floor
    pub below_floor: AtomicU64,
    /// Candidates emitted to the consumer
    pub candidates_emitted: AtomicU64,
}

/// Serializable point-in-time view of the counters
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub signatures_seen: u64,
    pub signatures_deduped: u64,
    pub tx_cache_hits: u64,
    pub fetch_errors: u64,
    pub instructions_parsed: u64,
    pub unrecognized_programs: u64,
    pub no_candidate: u64,
    pub heuristic_candidates: u64,
    pub validation_cache_hits: u64,
    pub validations_coalesced: u64,
    pub validation_timeouts: u64,
    pub below_floor: u64,
    pub candidates_emitted: u64,
}

impl PipelineTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            signatures_seen: self.signatures_seen.load(Ordering::Relaxed),
            signatures_deduped: self.signatures_deduped.load(Ordering::Relaxed),
            tx_cache_hits: self.tx_cache_hits.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            instructions_parsed: self.instructions_parsed.load(Ordering::Relaxed),
            unrecognized_programs: self.unrecognized_programs.load(Ordering::Relaxed),
            no_candidate: self.no_candidate.load(Ordering::Relaxed),
            heuristic_candidates: self.heuristic_candidates.load(Ordering::Relaxed),
            validation_cache_hits: self.validation_cache_hits.load(Ordering::Relaxed),
            validations_coalesced: self.validations_coalesced.load(Ordering::Relaxed),
            validation_timeouts: self.validation_timeouts.load(Ordering::Relaxed),
            below_floor: self.below_floor.load(Ordering::Relaxed),
            candidates_emitted: self.candidates_emitted.load(Ordering::Relaxed),
        }
    }
}
