//! Pipeline coordination: per-protocol polling loops driving
//! fetch → dedup → parse → validate → score → emit
//!
//! One loop per protocol runs as its own task; each cycle fans transaction
//! fetches out in parallel and awaits them all before parsing (concurrent
//! fan-out, synchronous fan-in). A slow cycle only delays its own next tick.

use super::dedup::SignatureDeduper;
use super::fetcher::TransactionFetcher;
use super::parser::{InstructionParser, ParseOutcome};
use super::scorer::{ConfidenceScorer, ScoreDecision};
use super::telemetry::PipelineTelemetry;
use super::validator::TokenValidator;
use crate::config::Config;
use crate::rpc::RpcPool;
use crate::types::{CandidateSender, Protocol, Provenance, RawTransaction};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything the pipeline components need, wired once at construction and
/// passed explicitly; no module singletons.
pub struct DetectorContext {
    pub pool: Arc<RpcPool>,
    pub fetcher: Arc<TransactionFetcher>,
    pub deduper: Arc<SignatureDeduper>,
    pub parser: Arc<InstructionParser>,
    pub validator: Arc<TokenValidator>,
    pub scorer: Arc<ConfidenceScorer>,
    pub telemetry: Arc<PipelineTelemetry>,
    pub config: Config,
}

impl DetectorContext {
    pub fn new(config: Config) -> Self {
        let telemetry = Arc::new(PipelineTelemetry::new());
        let pool = Arc::new(RpcPool::new(&config.rpc));
        let fetcher = Arc::new(TransactionFetcher::new(
            pool.clone(),
            telemetry.clone(),
            Duration::from_millis(config.protocols.tx_cache_ttl_ms),
        ));
        let deduper = Arc::new(SignatureDeduper::new(Duration::from_millis(
            config.protocols.seen_ttl_ms,
        )));
        let validator = Arc::new(TokenValidator::new(
            pool.clone(),
            telemetry.clone(),
            config.validator.clone(),
        ));
        let scorer = Arc::new(ConfidenceScorer::new(config.scoring.clone()));

        Self {
            pool,
            fetcher,
            deduper,
            parser: Arc::new(InstructionParser::new()),
            validator,
            scorer,
            telemetry,
            config,
        }
    }
}

pub struct PipelineCoordinator {
    ctx: Arc<DetectorContext>,
    candidate_tx: CandidateSender,
    running: Arc<AtomicBool>,
}

impl PipelineCoordinator {
    pub fn new(ctx: Arc<DetectorContext>, candidate_tx: CandidateSender) -> Self {
        Self {
            ctx,
            candidate_tx,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Spawn one polling loop per active protocol
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        Protocol::ACTIVE
            .iter()
            .map(|&protocol| {
                let ctx = self.ctx.clone();
                let tx = self.candidate_tx.clone();
                let running = self.running.clone();
                tokio::spawn(async move {
                    run_protocol_loop(ctx, protocol, tx, running).await;
                })
            })
            .collect()
    }

    /// Request a graceful stop; loops exit at their next tick
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        info!("pipeline shutdown requested");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// One poll cycle for one protocol; public so callers can drive the
    /// pipeline without the timer loops
    pub async fn run_cycle(&self, protocol: Protocol) {
        run_cycle(&self.ctx, protocol, &self.candidate_tx).await;
    }
}

async fn run_protocol_loop(
    ctx: Arc<DetectorContext>,
    protocol: Protocol,
    candidate_tx: CandidateSender,
    running: Arc<AtomicBool>,
) {
    let poll = ctx.config.protocols.for_protocol(protocol);
    let mut ticker = tokio::time::interval(Duration::from_millis(poll.interval_ms));
    // A slow cycle delays the next one instead of bunching ticks
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(protocol = %protocol, interval_ms = poll.interval_ms, "polling loop started");

    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        run_cycle(&ctx, protocol, &candidate_tx).await;
        ctx.fetcher.prune_cache();
    }

    info!(protocol = %protocol, "polling loop stopped");
}

async fn run_cycle(ctx: &DetectorContext, protocol: Protocol, candidate_tx: &CandidateSender) {
    let poll = ctx.config.protocols.for_protocol(protocol);

    let listing = match ctx.fetcher.list_signatures(protocol, poll.batch_limit).await {
        Ok(listing) => listing,
        Err(err) => {
            warn!(protocol = %protocol, error = %err, "signature listing failed");
            return;
        }
    };

    let merged = ctx.deduper.merge(vec![listing]);
    let merged_len = merged.len();
    let fresh = ctx.deduper.filter_fresh(merged);
    PipelineTelemetry::add(
        &ctx.telemetry.signatures_deduped,
        (merged_len - fresh.len()) as u64,
    );
    if fresh.is_empty() {
        return;
    }

    debug!(protocol = %protocol, count = fresh.len(), "fetching transaction bodies");

    // Concurrent fan-out, synchronous fan-in
    let bodies = join_all(fresh.iter().map(|info| ctx.fetcher.fetch_transaction(info))).await;

    for tx in bodies.into_iter().flatten() {
        process_transaction(ctx, &tx, candidate_tx).await;
    }
}

async fn process_transaction(
    ctx: &DetectorContext,
    tx: &RawTransaction,
    candidate_tx: &CandidateSender,
) {
    for ix in &tx.instructions {
        PipelineTelemetry::incr(&ctx.telemetry.instructions_parsed);

        let mut candidate = match ctx.parser.parse(tx, ix) {
            ParseOutcome::Candidate(candidate) => candidate,
            ParseOutcome::NoCandidate(reason) => {
                PipelineTelemetry::incr(&ctx.telemetry.no_candidate);
                debug!(signature = %tx.signature, ?reason, "analyzed, no candidate");
                continue;
            }
            ParseOutcome::Unrecognized => {
                PipelineTelemetry::incr(&ctx.telemetry.unrecognized_programs);
                continue;
            }
        };

        if candidate.provenance == Provenance::Heuristic {
            PipelineTelemetry::incr(&ctx.telemetry.heuristic_candidates);
        }

        let (primary, secondary) = tokio::join!(
            ctx.validator.validate(&candidate.primary_mint),
            ctx.validator.validate(&candidate.secondary_mint),
        );

        match ctx.scorer.finalize(&mut candidate, &primary, &secondary) {
            ScoreDecision::Emit => {
                PipelineTelemetry::incr(&ctx.telemetry.candidates_emitted);
                info!(
                    protocol = %candidate.protocol,
                    mint = %candidate.primary_mint,
                    pool = %candidate.pool_address,
                    confidence = candidate.confidence,
                    provenance = ?candidate.provenance,
                    "candidate detected"
                );
                if candidate_tx.send(candidate).is_err() {
                    warn!("candidate consumer dropped, emission skipped");
                }
            }
            ScoreDecision::BelowFloor => {
                PipelineTelemetry::incr(&ctx.telemetry.below_floor);
            }
            ScoreDecision::InvalidToken => {
                PipelineTelemetry::incr(&ctx.telemetry.no_candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_coordinator_shutdown_stops_loops() {
        let mut config = Config::from_urls(&["http://127.0.0.1:1".to_string()]);
        config.rpc.failover_budget_ms = 50;
        config.protocols.raydium.interval_ms = 10;
        config.protocols.pumpfun.interval_ms = 10;
        config.protocols.orca.interval_ms = 10;

        let ctx = Arc::new(DetectorContext::new(config));
        let (tx, _rx) = mpsc::unbounded_channel();
        let coordinator = PipelineCoordinator::new(ctx, tx);

        let handles = coordinator.start();
        assert!(coordinator.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.shutdown();

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("loop must stop after shutdown")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_cycle_survives_listing_failure() {
        let mut config = Config::from_urls(&["http://127.0.0.1:1".to_string()]);
        config.rpc.failover_budget_ms = 50;

        let ctx = Arc::new(DetectorContext::new(config));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = PipelineCoordinator::new(ctx, tx);

        // Unreachable endpoint: the cycle logs and returns, nothing panics
        coordinator.run_cycle(Protocol::Raydium).await;
        assert!(rx.try_recv().is_err());
    }
}
