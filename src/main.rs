//! lp-sniffer entry point: configuration, tracing, pipeline wiring
//!
//! The binary wires the detector context, runs the polling loops, and logs
//! emitted candidates and endpoint health transitions. Consuming candidates
//! for trading is the job of downstream services.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::Parser;
use lp_sniffer::config::Config;
use lp_sniffer::detector::{DetectorContext, PipelineCoordinator};
use lp_sniffer::types::EndpointEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Telemetry snapshot interval in seconds (0 disables)
    #[arg(long, default_value = "30")]
    telemetry_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match Config::from_toml_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            warn!(path = %args.config, error = %err, "config file unusable, trying environment");
            Config::from_env().context("no usable configuration (file or LP_RPC_ENDPOINTS)")?
        }
    };

    info!(
        endpoints = config.rpc.endpoints.len(),
        failover_budget_ms = config.rpc.failover_budget_ms,
        "starting lp-sniffer"
    );

    let ctx = Arc::new(DetectorContext::new(config));
    let (candidate_tx, mut candidate_rx) = mpsc::unbounded_channel();
    let coordinator = Arc::new(PipelineCoordinator::new(ctx.clone(), candidate_tx));

    let mut endpoint_events = ctx.pool.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = endpoint_events.recv().await {
            match event {
                EndpointEvent::Degraded { url } => warn!(url = %url, "endpoint degraded"),
                EndpointEvent::Recovered { url } => info!(url = %url, "endpoint recovered"),
            }
        }
    });

    if args.telemetry_interval_secs > 0 {
        let telemetry = ctx.telemetry.clone();
        let pool = ctx.pool.clone();
        let interval = std::time::Duration::from_secs(args.telemetry_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = telemetry.snapshot();
                let stats = pool.stats();
                info!(
                    candidates = snapshot.candidates_emitted,
                    signatures = snapshot.signatures_seen,
                    cache_hits = snapshot.validation_cache_hits,
                    endpoints_open = stats.open,
                    "telemetry snapshot"
                );
            }
        });
    }

    let handles = coordinator.start();

    // The external consumer seam: downstream trading logic would take this
    // receiver; the binary just surfaces detections
    let consumer = tokio::spawn(async move {
        while let Some(candidate) = candidate_rx.recv().await {
            let discovered = chrono::DateTime::from_timestamp(candidate.discovered_at as i64, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            info!(
                protocol = %candidate.protocol,
                mint = %candidate.primary_mint,
                secondary = %candidate.secondary_mint,
                pool = %candidate.pool_address,
                confidence = format!("{:.2}", candidate.confidence),
                signature = %candidate.signature,
                discovered = %discovered,
                "new liquidity pool"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    coordinator.shutdown();
    for handle in handles {
        let _ = handle.await;
    }
    drop(coordinator);
    let _ = consumer.await;

    info!("lp-sniffer stopped");
    Ok(())
}
