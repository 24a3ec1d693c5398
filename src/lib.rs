//! Liquidity-pool creation detector for Solana DEX protocols
//!
//! Two tightly-coupled subsystems: a resilient multi-endpoint JSON-RPC
//! transport (connection pooling, per-endpoint circuit breaking,
//! token-bucket admission, bounded failover) and the detection pipeline
//! that consumes it (dedup, per-protocol instruction decoding, tiered token
//! validation, confidence scoring).

pub mod config;
pub mod detector;
pub mod rpc;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use detector::{DetectorContext, PipelineCoordinator};
pub use rpc::{RpcError, RpcPool};
pub use types::{CandidateReceiver, CandidateSender, PoolCandidate, Protocol};
