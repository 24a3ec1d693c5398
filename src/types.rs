//! Common types shared across the transport layer and the detection pipeline

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use solana_sdk::pubkey::Pubkey;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};

/// DEX protocol a candidate originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Raydium,
    PumpFun,
    Orca,
    /// Program not in the dispatch table; recorded and skipped
    Unknown,
}

impl Protocol {
    /// Protocols the pipeline actively polls
    pub const ACTIVE: [Protocol; 3] = [Protocol::Raydium, Protocol::PumpFun, Protocol::Orca];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Raydium => "raydium",
            Protocol::PumpFun => "pumpfun",
            Protocol::Orca => "orca",
            Protocol::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature listing entry returned by the per-program recent-transaction poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub protocol: Protocol,
}

/// Account references of an instruction as delivered by the fetch encoding.
///
/// `getTransaction` returns either raw indices into the transaction's
/// account-key list or already-resolved addresses depending on the encoding
/// mode. The parser normalizes `Addresses` back to indices before any
/// layout-based extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRefs {
    Indices(SmallVec<[u8; 16]>),
    Addresses(Vec<Pubkey>),
}

impl AccountRefs {
    pub fn len(&self) -> usize {
        match self {
            AccountRefs::Indices(v) => v.len(),
            AccountRefs::Addresses(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single decoded instruction
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Program this instruction targets
    pub program: Pubkey,
    /// Opaque instruction payload (base58-decoded)
    pub data: Vec<u8>,
    /// Account references in fetch-mode encoding
    pub accounts: AccountRefs,
}

/// Immutable transaction body as fetched from an endpoint
#[derive(Debug, Clone)]
pub struct RawTransaction {
    /// Unique key
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    /// Ordered account-key list; instruction indices point into this
    pub account_keys: Vec<Pubkey>,
    /// Ordered instruction list
    pub instructions: Vec<Instruction>,
}

/// How a candidate was identified by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Matched a known discriminator in the operation table
    Discriminator,
    /// Passed the structural heuristic for an unknown discriminator
    Heuristic,
}

/// A detected liquidity-pool creation, finalized by the scorer before emission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCandidate {
    pub protocol: Protocol,
    /// Newly launched token mint
    pub primary_mint: Pubkey,
    /// Quote-side mint the pool pairs against
    pub secondary_mint: Pubkey,
    /// Pool / AMM / bonding-curve address
    pub pool_address: Pubkey,
    /// Combined confidence, 0.0 - 1.0; set by the scorer
    pub confidence: f64,
    pub provenance: Provenance,
    /// Signature of the transaction that created the pool
    pub signature: String,
    pub slot: u64,
    /// Unix timestamp (seconds) when the pipeline surfaced the candidate
    pub discovered_at: u64,
}

impl PoolCandidate {
    pub fn stamp_discovery(&mut self) {
        self.discovered_at = unix_now_secs();
    }
}

/// Wall-clock seconds since the Unix epoch
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Receiver side of the candidate emission channel
pub type CandidateReceiver = mpsc::UnboundedReceiver<PoolCandidate>;

/// Sender side of the candidate emission channel
pub type CandidateSender = mpsc::UnboundedSender<PoolCandidate>;

/// Endpoint health transition, emitted for observability collaborators
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Degraded { url: String },
    Recovered { url: String },
}

/// Receiver for endpoint health transitions
pub type EndpointEventReceiver = broadcast::Receiver<EndpointEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Raydium.to_string(), "raydium");
        assert_eq!(Protocol::PumpFun.to_string(), "pumpfun");
        assert_eq!(Protocol::Orca.to_string(), "orca");
    }

    #[test]
    fn test_account_refs_len() {
        let idx = AccountRefs::Indices(SmallVec::from_slice(&[0, 1, 2]));
        assert_eq!(idx.len(), 3);
        assert!(!idx.is_empty());

        let addrs = AccountRefs::Addresses(vec![]);
        assert!(addrs.is_empty());
    }

    #[test]
    fn test_candidate_discovery_stamp() {
        let mut candidate = PoolCandidate {
            protocol: Protocol::PumpFun,
            primary_mint: Pubkey::new_unique(),
            secondary_mint: Pubkey::new_unique(),
            pool_address: Pubkey::new_unique(),
            confidence: 0.0,
            provenance: Provenance::Discriminator,
            signature: "sig".to_string(),
            slot: 42,
            discovered_at: 0,
        };

        candidate.stamp_discovery();
        assert!(candidate.discovered_at > 0);
    }
}
