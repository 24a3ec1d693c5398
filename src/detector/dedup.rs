//! Cross-protocol signature deduplication and recency ordering

use crate::types::SignatureInfo;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Merges the per-protocol signature listings of one poll cycle into a
/// unique, recency-ordered work list, and tracks signatures already handed
/// to the parser so earlier cycles are not reprocessed.
#[derive(Debug)]
pub struct SignatureDeduper {
    processed: DashMap<String, Instant>,
    seen_ttl: Duration,
}

impl SignatureDeduper {
    pub fn new(seen_ttl: Duration) -> Self {
        Self {
            processed: DashMap::new(),
            seen_ttl,
        }
    }

    /// Merge listings from all protocols: duplicates collapse with
    /// last-seen-wins, the unique set is ordered by descending recency
    /// (slot, then block time).
    pub fn merge(&self, listings: Vec<Vec<SignatureInfo>>) -> Vec<SignatureInfo> {
        let mut unique: HashMap<String, SignatureInfo> = HashMap::new();
        for listing in listings {
            for info in listing {
                unique.insert(info.signature.clone(), info);
            }
        }

        let mut merged: Vec<SignatureInfo> = unique.into_values().collect();
        merged.sort_by(|a, b| {
            b.slot
                .cmp(&a.slot)
                .then_with(|| b.block_time.cmp(&a.block_time))
        });
        merged
    }

    /// Drop signatures already handed off in a previous cycle and mark the
    /// remainder as processed.
    pub fn filter_fresh(&self, merged: Vec<SignatureInfo>) -> Vec<SignatureInfo> {
        self.prune();

        let now = Instant::now();
        merged
            .into_iter()
            .filter(|info| {
                if self.processed.contains_key(&info.signature) {
                    false
                } else {
                    self.processed.insert(info.signature.clone(), now);
                    true
                }
            })
            .collect()
    }

    /// Number of signatures currently tracked as processed
    pub fn tracked(&self) -> usize {
        self.processed.len()
    }

    fn prune(&self) {
        let ttl = self.seen_ttl;
        self.processed.retain(|_, seen_at| seen_at.elapsed() < ttl);
    }
}
