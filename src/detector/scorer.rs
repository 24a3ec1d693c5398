//! Candidate assembly: weighted confidence combination and thresholding

use super::validator::TokenCheck;
use crate::config::ScoringConfig;
use crate::types::PoolCandidate;
use tracing::debug;

/// What to do with a scored candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreDecision {
    Emit,
    /// Combined confidence under the configured floor
    BelowFloor,
    /// A token failed validation outright
    InvalidToken,
}

/// Combines the parser's structural confidence (dominant) with both token
/// validations (secondary) into the candidate's final confidence.
#[derive(Debug)]
pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Finalize a candidate in place. On entry `candidate.confidence` holds
    /// the parser's structural confidence; on exit it holds the combined
    /// score and the discovery timestamp is set.
    pub fn finalize(
        &self,
        candidate: &mut PoolCandidate,
        primary: &TokenCheck,
        secondary: &TokenCheck,
    ) -> ScoreDecision {
        if !primary.valid || !secondary.valid {
            debug!(
                signature = %candidate.signature,
                primary_valid = primary.valid,
                secondary_valid = secondary.valid,
                "candidate discarded, token failed validation"
            );
            return ScoreDecision::InvalidToken;
        }

        let combined = self.config.parser_weight * candidate.confidence
            + self.config.validator_weight * primary.confidence
            + self.config.validator_weight * secondary.confidence;

        candidate.confidence = combined.clamp(0.0, 1.0);
        candidate.stamp_discovery();

        if candidate.confidence >= self.config.confidence_floor {
            ScoreDecision::Emit
        } else {
            debug!(
                signature = %candidate.signature,
                confidence = candidate.confidence,
                floor = self.config.confidence_floor,
                "analyzed, no candidate"
            );
            ScoreDecision::BelowFloor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::validator::ValidationTier;
    use crate::types::{Protocol, Provenance};
    use solana_sdk::pubkey::Pubkey;

    fn candidate(parser_confidence: f64) -> PoolCandidate {
        PoolCandidate {
            protocol: Protocol::Raydium,
            primary_mint: Pubkey::new_unique(),
            secondary_mint: Pubkey::new_unique(),
            pool_address: Pubkey::new_unique(),
            confidence: parser_confidence,
            provenance: Provenance::Discriminator,
            signature: "sig".to_string(),
            slot: 1,
            discovered_at: 0,
        }
    }

    fn check(valid: bool, confidence: f64) -> TokenCheck {
        TokenCheck {
            valid,
            confidence,
            tier: ValidationTier::Network,
        }
    }

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(ScoringConfig::default())
    }

    #[test]
    fn test_high_confidence_candidate_emits() {
        let mut c = candidate(0.95);
        let decision = scorer().finalize(&mut c, &check(true, 0.9), &check(true, 1.0));

        assert_eq!(decision, ScoreDecision::Emit);
        // 0.6 * 0.95 + 0.2 * 0.9 + 0.2 * 1.0 = 0.95
        assert!((c.confidence - 0.95).abs() < 1e-9);
        assert!(c.discovered_at > 0);
    }

    #[test]
    fn test_heuristic_with_weak_validation_stays_below_floor() {
        let mut c = candidate(0.55);
        let decision = scorer().finalize(&mut c, &check(true, 0.4), &check(true, 0.4));

        // 0.6 * 0.55 + 0.2 * 0.4 + 0.2 * 0.4 = 0.49
        assert_eq!(decision, ScoreDecision::BelowFloor);
        assert!(c.confidence < 0.65);
    }

    #[test]
    fn test_heuristic_with_strong_validation_clears_floor() {
        let mut c = candidate(0.55);
        let decision = scorer().finalize(&mut c, &check(true, 0.9), &check(true, 1.0));

        // 0.6 * 0.55 + 0.2 * 0.9 + 0.2 * 1.0 = 0.71
        assert_eq!(decision, ScoreDecision::Emit);
    }

    #[test]
    fn test_invalid_token_discards_candidate() {
        let mut c = candidate(0.95);
        let decision = scorer().finalize(&mut c, &check(false, 0.8), &check(true, 1.0));

        assert_eq!(decision, ScoreDecision::InvalidToken);
        // Confidence untouched: the candidate was discarded, not rescored
        assert!((c.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_custom_floor_is_respected() {
        let scorer = ConfidenceScorer::new(ScoringConfig {
            confidence_floor: 0.96,
            ..ScoringConfig::default()
        });

        let mut c = candidate(0.95);
        let decision = scorer.finalize(&mut c, &check(true, 0.9), &check(true, 1.0));
        assert_eq!(decision, ScoreDecision::BelowFloor);
    }
}
