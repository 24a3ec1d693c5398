// Detection pipeline components
pub mod dedup; // cross-protocol signature dedup + recency ordering
pub mod fetcher; // per-protocol signature listing + tx retrieval with TTL cache
pub mod parser; // discriminator tables, normalization, heuristic fallback
pub mod pipeline; // per-protocol polling loops, fan-out/fan-in, emission
pub mod scorer; // weighted confidence combination + floor
pub mod telemetry; // atomic counters, JSON snapshot
pub mod validator; // tiered token validation, caches, in-flight dedup

// Re-export commonly used types
pub use dedup::SignatureDeduper;
pub use fetcher::TransactionFetcher;
pub use parser::{InstructionParser, NoCandidateReason, ParseOutcome};
pub use pipeline::{DetectorContext, PipelineCoordinator};
pub use scorer::{ConfidenceScorer, ScoreDecision};
pub use telemetry::{PipelineTelemetry, TelemetrySnapshot};
pub use validator::{InFlightTable, TokenCheck, TokenValidator, ValidationTier};
