//! Resilient multi-endpoint transport layer
//!
//! Endpoint registry with keep-alive connection reuse, per-endpoint circuit
//! breaking and token-bucket admission, round-robin rotation, and bounded
//! failover across endpoints.

pub mod breaker;
pub mod endpoint;
pub mod errors;
pub mod pool;
pub mod token_bucket;

pub use breaker::{BreakerState, CircuitBreaker};
pub use endpoint::{Endpoint, EndpointSnapshot, EndpointStats};
pub use errors::RpcError;
pub use pool::{PoolStats, RpcPool};
pub use token_bucket::TokenBucket;
