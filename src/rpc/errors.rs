//! Transport-layer error taxonomy

use thiserror::Error;

/// Errors surfaced by the RPC pool and its endpoints
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Connection / DNS level failure
    #[error("Network error: {message} (endpoint: {endpoint})")]
    Network { endpoint: String, message: String },

    /// Per-attempt timeout
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Local admission rejection: token bucket stayed empty past the queue deadline
    #[error("Rate limited locally (endpoint: {endpoint})")]
    RateLimited { endpoint: String },

    /// Fail-fast: breaker open, no attempt made
    #[error("Circuit open (endpoint: {endpoint})")]
    CircuitOpen { endpoint: String },

    /// Every endpoint's breaker is open; fatal for this call
    #[error("No available endpoints (total: {total}, open: {open})")]
    AllEndpointsExhausted { total: usize, open: usize },

    /// Error response from the RPC server itself
    #[error("RPC error {code}: {message} (endpoint: {endpoint})")]
    Rpc {
        endpoint: String,
        code: i64,
        message: String,
    },

    /// Response body did not match the expected JSON-RPC shape
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

impl RpcError {
    /// Whether the failover loop should rotate to the next endpoint
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Network { .. } => true,
            RpcError::Timeout { .. } => true,
            RpcError::RateLimited { .. } => true,
            RpcError::CircuitOpen { .. } => true,
            RpcError::AllEndpointsExhausted { .. } => false,
            // Server-side errors may clear up on a different endpoint;
            // request-shaped errors (invalid params, unknown method) will not
            RpcError::Rpc { code, .. } => {
                (-32099..=-32000).contains(code)
                    || *code == -32603
                    || *code == 429
                    || (500..600).contains(code)
            }
            RpcError::InvalidResponse { .. } => true,
        }
    }

    /// Whether the breaker should count this outcome as an endpoint failure
    pub fn counts_against_endpoint(&self) -> bool {
        match self {
            RpcError::Network { .. } | RpcError::Timeout { .. } => true,
            RpcError::Rpc { code, .. } => *code >= 500 && *code < 600,
            RpcError::InvalidResponse { .. } => true,
            // Local admission and fail-fast outcomes never touched the wire
            RpcError::RateLimited { .. }
            | RpcError::CircuitOpen { .. }
            | RpcError::AllEndpointsExhausted { .. } => false,
        }
    }

    /// The endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcError::Network { endpoint, .. } => Some(endpoint),
            RpcError::Timeout { endpoint, .. } => Some(endpoint),
            RpcError::RateLimited { endpoint } => Some(endpoint),
            RpcError::CircuitOpen { endpoint } => Some(endpoint),
            RpcError::Rpc { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Classify a reqwest failure against the endpoint that produced it
    pub fn from_http_error(err: &reqwest::Error, endpoint: &str, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            RpcError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms,
            }
        } else {
            RpcError::Network {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RpcError::Network {
            endpoint: "e".to_string(),
            message: "connection refused".to_string(),
        }
        .is_retryable());

        assert!(RpcError::Timeout {
            endpoint: "e".to_string(),
            timeout_ms: 2000,
        }
        .is_retryable());

        assert!(!RpcError::AllEndpointsExhausted { total: 3, open: 3 }.is_retryable());

        assert!(RpcError::Rpc {
            endpoint: "e".to_string(),
            code: 503,
            message: "unavailable".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_endpoint_failure_attribution() {
        // Local outcomes never count against the endpoint
        assert!(!RpcError::RateLimited {
            endpoint: "e".to_string()
        }
        .counts_against_endpoint());
        assert!(!RpcError::CircuitOpen {
            endpoint: "e".to_string()
        }
        .counts_against_endpoint());

        assert!(RpcError::Timeout {
            endpoint: "e".to_string(),
            timeout_ms: 2000,
        }
        .counts_against_endpoint());
    }

    #[test]
    fn test_endpoint_accessor() {
        let err = RpcError::Timeout {
            endpoint: "https://rpc.example".to_string(),
            timeout_ms: 100,
        };
        assert_eq!(err.endpoint(), Some("https://rpc.example"));

        assert_eq!(
            RpcError::AllEndpointsExhausted { total: 1, open: 1 }.endpoint(),
            None
        );
    }
}
