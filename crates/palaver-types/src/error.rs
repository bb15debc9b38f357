//! Shared error taxonomy for the Palaver gateway.
//!
//! Every provider-specific failure is flattened into [`GatewayError`] at
//! the adapter boundary; no provider error type crosses into the
//! dispatcher or aggregator. Classification here drives the dispatcher's
//! retry decisions.

/// Errors surfaced by the gateway core.
///
/// `Clone` so a terminal stream error can both ride the event stream and
/// be reported by the aggregator's folded outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// No adapter is registered under this provider name.
    #[error("unknown provider: '{provider}'")]
    UnknownProvider { provider: String },

    /// The provider is registered but no model pattern matches.
    #[error("unknown model '{model}' for provider '{provider}'")]
    UnknownModel { provider: String, model: String },

    /// The request was rejected as malformed or unsupported.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Credentials were missing, expired, or rejected.
    #[error("authentication failed")]
    AuthFailure,

    /// The provider asked us to slow down.
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// The per-request deadline elapsed before a terminal outcome.
    #[error("request timed out")]
    Timeout,

    /// The provider sent data we could not interpret.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The provider or the network path to it is failing.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Anything the adapter could not classify.
    #[error("unknown provider error: {0}")]
    Unknown(String),
}

impl GatewayError {
    /// Whether a fresh attempt against the same adapter may succeed.
    ///
    /// Only rate limiting and availability failures qualify; everything
    /// else is terminal and propagates to the caller without retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. } | GatewayError::Unavailable(..)
        )
    }

    /// Retry delay hint from the provider, when one was given.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::RateLimited {
            retry_after_ms: None
        }
        .is_transient());
        assert!(GatewayError::Unavailable("503".to_string()).is_transient());

        assert!(!GatewayError::AuthFailure.is_transient());
        assert!(!GatewayError::InvalidRequest("bad".to_string()).is_transient());
        assert!(!GatewayError::Timeout.is_transient());
        assert!(!GatewayError::ProtocolViolation("garbage".to_string()).is_transient());
        assert!(!GatewayError::Cancelled.is_transient());
        assert!(!GatewayError::Unknown("???".to_string()).is_transient());
        assert!(!GatewayError::UnknownProvider {
            provider: "x".to_string()
        }
        .is_transient());
        assert!(!GatewayError::UnknownModel {
            provider: "x".to_string(),
            model: "y".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = GatewayError::RateLimited {
            retry_after_ms: Some(1500),
        };
        assert_eq!(err.retry_after_ms(), Some(1500));
        assert_eq!(GatewayError::Timeout.retry_after_ms(), None);
    }

    #[test]
    fn test_display_includes_context() {
        let err = GatewayError::UnknownModel {
            provider: "anthropic".to_string(),
            model: "model-x".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("anthropic"));
        assert!(msg.contains("model-x"));
    }
}
