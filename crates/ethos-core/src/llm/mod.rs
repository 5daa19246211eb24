//! LLM client contract.
//!
//! The core consumes one JSON-returning chat endpoint per model through the
//! [`LlmClient`] trait. The production implementation is
//! [`AnthropicClient`]; tests substitute scripted clients. Every call runs
//! through the retry wrapper, is cost-logged, and surfaces exhaustion as a
//! named error the dissonance engine converts into a fallback outcome.

mod anthropic;

pub use anthropic::AnthropicClient;

use async_trait::async_trait;

use crate::retry::RetryClass;

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// One chat completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    /// 0.0 for deterministic classification
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Deterministic classification request
    pub fn classification(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.0,
            max_tokens: 500,
        }
    }

    /// Smallest possible request, used by health probes
    pub fn ping() -> Self {
        Self {
            prompt: "ping".into(),
            temperature: 0.0,
            max_tokens: 10,
        }
    }
}

/// One chat completion with token usage
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors from an LLM endpoint, classified for the retry wrapper.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited (429)")]
    RateLimited,
    #[error("service unavailable ({status})")]
    Unavailable { status: u16 },
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("authentication rejected ({status})")]
    Auth { status: u16 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed response: {0}")]
    Protocol(String),
    /// All retries failed; carries the terminal error's description
    #[error("{api_name} exhausted after retries: {last_error}")]
    Exhausted {
        api_name: String,
        last_error: String,
    },
}

impl LlmError {
    /// Whether this error signals upstream exhaustion: the condition that
    /// flips the dissonance engine into fallback mode.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            LlmError::Exhausted { .. } | LlmError::RateLimited | LlmError::Unavailable { .. }
        )
    }
}

impl RetryClass for LlmError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited
                | LlmError::Unavailable { .. }
                | LlmError::Timeout
                | LlmError::Connection(_)
        )
    }

    fn error_type(&self) -> &'static str {
        match self {
            LlmError::RateLimited => "RateLimited",
            LlmError::Unavailable { .. } => "Unavailable",
            LlmError::Timeout => "Timeout",
            LlmError::Connection(_) => "Connection",
            LlmError::Auth { .. } => "Auth",
            LlmError::InvalidRequest(_) => "InvalidRequest",
            LlmError::Protocol(_) => "Protocol",
            LlmError::Exhausted { .. } => "Exhausted",
        }
    }
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

/// A rate-limited, retrying, cost-logged chat endpoint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Stable name used in cost and retry logs
    fn api_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(LlmError::RateLimited.is_retryable());
        assert!(LlmError::Unavailable { status: 503 }.is_retryable());
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Connection("reset".into()).is_retryable());
        assert!(!LlmError::Auth { status: 401 }.is_retryable());
        assert!(!LlmError::InvalidRequest("bad".into()).is_retryable());
        assert!(!LlmError::Protocol("not json".into()).is_retryable());
    }

    #[test]
    fn test_exhaustion_detection() {
        assert!(LlmError::RateLimited.is_exhaustion());
        assert!(
            LlmError::Exhausted {
                api_name: "haiku_classify".into(),
                last_error: "rate limited".into()
            }
            .is_exhaustion()
        );
        assert!(!LlmError::Auth { status: 403 }.is_exhaustion());
        assert!(!LlmError::Protocol("truncated".into()).is_exhaustion());
    }

    #[test]
    fn test_ping_request_is_minimal() {
        let ping = CompletionRequest::ping();
        assert_eq!(ping.max_tokens, 10);
        assert_eq!(ping.temperature, 0.0);
    }
}
