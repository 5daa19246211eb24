//! Anthropic Messages API client.
//!
//! A thin reqwest client over `POST /v1/messages`. The API key comes from
//! the environment and placeholder keys are fatal at construction. Calls are
//! paced by a minimum interval, wrapped in the retry policy, and cost-logged
//! on success.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Completion, CompletionRequest, LlmClient, LlmError};
use crate::budget::CostMeter;
use crate::config::{self, Settings};
use crate::error::Result;
use crate::retry::{RetryClass, RetryPolicy, call_with_retry};
use crate::store::RetryLog;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

// ============================================================================
// CLIENT
// ============================================================================

/// Rate-limited, retrying Messages API client
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    api_name: String,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    policy: RetryPolicy,
    retry_log: Arc<dyn RetryLog>,
    meter: Arc<CostMeter>,
}

impl AnthropicClient {
    /// Build a client for the configured classifier model. Fails when the
    /// `ANTHROPIC_API_KEY` environment variable is missing or a placeholder.
    pub fn new(
        settings: &Settings,
        api_name: impl Into<String>,
        retry_log: Arc<dyn RetryLog>,
        meter: Arc<CostMeter>,
    ) -> Result<Self> {
        let api_key = config::require_api_key(config::ANTHROPIC_API_KEY)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| crate::error::CoreError::Handler(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model: settings.model.classifier_model.clone(),
            api_name: api_name.into(),
            min_interval: Duration::from_millis(settings.model.min_call_interval_ms),
            last_call: Mutex::new(None),
            policy: RetryPolicy::default(),
            retry_log,
            meter,
        })
    }

    /// Override the endpoint base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the retry policy (tests use millisecond delays).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Client-side pacing: wait until `min_interval` has passed since the
    /// previous call left.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn send(&self, request: &CompletionRequest) -> std::result::Result<Completion, LlmError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![WireMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status_error(status.as_u16(), &text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Protocol(format!("response body: {e}")))?;

        let text = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(LlmError::Protocol("empty completion".into()));
        }

        Ok(Completion {
            text,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else if e.is_connect() {
        LlmError::Connection(e.to_string())
    } else {
        LlmError::Protocol(e.to_string())
    }
}

fn map_status_error(status: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| format!("{}: {}", env.error.error_type, env.error.message))
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        429 => LlmError::RateLimited,
        500 | 502 | 503 | 504 | 529 => LlmError::Unavailable { status },
        401 | 403 => LlmError::Auth { status },
        400 => LlmError::InvalidRequest(message),
        _ => LlmError::Protocol(format!("status {status}: {message}")),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn api_name(&self) -> &str {
        &self.api_name
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<Completion, LlmError> {
        self.pace().await;

        let result = call_with_retry(&self.policy, &self.api_name, self.retry_log.as_ref(), |_| {
            self.send(&request)
        })
        .await;

        match result {
            Ok(completion) => {
                debug!(
                    api_name = %self.api_name,
                    input_tokens = completion.input_tokens,
                    output_tokens = completion.output_tokens,
                    "completion succeeded"
                );
                self.meter
                    .record(&self.api_name, completion.input_tokens, completion.output_tokens)
                    .await;
                Ok(completion)
            }
            // A retryable error that survived the policy is exhaustion
            Err(e) if e.is_retryable() => Err(LlmError::Exhausted {
                api_name: self.api_name.clone(),
                last_error: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Tests share the ANTHROPIC_API_KEY env var; serialize access.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.model.min_call_interval_ms = 0;
        settings
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 4,
            base_delays: vec![Duration::from_millis(1)],
            jitter: false,
        }
    }

    async fn client(server: &MockServer, store: Arc<MemoryStore>) -> AnthropicClient {
        unsafe {
            std::env::set_var(config::ANTHROPIC_API_KEY, "sk-ant-test-key");
        }
        let settings = test_settings();
        let meter = Arc::new(CostMeter::new(store.clone(), &settings));
        AnthropicClient::new(&settings, "haiku_classify", store, meter)
            .unwrap()
            .with_base_url(server.uri())
            .with_retry_policy(fast_policy())
    }

    fn message_body(text: &str) -> serde_json::Value {
        json!({
            "content": [{"type": "text", "text": text}],
            "usage": {"input_tokens": 120, "output_tokens": 40}
        })
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_body("{\"ok\":true}")))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client(&server, store.clone()).await;
        let completion = client
            .complete(CompletionRequest::classification("classify this"))
            .await
            .unwrap();
        assert_eq!(completion.text, "{\"ok\":true}");
        assert_eq!(completion.input_tokens, 120);
        // Cost row written on success
        assert_eq!(store.cost_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_recovers_from_rate_limit() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_body("ok")))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client(&server, store.clone()).await;
        let completion = client
            .complete(CompletionRequest::classification("classify"))
            .await
            .unwrap();
        assert_eq!(completion.text, "ok");

        // Recovery entry in the retry log
        let retries = store.retry_entries();
        assert_eq!(retries.len(), 1);
        assert!(retries[0].success);
        assert_eq!(retries[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_is_named() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client(&server, store.clone()).await;
        let err = client
            .complete(CompletionRequest::classification("classify"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Exhausted { .. }));
        assert!(err.is_exhaustion());

        let retries = store.retry_entries();
        assert_eq!(retries.len(), 1);
        assert!(!retries[0].success);
        assert_eq!(retries[0].retry_count, 4);
    }

    #[tokio::test]
    async fn test_auth_error_is_terminal() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"type": "authentication_error", "message": "bad key"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client(&server, store.clone()).await;
        let err = client
            .complete(CompletionRequest::classification("classify"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth { status: 401 }));
        assert!(store.retry_entries().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_fatal_at_construction() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        unsafe {
            std::env::set_var(config::ANTHROPIC_API_KEY, "sk-ant-REDACTED");
        }
        let settings = test_settings();
        let store = Arc::new(MemoryStore::new());
        let meter = Arc::new(CostMeter::new(store.clone(), &settings));
        let result = AnthropicClient::new(&settings, "haiku_classify", store, meter);
        assert!(result.is_err());
        unsafe {
            std::env::set_var(config::ANTHROPIC_API_KEY, "sk-ant-test-key");
        }
    }
}
