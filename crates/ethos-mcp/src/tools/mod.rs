//! MCP tools over the belief-revision core.
//!
//! One handler per tool from the public surface: dissonance checks,
//! dissonance resolution, the SMF consent workflow, sector
//! reclassification, and the insight write paths. Handlers validate their
//! parameters, call into the core, and always return a JSON value; errors
//! come back as `{"error": {code, message, ...}, "tool": ..., "status":
//! "error"}` with the stable error codes of the core taxonomy.

pub mod dissonance;
pub mod insights;
pub mod reclassify;
pub mod smf;

use std::sync::Arc;

use ethos_core::{AppContext, CoreError, ProjectScope};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a tool handler needs
pub struct ToolContext {
    pub app: Arc<AppContext>,
    pub scope: ProjectScope,
    pub cancel: CancellationToken,
}

// ============================================================================
// RESPONSE HELPERS
// ============================================================================

/// Structured error response for a tool
pub fn error_response(tool: &str, err: &CoreError) -> Value {
    json!({
        "error": err.to_detail(),
        "tool": tool,
        "status": "error",
    })
}

/// Validation failure naming the offending field
pub fn invalid_param(tool: &str, field: &str, message: impl Into<String>) -> Value {
    error_response(tool, &CoreError::validation(field, message))
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    match args.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(format!("'{key}' must be a non-empty string")),
        None => Err(format!("missing '{key}' parameter")),
    }
}

pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub fn required_uuid(args: &Value, key: &str) -> Result<Uuid, String> {
    required_str(args, key)?
        .parse()
        .map_err(|_| format!("'{key}' must be a UUID"))
}

pub fn optional_uuid(args: &Value, key: &str) -> Result<Option<Uuid>, String> {
    match optional_str(args, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("'{key}' must be a UUID")),
    }
}

pub fn optional_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use async_trait::async_trait;
    use ethos_core::{
        Completion, CompletionRequest, Edge, GraphStore, LlmClient, LlmError, MemoryStore,
        NewEdge, Properties, Settings,
    };

    /// Classifier stub answering NONE for every pair
    struct NoneLlm;

    #[async_trait]
    impl LlmClient for NoneLlm {
        fn api_name(&self) -> &str {
            "haiku_classify"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
            Ok(Completion {
                text: json!({
                    "dissonance_type": "NONE",
                    "confidence_score": 0.9,
                    "description": "no conflict",
                    "reasoning": "stub"
                })
                .to_string(),
                input_tokens: 100,
                output_tokens: 30,
            })
        }
    }

    pub fn scripted_none_llm() -> Arc<dyn LlmClient> {
        Arc::new(NoneLlm)
    }

    pub async fn harness_with_llm(llm: Arc<dyn LlmClient>) -> ToolContext {
        harness_full(llm).await.0
    }

    /// Harness plus a handle on the concrete in-memory backend for seeding.
    pub async fn harness_full(llm: Arc<dyn LlmClient>) -> (ToolContext, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let app = Arc::new(AppContext::build(Settings::default(), store.clone(), llm));
        let ctx = ToolContext {
            app,
            scope: ProjectScope::new("test"),
            cancel: CancellationToken::new(),
        };
        (ctx, store)
    }

    /// Seed `source --relation--> target` between named nodes.
    pub async fn seed_edge(
        ctx: &ToolContext,
        source: &str,
        target: &str,
        relation: &str,
        properties: Properties,
    ) -> Edge {
        let source = ctx
            .app
            .store
            .add_node(&ctx.scope, source, "Node", Properties::new())
            .await
            .unwrap();
        let target = ctx
            .app
            .store
            .add_node(&ctx.scope, target, "Node", Properties::new())
            .await
            .unwrap();
        ctx.app
            .store
            .add_edge(
                &ctx.scope,
                NewEdge {
                    source_id: source.id,
                    target_id: target.id,
                    relation: relation.into(),
                    weight: 1.0,
                    properties,
                    memory_sector: None,
                },
                None,
            )
            .await
            .unwrap()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_helpers() {
        let args = json!({
            "name": "I/O",
            "empty": "  ",
            "id": "8f2c8e0e-8d2f-4e59-9b52-0a4f6d3c1a11",
            "flag": true,
        });
        assert_eq!(required_str(&args, "name").unwrap(), "I/O");
        assert!(required_str(&args, "empty").is_err());
        assert!(required_str(&args, "missing").is_err());
        assert!(required_uuid(&args, "id").is_ok());
        assert!(required_uuid(&args, "name").is_err());
        assert!(optional_uuid(&args, "missing").unwrap().is_none());
        assert!(optional_bool(&args, "flag"));
        assert!(!optional_bool(&args, "missing"));
    }

    #[test]
    fn test_error_response_shape() {
        let response = invalid_param("dissonance_check", "scope", "must be 'recent' or 'full'");
        assert_eq!(response["status"], "error");
        assert_eq!(response["tool"], "dissonance_check");
        assert_eq!(response["error"]["code"], "VALIDATION");
        assert_eq!(response["error"]["field"], "scope");
    }
}
