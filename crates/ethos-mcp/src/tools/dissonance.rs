//! dissonance_check and resolve_dissonance tools.

use ethos_core::{EdgeScope, ResolutionType};
use serde_json::{Value, json};
use tracing::info;

use super::{ToolContext, error_response, invalid_param, optional_str, required_str, required_uuid};

// ============================================================================
// dissonance_check
// ============================================================================

pub fn check_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "context_node": {
                "type": "string",
                "description": "Node id or node name whose edges are analyzed (e.g. \"I/O\")"
            },
            "scope": {
                "type": "string",
                "enum": ["recent", "full"],
                "default": "recent",
                "description": "recent = edges touched within 30 days, full = all edges"
            }
        },
        "required": ["context_node"]
    })
}

pub const CHECK_DESCRIPTION: &str =
    "Analyze a node's edges for dissonances (EVOLUTION, CONTRADICTION, NUANCE) and register \
     pending reviews for nuanced tensions.";

pub async fn handle_check(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "dissonance_check";

    let context_node = match required_str(args, "context_node") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "context_node", e),
    };
    let scope_raw = optional_str(args, "scope").unwrap_or("recent");
    let Some(scope) = EdgeScope::parse(scope_raw) else {
        return invalid_param(
            TOOL,
            "scope",
            format!("invalid scope '{scope_raw}', must be 'recent' or 'full'"),
        );
    };

    match ctx
        .app
        .engine
        .check(&ctx.scope, context_node, scope, &ctx.cancel)
        .await
    {
        Ok(result) => serde_json::to_value(&result).unwrap_or_else(|e| {
            error_response(TOOL, &ethos_core::CoreError::Handler(e.to_string()))
        }),
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// resolve_dissonance
// ============================================================================

pub fn resolve_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "review_id": {
                "type": "string",
                "description": "UUID of the nuance review (from dissonance_check.pending_reviews)"
            },
            "resolution_type": {
                "type": "string",
                "enum": ["EVOLUTION", "CONTRADICTION", "NUANCE"],
                "description": "EVOLUTION supersedes the older edge; CONTRADICTION and NUANCE document the tension"
            },
            "context": {
                "type": "string",
                "description": "Description of the resolution (e.g. 'position evolved from X to Y')"
            },
            "resolved_by": {
                "type": "string",
                "default": "I/O",
                "description": "Who resolves the dissonance"
            }
        },
        "required": ["review_id", "resolution_type", "context"]
    })
}

pub const RESOLVE_DESCRIPTION: &str =
    "Create a resolution hyperedge for a detected dissonance. Documents the development \
     without deleting the original edges.";

pub async fn handle_resolve(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "resolve_dissonance";

    let review_id = match required_uuid(args, "review_id") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "review_id", e),
    };
    let type_raw = match required_str(args, "resolution_type") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "resolution_type", e),
    };
    let Some(resolution_type) = ResolutionType::parse(type_raw) else {
        return invalid_param(
            TOOL,
            "resolution_type",
            format!("invalid resolution_type '{type_raw}', must be EVOLUTION, CONTRADICTION, or NUANCE"),
        );
    };
    let context = match required_str(args, "context") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "context", e),
    };
    let resolved_by = optional_str(args, "resolved_by").unwrap_or("I/O");

    match ctx
        .app
        .emitter
        .resolve_review(&ctx.scope, review_id, resolution_type, context, resolved_by)
        .await
    {
        Ok(outcome) => {
            info!(
                review_id = %review_id,
                resolution_type = %resolution_type,
                resolved_by,
                "dissonance resolved"
            );
            json!({
                "resolution": outcome,
                "input_params": {
                    "review_id": review_id,
                    "resolution_type": resolution_type,
                    "context": context,
                    "resolved_by": resolved_by,
                },
                "status": "success",
            })
        }
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests_support::{harness_with_llm, scripted_none_llm};

    #[tokio::test]
    async fn test_check_rejects_bad_scope() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let response = handle_check(
            &ctx,
            &json!({"context_node": "I/O", "scope": "everything"}),
        )
        .await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["error"]["code"], "VALIDATION");
        assert_eq!(response["error"]["field"], "scope");
    }

    #[tokio::test]
    async fn test_check_unknown_node_is_insufficient_data() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let response = handle_check(&ctx, &json!({"context_node": "nobody"})).await;
        assert_eq!(response["status"], "insufficient_data");
        assert_eq!(response["edgesAnalyzed"], 0);
    }

    #[tokio::test]
    async fn test_resolve_requires_known_review() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let response = handle_resolve(
            &ctx,
            &json!({
                "review_id": uuid::Uuid::new_v4().to_string(),
                "resolution_type": "EVOLUTION",
                "context": "position evolved",
            }),
        )
        .await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["error"]["code"], "NOT_FOUND");
    }
}
