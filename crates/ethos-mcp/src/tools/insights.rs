//! update_insight and delete_insight tools.
//!
//! Direct write paths owned by I/O; both are project-scoped, audited, and
//! soft-delete only.

use chrono::Utc;
use ethos_core::{AuditAction, AuditEntry, InsightPatch, InsightStore};
use serde_json::{Value, json};

use super::{ToolContext, error_response, invalid_param, optional_str, required_str, required_uuid};

// ============================================================================
// update_insight
// ============================================================================

pub fn update_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "insight_id": {"type": "string", "description": "UUID of the insight to update"},
            "content": {"type": "string", "description": "Replacement content"},
            "memory_strength": {
                "type": "number",
                "minimum": 0.0,
                "maximum": 1.0,
                "description": "Replacement memory strength"
            },
            "metadata": {"type": "object", "description": "Replacement metadata map"},
            "actor": {"type": "string", "default": "I/O"}
        },
        "required": ["insight_id"]
    })
}

pub const UPDATE_DESCRIPTION: &str =
    "Update an insight's content, memory strength, or metadata. Absent fields stay untouched.";

pub async fn handle_update(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "update_insight";

    let insight_id = match required_uuid(args, "insight_id") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "insight_id", e),
    };
    let actor = optional_str(args, "actor").unwrap_or("I/O");

    let patch = InsightPatch {
        content: optional_str(args, "content").map(str::to_string),
        memory_strength: args.get("memory_strength").and_then(Value::as_f64),
        metadata: args
            .get("metadata")
            .and_then(Value::as_object)
            .cloned(),
    };
    if patch.content.is_none() && patch.memory_strength.is_none() && patch.metadata.is_none() {
        return invalid_param(TOOL, "content", "nothing to update");
    }
    if let Some(strength) = patch.memory_strength {
        if !(0.0..=1.0).contains(&strength) {
            return invalid_param(TOOL, "memory_strength", "must be within [0.0, 1.0]");
        }
    }

    let audit = AuditEntry::new(
        AuditAction::InsightUpdate,
        actor,
        Some(insight_id.to_string()),
        ctx.scope.project_id(),
        json!({"fields": {
            "content": patch.content.is_some(),
            "memory_strength": patch.memory_strength,
            "metadata": patch.metadata.is_some(),
        }}),
    );
    match ctx
        .app
        .store
        .update_insight(&ctx.scope, insight_id, patch, audit)
        .await
    {
        Ok(insight) => json!({
            "insight": insight,
            "updated_at": Utc::now(),
            "status": "success",
        }),
        Err(e) => error_response(TOOL, &ethos_core::CoreError::from(e)),
    }
}

// ============================================================================
// delete_insight
// ============================================================================

pub fn delete_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "insight_id": {"type": "string", "description": "UUID of the insight to delete"},
            "reason": {"type": "string", "description": "Why the insight is removed"},
            "actor": {"type": "string", "default": "I/O"}
        },
        "required": ["insight_id", "reason"]
    })
}

pub const DELETE_DESCRIPTION: &str =
    "Soft-delete an insight. The row is retained with deletion metadata and excluded from reads.";

pub async fn handle_delete(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "delete_insight";

    let insight_id = match required_uuid(args, "insight_id") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "insight_id", e),
    };
    let reason = match required_str(args, "reason") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "reason", e),
    };
    let actor = optional_str(args, "actor").unwrap_or("I/O");

    let audit = AuditEntry::new(
        AuditAction::InsightDelete,
        actor,
        Some(insight_id.to_string()),
        ctx.scope.project_id(),
        json!({"reason": reason}),
    );
    match ctx
        .app
        .store
        .soft_delete_insight(&ctx.scope, insight_id, actor, reason, audit)
        .await
    {
        Ok(insight) => json!({
            "insight_id": insight_id,
            "deleted_by": actor,
            "deleted_at": insight.deleted_at,
            "reason": reason,
            "status": "success",
        }),
        Err(e) => error_response(TOOL, &ethos_core::CoreError::from(e)),
    }
}

// ============================================================================
// TESTS
// ============================================================================
