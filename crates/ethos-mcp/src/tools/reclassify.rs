//! reclassify_memory_sector tool.

use ethos_core::{ReclassifyOutcome, ReclassifyParams};
use serde_json::{Value, json};

use super::{ToolContext, error_response, invalid_param, optional_str, optional_uuid, required_str};

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "source_name": {"type": "string", "description": "Name of the source node"},
            "target_name": {"type": "string", "description": "Name of the target node"},
            "relation": {"type": "string", "description": "Relation label (e.g. \"LEARNED\")"},
            "new_sector": {
                "type": "string",
                "enum": ["emotional", "episodic", "semantic", "procedural", "reflective"],
                "description": "Target memory sector"
            },
            "edge_id": {
                "type": "string",
                "description": "UUID for disambiguation when multiple edges match"
            },
            "actor": {"type": "string", "default": "I/O"}
        },
        "required": ["source_name", "target_name", "relation", "new_sector"]
    })
}

pub const DESCRIPTION: &str =
    "Move an edge to a different memory sector. Constitutive edges require an approved \
     bilateral proposal first.";

pub async fn handle(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "reclassify_memory_sector";

    let source_name = match required_str(args, "source_name") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "source_name", e),
    };
    let target_name = match required_str(args, "target_name") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "target_name", e),
    };
    let relation = match required_str(args, "relation") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "relation", e),
    };
    let new_sector = match required_str(args, "new_sector") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "new_sector", e),
    };
    let edge_id = match optional_uuid(args, "edge_id") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "edge_id", e),
    };
    let actor = optional_str(args, "actor").unwrap_or("I/O");

    let params = ReclassifyParams {
        source_name: source_name.to_string(),
        target_name: target_name.to_string(),
        relation: relation.to_string(),
        new_sector: new_sector.to_string(),
        edge_id,
        actor: actor.to_string(),
    };

    match ctx.app.reclassifier.reclassify(&ctx.scope, params).await {
        // The outcome enum serializes with its own `status` tag
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(mut value) => {
                if matches!(outcome, ReclassifyOutcome::ConsentRequired { .. }) {
                    value["error"] = json!("Bilateral consent required for constitutive edge");
                }
                value
            }
            Err(e) => error_response(TOOL, &ethos_core::CoreError::Handler(e.to_string())),
        },
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// TESTS
// ============================================================================
