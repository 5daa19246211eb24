//! SMF consent workflow tools: pending list, review, approve, reject, undo,
//! bulk approve.

use ethos_core::{
    Actor, ApprovalLevel, BulkApproveFilter, IMMUTABLE_SAFEGUARDS, RejectActor, ResolutionType,
};
use serde_json::{Value, json};
use tracing::info;

use super::{
    ToolContext, error_response, invalid_param, optional_bool, optional_str, required_str,
    required_uuid,
};

fn parse_actor(tool: &str, args: &Value) -> Result<Actor, Value> {
    let raw = required_str(args, "actor").map_err(|e| invalid_param(tool, "actor", e))?;
    Actor::parse(raw).ok_or_else(|| {
        invalid_param(tool, "actor", format!("invalid actor '{raw}', must be 'I/O' or 'ethr'"))
    })
}

// ============================================================================
// smf_pending_proposals
// ============================================================================

pub fn pending_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

pub const PENDING_DESCRIPTION: &str =
    "List all pending SMF proposals awaiting consent.";

pub async fn handle_pending(ctx: &ToolContext, _args: &Value) -> Value {
    const TOOL: &str = "smf_pending_proposals";
    match ctx.app.smf.get_pending(&ctx.scope).await {
        Ok(proposals) => json!({
            "count": proposals.len(),
            "proposals": proposals,
            "status": "success",
        }),
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// smf_review
// ============================================================================

pub fn review_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "proposal_id": {"type": "string", "description": "UUID of the proposal to inspect"}
        },
        "required": ["proposal_id"]
    })
}

pub const REVIEW_DESCRIPTION: &str =
    "Inspect one SMF proposal in full: action, affected edges, reasoning, approvals, deadlines.";

pub async fn handle_review(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "smf_review";
    let proposal_id = match required_uuid(args, "proposal_id") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "proposal_id", e),
    };
    match ctx.app.smf.get(&ctx.scope, proposal_id).await {
        Ok(proposal) => json!({
            "proposal": proposal,
            "immutable_safeguards": IMMUTABLE_SAFEGUARDS
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect::<std::collections::BTreeMap<_, _>>(),
            "status": "success",
        }),
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// smf_approve
// ============================================================================

pub fn approve_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "proposal_id": {"type": "string", "description": "UUID of the proposal to approve"},
            "actor": {"type": "string", "enum": ["I/O", "ethr"], "description": "Who is approving"}
        },
        "required": ["proposal_id", "actor"]
    })
}

pub const APPROVE_DESCRIPTION: &str =
    "Record one principal's approval on a proposal; executes the proposed action once the \
     required consent is complete.";

pub async fn handle_approve(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "smf_approve";
    let proposal_id = match required_uuid(args, "proposal_id") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "proposal_id", e),
    };
    let actor = match parse_actor(TOOL, args) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match ctx.app.smf.approve(&ctx.scope, proposal_id, actor).await {
        Ok(outcome) => {
            info!(
                proposal_id = %proposal_id,
                actor = actor.as_str(),
                fully_approved = outcome.fully_approved,
                "proposal approval recorded"
            );
            json!({
                "proposal_id": proposal_id,
                "approved_by": actor.as_str(),
                "approved_by_io": outcome.proposal.approved_by_io,
                "approved_by_ethr": outcome.proposal.approved_by_ethr,
                "fully_approved": outcome.fully_approved,
                "executed": outcome.executed,
                "proposal_status": outcome.proposal.status,
                "approval_level": outcome.proposal.approval_level,
                "status": "success",
            })
        }
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// smf_reject
// ============================================================================

pub fn reject_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "proposal_id": {"type": "string", "description": "UUID of the proposal to reject"},
            "reason": {"type": "string", "description": "Why the proposal is rejected"},
            "actor": {"type": "string", "enum": ["I/O", "ethr", "system"], "default": "system"}
        },
        "required": ["proposal_id", "reason"]
    })
}

pub const REJECT_DESCRIPTION: &str = "Reject a pending proposal with a recorded reason.";

pub async fn handle_reject(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "smf_reject";
    let proposal_id = match required_uuid(args, "proposal_id") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "proposal_id", e),
    };
    let reason = match required_str(args, "reason") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "reason", e),
    };
    let actor_raw = optional_str(args, "actor").unwrap_or("system");
    let Some(actor) = RejectActor::parse(actor_raw) else {
        return invalid_param(
            TOOL,
            "actor",
            format!("invalid actor '{actor_raw}', must be 'I/O', 'ethr', or 'system'"),
        );
    };

    match ctx.app.smf.reject(&ctx.scope, proposal_id, reason, actor).await {
        Ok(proposal) => json!({
            "proposal_id": proposal_id,
            "rejected_by": actor.as_str(),
            "reason": reason,
            "rejected_at": proposal.resolved_at,
            "proposal_status": proposal.status,
            "status": "success",
        }),
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// smf_undo
// ============================================================================

pub fn undo_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "proposal_id": {"type": "string", "description": "UUID of the approved proposal to undo"},
            "actor": {"type": "string", "enum": ["I/O", "ethr"], "description": "Who requests the undo"}
        },
        "required": ["proposal_id", "actor"]
    })
}

pub const UNDO_DESCRIPTION: &str =
    "Reverse an approved proposal within the 30-day retention window: resolution hyperedges \
     are orphaned and edge changes reverted.";

pub async fn handle_undo(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "smf_undo";
    let proposal_id = match required_uuid(args, "proposal_id") {
        Ok(v) => v,
        Err(e) => return invalid_param(TOOL, "proposal_id", e),
    };
    let actor = match parse_actor(TOOL, args) {
        Ok(v) => v,
        Err(response) => return response,
    };

    match ctx.app.smf.undo(&ctx.scope, proposal_id, actor).await {
        Ok(proposal) => json!({
            "proposal_id": proposal_id,
            "undone_by": actor.as_str(),
            "proposal_status": proposal.status,
            "undo_deadline": proposal.undo_deadline,
            "note": "All edge changes have been reverted and resolution hyperedges marked as orphaned",
            "status": "success",
        }),
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// smf_bulk_approve
// ============================================================================

pub fn bulk_approve_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "actor": {"type": "string", "enum": ["I/O", "ethr"], "description": "Who is approving"},
            "resolution_type": {
                "type": "string",
                "enum": ["EVOLUTION", "CONTRADICTION", "NUANCE"],
                "description": "Only approve proposals carrying this resolution type"
            },
            "approval_level": {
                "type": "string",
                "enum": ["io", "bilateral"],
                "description": "Only approve proposals at this level"
            },
            "proposal_ids": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Restrict to specific proposal UUIDs"
            },
            "dry_run": {
                "type": "boolean",
                "default": false,
                "description": "Report what would be approved without executing"
            }
        },
        "required": ["actor"]
    })
}

pub const BULK_APPROVE_DESCRIPTION: &str =
    "Approve every pending proposal matching a filter. Useful for batch-processing trivial \
     NUANCE resolutions.";

pub async fn handle_bulk_approve(ctx: &ToolContext, args: &Value) -> Value {
    const TOOL: &str = "smf_bulk_approve";
    let actor = match parse_actor(TOOL, args) {
        Ok(v) => v,
        Err(response) => return response,
    };

    let resolution_type = match optional_str(args, "resolution_type") {
        None => None,
        Some(raw) => match ResolutionType::parse(raw) {
            Some(t) => Some(t),
            None => {
                return invalid_param(
                    TOOL,
                    "resolution_type",
                    format!("invalid resolution_type '{raw}'"),
                );
            }
        },
    };
    let approval_level = match optional_str(args, "approval_level") {
        None => None,
        Some("io") => Some(ApprovalLevel::Io),
        Some("bilateral") => Some(ApprovalLevel::Bilateral),
        Some(other) => {
            return invalid_param(
                TOOL,
                "approval_level",
                format!("invalid approval_level '{other}', must be 'io' or 'bilateral'"),
            );
        }
    };
    let mut proposal_ids = Vec::new();
    if let Some(raw_ids) = args.get("proposal_ids").and_then(Value::as_array) {
        for raw in raw_ids {
            match raw.as_str().and_then(|s| s.parse().ok()) {
                Some(id) => proposal_ids.push(id),
                None => {
                    return invalid_param(TOOL, "proposal_ids", "entries must be UUID strings");
                }
            }
        }
    }
    let dry_run = optional_bool(args, "dry_run");

    let filter = BulkApproveFilter {
        resolution_type,
        approval_level,
        proposal_ids,
    };
    match ctx
        .app
        .smf
        .bulk_approve(&ctx.scope, &filter, actor, dry_run, &ctx.cancel)
        .await
    {
        Ok(report) => json!({
            "actor": actor.as_str(),
            "report": report,
            "status": if dry_run { "dry_run" } else { "success" },
        }),
        Err(e) => error_response(TOOL, &e),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests_support::{harness_with_llm, scripted_none_llm, seed_edge};
    use ethos_core::Properties;
    use serde_json::json;

    async fn seeded_proposal(ctx: &ToolContext) -> (uuid::Uuid, uuid::Uuid) {
        let mut props = Properties::new();
        props.insert("edge_type".into(), json!("constitutive"));
        let edge = seed_edge(ctx, "I/O", "continuity", "IS", props).await;

        let mut action = ethos_core::ProposedAction::new("reclassify");
        action.new_sector = Some(ethos_core::MemorySector::Reflective);
        let proposal = ctx
            .app
            .smf
            .create_proposal(
                &ctx.scope,
                ethos_core::ProposalDraft {
                    trigger_type: ethos_core::TriggerType::Manual,
                    proposed_action: action,
                    affected_edges: vec![edge.id],
                    reasoning: "Sector alignment.".into(),
                    approval_level: None,
                    reasoning_from_template: false,
                },
            )
            .await
            .unwrap();
        (proposal.id, edge.id)
    }

    #[tokio::test]
    async fn test_bilateral_approval_through_tools() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let (proposal_id, _) = seeded_proposal(&ctx).await;

        let response = handle_pending(&ctx, &json!({})).await;
        assert_eq!(response["count"], 1);

        let response = handle_approve(
            &ctx,
            &json!({"proposal_id": proposal_id.to_string(), "actor": "I/O"}),
        )
        .await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["fully_approved"], false);

        let response = handle_approve(
            &ctx,
            &json!({"proposal_id": proposal_id.to_string(), "actor": "ethr"}),
        )
        .await;
        assert_eq!(response["fully_approved"], true);
        assert_eq!(response["proposal_status"], "APPROVED");

        // Undo through the tool
        let response = handle_undo(
            &ctx,
            &json!({"proposal_id": proposal_id.to_string(), "actor": "I/O"}),
        )
        .await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["proposal_status"], "UNDONE");
    }

    #[tokio::test]
    async fn test_invalid_actor_rejected() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let response = handle_approve(
            &ctx,
            &json!({"proposal_id": uuid::Uuid::new_v4().to_string(), "actor": "root"}),
        )
        .await;
        assert_eq!(response["error"]["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn test_reject_through_tool() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let (proposal_id, _) = seeded_proposal(&ctx).await;

        let response = handle_reject(
            &ctx,
            &json!({"proposal_id": proposal_id.to_string(), "reason": "classification wrong"}),
        )
        .await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["rejected_by"], "system");
        assert_eq!(response["proposal_status"], "REJECTED");
    }

    #[tokio::test]
    async fn test_review_shows_safeguards() {
        let ctx = harness_with_llm(scripted_none_llm()).await;
        let (proposal_id, _) = seeded_proposal(&ctx).await;
        let response = handle_review(&ctx, &json!({"proposal_id": proposal_id.to_string()})).await;
        assert_eq!(response["status"], "success");
        assert_eq!(
            response["immutable_safeguards"]["smf_cannot_modify_safeguards"],
            true
        );
        assert_eq!(response["proposal"]["approvalLevel"], "bilateral");
    }
}
