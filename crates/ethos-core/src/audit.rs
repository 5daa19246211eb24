//! Append-only audit entries.
//!
//! Every mutating operation emits exactly one entry: SMF transitions,
//! resolution creation, supersede marking, sector reclassification, insight
//! writes. Entries ride in the same store transaction as the business write
//! where the backend allows it; otherwise they are appended best-effort and
//! a failure is logged, never surfaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// ACTIONS
// ============================================================================

/// The closed set of audited actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    SmfPropose,
    SmfApprove,
    SmfReject,
    SmfUndo,
    EdgeReclassify,
    EdgeSupersede,
    EdgeSupersedeClear,
    ResolutionCreate,
    ResolutionOrphan,
    InsightUpdate,
    InsightDelete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SmfPropose => "SMF_PROPOSE",
            AuditAction::SmfApprove => "SMF_APPROVE",
            AuditAction::SmfReject => "SMF_REJECT",
            AuditAction::SmfUndo => "SMF_UNDO",
            AuditAction::EdgeReclassify => "EDGE_RECLASSIFY",
            AuditAction::EdgeSupersede => "EDGE_SUPERSEDE",
            AuditAction::EdgeSupersedeClear => "EDGE_SUPERSEDE_CLEAR",
            AuditAction::ResolutionCreate => "RESOLUTION_CREATE",
            AuditAction::ResolutionOrphan => "RESOLUTION_ORPHAN",
            AuditAction::InsightUpdate => "INSIGHT_UPDATE",
            AuditAction::InsightDelete => "INSIGHT_DELETE",
        }
    }
}

// ============================================================================
// ENTRY
// ============================================================================

/// One audit log row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub project_id: String,
    pub payload: Value,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        actor: impl Into<String>,
        target_id: Option<String>,
        project_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            action,
            target_id,
            project_id: project_id.into(),
            payload,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names() {
        assert_eq!(AuditAction::SmfPropose.as_str(), "SMF_PROPOSE");
        assert_eq!(AuditAction::EdgeReclassify.as_str(), "EDGE_RECLASSIFY");
        assert_eq!(
            serde_json::to_string(&AuditAction::SmfUndo).unwrap(),
            "\"SMF_UNDO\""
        );
    }

    #[test]
    fn test_entry_serialization() {
        let entry = AuditEntry::new(
            AuditAction::EdgeSupersede,
            "I/O",
            Some("abc".into()),
            "test",
            json!({"superseded_by": "resolution"}),
        );
        let raw = serde_json::to_value(&entry).unwrap();
        assert_eq!(raw["action"], "EDGE_SUPERSEDE");
        assert_eq!(raw["actor"], "I/O");
        assert_eq!(raw["projectId"], "test");
    }
}
