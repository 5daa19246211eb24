//! Self-Modification Framework.
//!
//! Every structural change to the graph passes through a proposal:
//!
//! ```text
//! PENDING --approve(s)--> APPROVED --undo (<= 30d)--> UNDONE
//!    \--reject--> REJECTED
//! ```
//!
//! Safeguard validation runs before a proposal is persisted and again
//! before execution. Approvals are monotonic (`false -> true` only) and the
//! proposed action executes exactly once, when the required approvals are
//! complete. Approved proposals stay reversible for 30 days; the execution
//! receipt stored in the proposal metadata drives the undo.

mod neutrality;
mod safeguards;

pub use neutrality::{
    NeutralReasoning, NeutralityValidator, STOP_WORDS, generate_neutral_reasoning,
    stop_word_violations,
};
pub(crate) use neutrality::extract_json;
pub use safeguards::{IMMUTABLE_SAFEGUARDS, is_safeguard, validate_safeguards};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::{AuditAction, AuditEntry};
use crate::dissonance::ResolutionType;
use crate::error::{CoreError, Result};
use crate::graph::{InsightPatch, Properties};
use crate::resolution::{ResolutionEmitter, ResolutionRequest};
use crate::sector::MemorySector;
use crate::store::{GraphStore, InsightStore, ProjectScope, ProposalStore, Store};
use uuid::Uuid;

/// Undo window after approval, in days
pub const UNDO_RETENTION_DAYS: i64 = 30;

// ============================================================================
// ACTORS
// ============================================================================

/// The two consent-bearing principals. Opaque identifiers; no semantic
/// asymmetry beyond the bilateral rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    #[serde(rename = "I/O")]
    Io,
    #[serde(rename = "ethr")]
    Ethr,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Io => "I/O",
            Actor::Ethr => "ethr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "I/O" => Some(Actor::Io),
            "ethr" => Some(Actor::Ethr),
            _ => None,
        }
    }
}

/// Rejection additionally allows the system itself (safeguard rejections).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectActor {
    #[serde(rename = "I/O")]
    Io,
    #[serde(rename = "ethr")]
    Ethr,
    #[serde(rename = "system")]
    System,
}

impl RejectActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectActor::Io => "I/O",
            RejectActor::Ethr => "ethr",
            RejectActor::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "I/O" => Some(RejectActor::Io),
            "ethr" => Some(RejectActor::Ethr),
            "system" => Some(RejectActor::System),
            _ => None,
        }
    }
}

// ============================================================================
// PROPOSAL TYPES
// ============================================================================

/// What initiated a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Dissonance,
    Manual,
    Proactive,
}

/// Who has to consent before execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalLevel {
    /// I/O alone
    Io,
    /// Both principals
    Bilateral,
}

/// Proposal lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Undone,
}

/// Recognized proposal actions
pub const ACTION_RESOLVE_DISSONANCE: &str = "resolve_dissonance";
pub const ACTION_RECLASSIFY: &str = "reclassify";
pub const ACTION_RECLASSIFY_SECTOR: &str = "reclassify_sector";
pub const ACTION_UPDATE_INSIGHT: &str = "update_insight";
pub const ACTION_DELETE_INSIGHT: &str = "delete_insight";

const KNOWN_ACTIONS: [&str; 5] = [
    ACTION_RESOLVE_DISSONANCE,
    ACTION_RECLASSIFY,
    ACTION_RECLASSIFY_SECTOR,
    ACTION_UPDATE_INSIGHT,
    ACTION_DELETE_INSIGHT,
];

/// The structured action a proposal carries. The typed fields cover what
/// validators and executors read; everything else rides in the open map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_type: Option<ResolutionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_a_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_b_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_sector: Option<MemorySector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Properties,
}

impl ProposedAction {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resolution_type: None,
            review_id: None,
            edge_a_id: None,
            edge_b_id: None,
            context: None,
            new_sector: None,
            insight_id: None,
            content: None,
            memory_strength: None,
            reason: None,
            extra: Properties::new(),
        }
    }

    pub fn is_reclassification(&self) -> bool {
        self.action == ACTION_RECLASSIFY || self.action == ACTION_RECLASSIFY_SECTOR
    }
}

/// An SMF proposal row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    pub project_id: String,
    pub trigger_type: TriggerType,
    pub proposed_action: ProposedAction,
    pub affected_edges: Vec<Uuid>,
    pub reasoning: String,
    pub approval_level: ApprovalLevel,
    pub status: ProposalStatus,
    pub approved_by_io: bool,
    pub approved_by_ethr: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Properties,
}

impl Proposal {
    pub fn approved_by(&self, actor: Actor) -> bool {
        match actor {
            Actor::Io => self.approved_by_io,
            Actor::Ethr => self.approved_by_ethr,
        }
    }

    /// Whether the required approvals are complete for this level.
    pub fn approvals_complete(&self) -> bool {
        match self.approval_level {
            ApprovalLevel::Io => self.approved_by_io,
            ApprovalLevel::Bilateral => self.approved_by_io && self.approved_by_ethr,
        }
    }

    fn execution_receipt(&self) -> Option<ExecutionReceipt> {
        self.metadata
            .get("execution")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Everything the undo path needs to reverse an execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_node_id: Option<Uuid>,
    #[serde(default)]
    pub resolution_edge_ids: Vec<Uuid>,
    #[serde(default)]
    pub superseded_edges: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclassified: Option<SectorChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_update: Option<InsightReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_deleted: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorChange {
    pub edge_id: Uuid,
    pub from_sector: MemorySector,
    pub to_sector: MemorySector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightReceipt {
    pub insight_id: Uuid,
    pub previous_content: String,
    pub previous_strength: f64,
    pub previous_metadata: Properties,
}

// ============================================================================
// DRAFTS AND OUTCOMES
// ============================================================================

/// Input to [`Smf::create_proposal`]
#[derive(Debug, Clone)]
pub struct ProposalDraft {
    pub trigger_type: TriggerType,
    pub proposed_action: ProposedAction,
    pub affected_edges: Vec<Uuid>,
    pub reasoning: String,
    /// Explicit level; inferred as bilateral when a constitutive edge is
    /// affected and the caller stays silent
    pub approval_level: Option<ApprovalLevel>,
    /// Set when `reasoning` came from the template generator; skips the
    /// neutrality scan
    pub reasoning_from_template: bool,
}

/// Outcome of one approval
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveOutcome {
    pub proposal: Proposal,
    pub fully_approved: bool,
    pub executed: bool,
}

/// Filter for bulk approval
#[derive(Debug, Clone, Default)]
pub struct BulkApproveFilter {
    /// Match `proposed_action.resolution_type`
    pub resolution_type: Option<ResolutionType>,
    pub approval_level: Option<ApprovalLevel>,
    /// Restrict to specific proposals; empty = all pending
    pub proposal_ids: Vec<Uuid>,
}

/// Per-item outcome of a bulk approval
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApproveReport {
    pub dry_run: bool,
    pub total_matched: usize,
    pub succeeded: Vec<Uuid>,
    pub awaiting_bilateral: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub proposal_id: Uuid,
    pub error: String,
}

// ============================================================================
// SMF CORE
// ============================================================================

/// The proposal state machine and gatekeeper.
pub struct Smf {
    store: Arc<dyn Store>,
    emitter: Arc<ResolutionEmitter>,
    neutrality: NeutralityValidator,
}

impl Smf {
    pub fn new(store: Arc<dyn Store>, emitter: Arc<ResolutionEmitter>) -> Self {
        Self {
            store,
            emitter,
            neutrality: NeutralityValidator::new(),
        }
    }

    pub fn with_neutrality_validator(mut self, validator: NeutralityValidator) -> Self {
        self.neutrality = validator;
        self
    }

    /// Validate and persist a new proposal as PENDING.
    pub async fn create_proposal(
        &self,
        scope: &ProjectScope,
        draft: ProposalDraft,
    ) -> Result<Proposal> {
        // A missing affected edge is a create-time error, not an
        // execute-time surprise.
        let mut has_constitutive = false;
        for edge_id in &draft.affected_edges {
            let edge = self.store.get_edge(scope, *edge_id).await?;
            has_constitutive = has_constitutive || edge.is_constitutive();
        }

        // Infer the level when the caller is silent; an explicit downgrade
        // on a constitutive edge falls through to safeguard validation.
        let approval_level = match draft.approval_level {
            Some(level) => level,
            None if has_constitutive => ApprovalLevel::Bilateral,
            None => ApprovalLevel::Io,
        };

        // Safeguards first: an action that targets them is a safeguard
        // violation, not an unknown action.
        validate_safeguards(&draft.proposed_action.action, has_constitutive, approval_level)?;

        if !KNOWN_ACTIONS.contains(&draft.proposed_action.action.as_str()) {
            return Err(CoreError::validation(
                "proposed_action.action",
                format!("unrecognized action '{}'", draft.proposed_action.action),
            ));
        }

        if !draft.reasoning_from_template {
            let (is_neutral, violations) = self.neutrality.validate(&draft.reasoning).await;
            if !is_neutral {
                return Err(CoreError::Framing { violations });
            }
        }

        let proposal = Proposal {
            id: Uuid::new_v4(),
            project_id: scope.project_id().to_string(),
            trigger_type: draft.trigger_type,
            proposed_action: draft.proposed_action,
            affected_edges: draft.affected_edges,
            reasoning: draft.reasoning,
            approval_level,
            status: ProposalStatus::Pending,
            approved_by_io: false,
            approved_by_ethr: false,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            undo_deadline: None,
            metadata: Properties::new(),
        };

        let audit = AuditEntry::new(
            AuditAction::SmfPropose,
            "system",
            Some(proposal.id.to_string()),
            scope.project_id(),
            json!({
                "action": proposal.proposed_action.action,
                "trigger_type": proposal.trigger_type,
                "approval_level": proposal.approval_level,
                "affected_edges": proposal.affected_edges,
            }),
        );
        self.store.insert_proposal(scope, &proposal, audit).await?;

        info!(
            proposal_id = %proposal.id,
            action = %proposal.proposed_action.action,
            approval_level = ?proposal.approval_level,
            "proposal created"
        );
        Ok(proposal)
    }

    pub async fn get(&self, scope: &ProjectScope, proposal_id: Uuid) -> Result<Proposal> {
        Ok(self.store.get_proposal(scope, proposal_id).await?)
    }

    pub async fn get_pending(&self, scope: &ProjectScope) -> Result<Vec<Proposal>> {
        Ok(self.store.pending_proposals(scope).await?)
    }

    /// Record one actor's approval; execute when approvals are complete.
    pub async fn approve(
        &self,
        scope: &ProjectScope,
        proposal_id: Uuid,
        actor: Actor,
    ) -> Result<ApproveOutcome> {
        let mut proposal = self.store.get_proposal(scope, proposal_id).await?;

        if proposal.status != ProposalStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "proposal {proposal_id} is not pending (status {:?})",
                proposal.status
            )));
        }
        if proposal.approved_by(actor) {
            return Err(CoreError::Conflict(format!(
                "proposal {proposal_id} already approved by {}",
                actor.as_str()
            )));
        }

        // Safeguards run again before execution; the stored action may not
        // have drifted, but the check is cheap and the rule absolute.
        let mut has_constitutive = false;
        for edge_id in &proposal.affected_edges {
            if let Ok(edge) = self.store.get_edge(scope, *edge_id).await {
                has_constitutive = has_constitutive || edge.is_constitutive();
            }
        }
        validate_safeguards(
            &proposal.proposed_action.action,
            has_constitutive,
            proposal.approval_level,
        )?;

        match actor {
            Actor::Io => proposal.approved_by_io = true,
            Actor::Ethr => proposal.approved_by_ethr = true,
        }

        let audit = AuditEntry::new(
            AuditAction::SmfApprove,
            actor.as_str(),
            Some(proposal.id.to_string()),
            scope.project_id(),
            json!({
                "approved_by_io": proposal.approved_by_io,
                "approved_by_ethr": proposal.approved_by_ethr,
            }),
        );

        if !proposal.approvals_complete() {
            self.store.update_proposal(scope, &proposal, audit).await?;
            info!(
                proposal_id = %proposal.id,
                actor = actor.as_str(),
                "approval recorded, awaiting remaining consent"
            );
            return Ok(ApproveOutcome {
                proposal,
                fully_approved: false,
                executed: false,
            });
        }

        // Approvals complete: execute exactly once, then transition.
        match self.execute(scope, &proposal, actor).await {
            Ok(receipt) => {
                let now = Utc::now();
                proposal.status = ProposalStatus::Approved;
                proposal.resolved_at = Some(now);
                proposal.resolved_by = Some(actor.as_str().to_string());
                proposal.undo_deadline = Some(now + Duration::days(UNDO_RETENTION_DAYS));
                proposal.metadata.insert(
                    "execution".to_string(),
                    serde_json::to_value(&receipt).unwrap_or_default(),
                );
                self.store.update_proposal(scope, &proposal, audit).await?;
                info!(proposal_id = %proposal.id, actor = actor.as_str(), "proposal approved and executed");
                Ok(ApproveOutcome {
                    proposal,
                    fully_approved: true,
                    executed: true,
                })
            }
            Err(e) => {
                // Keep the approval flag (monotonic) but stay PENDING so the
                // execution can be retried after the cause is fixed.
                warn!(proposal_id = %proposal.id, error = %e, "execution failed, proposal stays pending");
                self.store.update_proposal(scope, &proposal, audit).await?;
                Err(e)
            }
        }
    }

    /// Reject a pending proposal with a reason.
    pub async fn reject(
        &self,
        scope: &ProjectScope,
        proposal_id: Uuid,
        reason: &str,
        actor: RejectActor,
    ) -> Result<Proposal> {
        if reason.trim().is_empty() {
            return Err(CoreError::validation("reason", "rejection reason is required"));
        }

        let mut proposal = self.store.get_proposal(scope, proposal_id).await?;
        if proposal.status != ProposalStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "proposal {proposal_id} is not pending (status {:?})",
                proposal.status
            )));
        }

        proposal.status = ProposalStatus::Rejected;
        proposal.resolved_at = Some(Utc::now());
        proposal.resolved_by = Some(actor.as_str().to_string());
        proposal
            .metadata
            .insert("rejection_reason".to_string(), json!(reason));

        let audit = AuditEntry::new(
            AuditAction::SmfReject,
            actor.as_str(),
            Some(proposal.id.to_string()),
            scope.project_id(),
            json!({"reason": reason}),
        );
        self.store.update_proposal(scope, &proposal, audit).await?;
        info!(proposal_id = %proposal.id, actor = actor.as_str(), "proposal rejected");
        Ok(proposal)
    }

    /// Reverse an approved proposal within the retention window.
    pub async fn undo(
        &self,
        scope: &ProjectScope,
        proposal_id: Uuid,
        actor: Actor,
    ) -> Result<Proposal> {
        let mut proposal = self.store.get_proposal(scope, proposal_id).await?;

        if proposal.status != ProposalStatus::Approved {
            return Err(CoreError::Conflict(format!(
                "proposal {proposal_id} is not approved (status {:?})",
                proposal.status
            )));
        }

        let deadline = proposal
            .undo_deadline
            .ok_or_else(|| CoreError::Handler(format!("proposal {proposal_id} has no undo deadline")))?;
        if Utc::now() > deadline {
            return Err(CoreError::RetentionExpired { deadline });
        }

        if let Some(receipt) = proposal.execution_receipt() {
            self.reverse(scope, &receipt, actor).await?;
        }

        let now = Utc::now();
        proposal.status = ProposalStatus::Undone;
        proposal.metadata.insert("undone_at".to_string(), json!(now.to_rfc3339()));
        proposal
            .metadata
            .insert("undone_by".to_string(), json!(actor.as_str()));

        let audit = AuditEntry::new(
            AuditAction::SmfUndo,
            actor.as_str(),
            Some(proposal.id.to_string()),
            scope.project_id(),
            json!({"undo_deadline": deadline.to_rfc3339()}),
        );
        self.store.update_proposal(scope, &proposal, audit).await?;
        info!(proposal_id = %proposal.id, actor = actor.as_str(), "proposal undone");
        Ok(proposal)
    }

    /// Approve every pending proposal matching the filter. Proposals already
    /// approved by `actor` are skipped; bilateral proposals that still need
    /// the other principal report as awaiting.
    pub async fn bulk_approve(
        &self,
        scope: &ProjectScope,
        filter: &BulkApproveFilter,
        actor: Actor,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<BulkApproveReport> {
        let pending = self.store.pending_proposals(scope).await?;

        let matched: Vec<Proposal> = pending
            .into_iter()
            .filter(|p| {
                if !filter.proposal_ids.is_empty() && !filter.proposal_ids.contains(&p.id) {
                    return false;
                }
                if let Some(rt) = filter.resolution_type {
                    if p.proposed_action.resolution_type != Some(rt) {
                        return false;
                    }
                }
                if let Some(level) = filter.approval_level {
                    if p.approval_level != level {
                        return false;
                    }
                }
                !p.approved_by(actor)
            })
            .collect();

        let mut report = BulkApproveReport {
            dry_run,
            total_matched: matched.len(),
            succeeded: Vec::new(),
            awaiting_bilateral: Vec::new(),
            failed: Vec::new(),
        };

        if dry_run {
            return Ok(report);
        }

        for proposal in matched {
            if cancel.is_cancelled() {
                break;
            }
            match self.approve(scope, proposal.id, actor).await {
                Ok(outcome) if outcome.fully_approved => report.succeeded.push(proposal.id),
                Ok(_) => report.awaiting_bilateral.push(proposal.id),
                Err(e) => report.failed.push(BulkFailure {
                    proposal_id: proposal.id,
                    error: e.to_string(),
                }),
            }
        }

        info!(
            actor = actor.as_str(),
            succeeded = report.succeeded.len(),
            awaiting = report.awaiting_bilateral.len(),
            failed = report.failed.len(),
            "bulk approval completed"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    async fn execute(
        &self,
        scope: &ProjectScope,
        proposal: &Proposal,
        actor: Actor,
    ) -> Result<ExecutionReceipt> {
        let action = &proposal.proposed_action;
        match action.action.as_str() {
            ACTION_RESOLVE_DISSONANCE => {
                let resolution_type = action.resolution_type.ok_or_else(|| {
                    CoreError::validation("proposed_action.resolution_type", "required for resolutions")
                })?;
                let (edge_a_id, edge_b_id) = match (action.edge_a_id, action.edge_b_id) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(CoreError::validation(
                            "proposed_action.edge_a_id",
                            "resolution requires both edge ids",
                        ));
                    }
                };
                let request = ResolutionRequest {
                    resolution_type,
                    review_id: action.review_id,
                    edge_a_id,
                    edge_b_id,
                    context: action.context.clone().unwrap_or_default(),
                };
                let outcome = self
                    .emitter
                    .emit(scope, &request, actor.as_str(), Utc::now())
                    .await?;
                Ok(ExecutionReceipt {
                    resolution_node_id: Some(outcome.resolution_id),
                    resolution_edge_ids: outcome.resolution_edge_ids,
                    superseded_edges: outcome.superseded_edges,
                    ..Default::default()
                })
            }
            ACTION_RECLASSIFY | ACTION_RECLASSIFY_SECTOR => {
                let edge_id = proposal.affected_edges.first().copied().ok_or_else(|| {
                    CoreError::validation("affected_edges", "reclassification names no edge")
                })?;
                let new_sector = action.new_sector.ok_or_else(|| {
                    CoreError::validation("proposed_action.new_sector", "required for reclassification")
                })?;
                let edge = self.store.get_edge(scope, edge_id).await?;
                let change = crate::reclassify::apply_sector_change(
                    self.store.as_ref(),
                    scope,
                    &edge,
                    new_sector,
                    actor.as_str(),
                    Some(proposal.id),
                )
                .await?;
                Ok(ExecutionReceipt {
                    reclassified: Some(change),
                    ..Default::default()
                })
            }
            ACTION_UPDATE_INSIGHT => {
                let insight_id = action.insight_id.ok_or_else(|| {
                    CoreError::validation("proposed_action.insight_id", "required for insight updates")
                })?;
                let previous = self.store.get_insight(scope, insight_id).await?;
                let patch = InsightPatch {
                    content: action.content.clone(),
                    memory_strength: action.memory_strength,
                    metadata: action
                        .extra
                        .get("metadata")
                        .and_then(|v| v.as_object().cloned()),
                };
                let audit = AuditEntry::new(
                    AuditAction::InsightUpdate,
                    actor.as_str(),
                    Some(insight_id.to_string()),
                    scope.project_id(),
                    json!({"proposal_id": proposal.id}),
                );
                self.store
                    .update_insight(scope, insight_id, patch, audit)
                    .await?;
                Ok(ExecutionReceipt {
                    insight_update: Some(InsightReceipt {
                        insight_id,
                        previous_content: previous.content,
                        previous_strength: previous.memory_strength,
                        previous_metadata: previous.metadata,
                    }),
                    ..Default::default()
                })
            }
            ACTION_DELETE_INSIGHT => {
                let insight_id = action.insight_id.ok_or_else(|| {
                    CoreError::validation("proposed_action.insight_id", "required for insight deletion")
                })?;
                let audit = AuditEntry::new(
                    AuditAction::InsightDelete,
                    actor.as_str(),
                    Some(insight_id.to_string()),
                    scope.project_id(),
                    json!({"proposal_id": proposal.id, "reason": action.reason}),
                );
                self.store
                    .soft_delete_insight(
                        scope,
                        insight_id,
                        actor.as_str(),
                        action.reason.as_deref().unwrap_or(""),
                        audit,
                    )
                    .await?;
                Ok(ExecutionReceipt {
                    insight_deleted: Some(insight_id),
                    ..Default::default()
                })
            }
            other => Err(CoreError::validation(
                "proposed_action.action",
                format!("unrecognized action '{other}'"),
            )),
        }
    }

    async fn reverse(
        &self,
        scope: &ProjectScope,
        receipt: &ExecutionReceipt,
        actor: Actor,
    ) -> Result<()> {
        self.emitter
            .orphan(scope, &receipt.resolution_edge_ids, actor.as_str())
            .await?;

        for edge_id in &receipt.superseded_edges {
            let audit = AuditEntry::new(
                AuditAction::EdgeSupersedeClear,
                actor.as_str(),
                Some(edge_id.to_string()),
                scope.project_id(),
                json!({"undo": true}),
            );
            self.store.clear_superseded(scope, *edge_id, audit).await?;
        }

        if let Some(change) = &receipt.reclassified {
            let edge = self.store.get_edge(scope, change.edge_id).await?;
            crate::reclassify::apply_sector_change(
                self.store.as_ref(),
                scope,
                &edge,
                change.from_sector,
                actor.as_str(),
                None,
            )
            .await?;
        }

        if let Some(insight) = &receipt.insight_update {
            let audit = AuditEntry::new(
                AuditAction::InsightUpdate,
                actor.as_str(),
                Some(insight.insight_id.to_string()),
                scope.project_id(),
                json!({"undo": true}),
            );
            self.store
                .update_insight(
                    scope,
                    insight.insight_id,
                    InsightPatch {
                        content: Some(insight.previous_content.clone()),
                        memory_strength: Some(insight.previous_strength),
                        metadata: Some(insight.previous_metadata.clone()),
                    },
                    audit,
                )
                .await?;
        }

        if let Some(insight_id) = receipt.insight_deleted {
            let audit = AuditEntry::new(
                AuditAction::InsightUpdate,
                actor.as_str(),
                Some(insight_id.to_string()),
                scope.project_id(),
                json!({"undo": true, "restored": true}),
            );
            self.store.restore_insight(scope, insight_id, audit).await?;
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
