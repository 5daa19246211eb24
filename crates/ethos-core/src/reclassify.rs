//! Manual memory-sector reclassification.
//!
//! Non-constitutive edges reclassify directly. Constitutive edges require a
//! matching APPROVED proposal first; without one the caller gets a
//! consent-required outcome pointing at the approval tooling. The applied
//! change stamps `last_reclassification` into the edge's property bag and
//! writes one audit entry.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::error::Result;
use crate::graph::{Edge, Properties};
use crate::sector::MemorySector;
use crate::smf::{ApprovalLevel, SectorChange};
use crate::store::{GraphStore, ProjectScope, ProposalStore, Store};

// ============================================================================
// OUTCOMES
// ============================================================================

/// Structured outcome of a reclassification attempt
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReclassifyOutcome {
    Success {
        edge_id: Uuid,
        old_sector: MemorySector,
        new_sector: MemorySector,
    },
    InvalidSector {
        requested: String,
        valid: Vec<&'static str>,
    },
    NotFound {
        message: String,
    },
    /// Multiple candidate edges; the caller disambiguates with `edge_id`
    Ambiguous {
        edge_ids: Vec<Uuid>,
    },
    ConsentRequired {
        edge_id: Uuid,
        hint: String,
    },
}

/// Parameters for [`Reclassifier::reclassify`]
#[derive(Debug, Clone)]
pub struct ReclassifyParams {
    pub source_name: String,
    pub target_name: String,
    pub relation: String,
    /// Raw sector value; validated against the closed set
    pub new_sector: String,
    /// Disambiguates when several edges match
    pub edge_id: Option<Uuid>,
    pub actor: String,
}

// ============================================================================
// APPLY
// ============================================================================

/// Perform the sector change itself: sector column, reclassification stamp,
/// `modified_at`, audit entry, all in one store transaction. Consent has
/// been established by the caller.
pub async fn apply_sector_change(
    store: &dyn Store,
    scope: &ProjectScope,
    edge: &Edge,
    new_sector: MemorySector,
    actor: &str,
    proposal_id: Option<Uuid>,
) -> Result<SectorChange> {
    let old_sector = edge.memory_sector;
    let at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let mut reclassification = serde_json::Map::new();
    reclassification.insert("from_sector".into(), json!(old_sector));
    reclassification.insert("to_sector".into(), json!(new_sector));
    reclassification.insert("at".into(), json!(at));
    reclassification.insert("actor".into(), json!(actor));
    if let Some(id) = proposal_id {
        reclassification.insert("smf_proposal_id".into(), json!(id));
    }

    let mut stamp = Properties::new();
    stamp.insert("last_reclassification".into(), json!(reclassification));

    let audit = AuditEntry::new(
        AuditAction::EdgeReclassify,
        actor,
        Some(edge.id.to_string()),
        scope.project_id(),
        json!({
            "from_sector": old_sector,
            "to_sector": new_sector,
            "smf_proposal_id": proposal_id,
        }),
    );
    store
        .update_edge_sector(scope, edge.id, new_sector, stamp, audit)
        .await?;

    info!(
        edge_id = %edge.id,
        from_sector = %old_sector,
        to_sector = %new_sector,
        actor,
        "edge reclassified"
    );

    Ok(SectorChange {
        edge_id: edge.id,
        from_sector: old_sector,
        to_sector: new_sector,
    })
}

// ============================================================================
// RECLASSIFIER
// ============================================================================

/// The consent-aware manual reclassification path.
pub struct Reclassifier {
    store: std::sync::Arc<dyn Store>,
}

impl Reclassifier {
    pub fn new(store: std::sync::Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn reclassify(
        &self,
        scope: &ProjectScope,
        params: ReclassifyParams,
    ) -> Result<ReclassifyOutcome> {
        let Some(new_sector) = MemorySector::parse(&params.new_sector) else {
            return Ok(ReclassifyOutcome::InvalidSector {
                requested: params.new_sector,
                valid: crate::sector::ALL_SECTORS.iter().map(|s| s.as_str()).collect(),
            });
        };

        let mut edges = self
            .store
            .find_edges(scope, &params.source_name, &params.target_name, &params.relation)
            .await?;

        if edges.is_empty() {
            return Ok(ReclassifyOutcome::NotFound {
                message: format!(
                    "edge not found: {} --{}--> {}",
                    params.source_name, params.relation, params.target_name
                ),
            });
        }

        if let Some(edge_id) = params.edge_id {
            edges.retain(|e| e.id == edge_id);
            if edges.is_empty() {
                return Ok(ReclassifyOutcome::NotFound {
                    message: format!(
                        "edge {edge_id} not found among edges matching {} --{}--> {}",
                        params.source_name, params.relation, params.target_name
                    ),
                });
            }
        }

        if edges.len() > 1 {
            return Ok(ReclassifyOutcome::Ambiguous {
                edge_ids: edges.iter().map(|e| e.id).collect(),
            });
        }

        let edge = &edges[0];
        let mut proposal_id = None;

        if edge.is_constitutive() {
            match self.approved_proposal_for(scope, edge.id, new_sector).await? {
                Some(id) => proposal_id = Some(id),
                None => {
                    info!(edge_id = %edge.id, actor = %params.actor, "constitutive edge requires consent");
                    return Ok(ReclassifyOutcome::ConsentRequired {
                        edge_id: edge.id,
                        hint: "Use smf_pending_proposals and smf_approve to grant consent"
                            .to_string(),
                    });
                }
            }
        }

        let change = apply_sector_change(
            self.store.as_ref(),
            scope,
            edge,
            new_sector,
            &params.actor,
            proposal_id,
        )
        .await?;

        Ok(ReclassifyOutcome::Success {
            edge_id: change.edge_id,
            old_sector: change.from_sector,
            new_sector: change.to_sector,
        })
    }

    /// Look up an APPROVED reclassification proposal covering this edge.
    /// The proposal's sector, when it names one, has to match the requested
    /// sector; bilateral proposals have to carry both approvals.
    async fn approved_proposal_for(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        new_sector: MemorySector,
    ) -> Result<Option<Uuid>> {
        let Some(proposal) = self
            .store
            .find_approved_reclassification(scope, edge_id)
            .await?
        else {
            return Ok(None);
        };

        if let Some(proposed_sector) = proposal.proposed_action.new_sector {
            if proposed_sector != new_sector {
                info!(
                    edge_id = %edge_id,
                    proposal_id = %proposal.id,
                    proposed = %proposed_sector,
                    requested = %new_sector,
                    "approved proposal names a different sector"
                );
                return Ok(None);
            }
        }

        let consent_complete = match proposal.approval_level {
            ApprovalLevel::Bilateral => proposal.approved_by_io && proposal.approved_by_ethr,
            ApprovalLevel::Io => proposal.approved_by_io,
        };
        Ok(consent_complete.then_some(proposal.id))
    }
}

// ============================================================================
// TESTS
// ============================================================================
