//! Resolution hyperedges.
//!
//! A resolution documents how a dissonance was settled without deleting
//! anything. A deterministic resolution node anchors two `edge_type =
//! "resolution"` edges, one per original edge, whose property bags carry the
//! hyperedge references:
//!
//! - EVOLUTION: `supersedes = [edge_a]`, `superseded_by = [edge_b]`, and
//!   edge A is tombstoned in place
//! - CONTRADICTION / NUANCE: `affected_edges = [edge_a, edge_b]`
//!
//! Undo never deletes either: resolution edges are stamped `orphaned` and
//! supersede tombstones are cleared.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::dissonance::{ResolutionType, ReviewLog};
use crate::error::{CoreError, Result};
use crate::graph::{Edge, NewEdge, Properties};
use crate::store::{AuditSink, GraphStore, ProjectScope, Store};

// ============================================================================
// REQUEST / OUTCOME
// ============================================================================

/// Input for emitting one resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRequest {
    pub resolution_type: ResolutionType,
    /// The nuance review this resolution closes, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<Uuid>,
    pub edge_a_id: Uuid,
    pub edge_b_id: Uuid,
    /// Human description of the development (e.g. "position evolved from X
    /// to Y")
    pub context: String,
}

/// What was materialized
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    /// The resolution node
    pub resolution_id: Uuid,
    pub resolution_name: String,
    pub resolution_type: ResolutionType,
    pub edge_a_id: Uuid,
    pub edge_b_id: Uuid,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    /// The hyperedge legs
    pub resolution_edge_ids: Vec<Uuid>,
    /// Edges tombstoned by this resolution (EVOLUTION only)
    pub superseded_edges: Vec<Uuid>,
}

// ============================================================================
// EMITTER
// ============================================================================

/// Materializes resolutions and reverses them on undo.
pub struct ResolutionEmitter {
    store: Arc<dyn Store>,
    reviews: Arc<ReviewLog>,
}

impl ResolutionEmitter {
    pub fn new(store: Arc<dyn Store>, reviews: Arc<ReviewLog>) -> Self {
        Self { store, reviews }
    }

    /// Resolve through a pending nuance review: the review supplies the edge
    /// pair and is closed as CONFIRMED or RECLASSIFIED.
    pub async fn resolve_review(
        &self,
        scope: &ProjectScope,
        review_id: Uuid,
        resolution_type: ResolutionType,
        context: &str,
        resolved_by: &str,
    ) -> Result<ResolutionOutcome> {
        let review = self
            .reviews
            .get(review_id)
            .ok_or_else(|| CoreError::NotFound(format!("nuance review {review_id}")))?;

        let request = ResolutionRequest {
            resolution_type,
            review_id: Some(review_id),
            edge_a_id: review.dissonance.edge_a_id,
            edge_b_id: review.dissonance.edge_b_id,
            context: context.to_string(),
        };
        self.emit(scope, &request, resolved_by, Utc::now()).await
    }

    /// Emit one resolution. The resolution node name derives from the review
    /// id (or the edge pair), so re-emission reuses the node.
    pub async fn emit(
        &self,
        scope: &ProjectScope,
        request: &ResolutionRequest,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<ResolutionOutcome> {
        let edge_a = self.store.get_edge(scope, request.edge_a_id).await?;
        let edge_b = self.store.get_edge(scope, request.edge_b_id).await?;

        let resolution_name = match request.review_id {
            Some(review_id) => format!("resolution_{review_id}"),
            None => format!("resolution_{}_{}", request.edge_a_id, request.edge_b_id),
        };

        let mut node_properties = Properties::new();
        node_properties.insert("resolution_type".into(), json!(request.resolution_type));
        if let Some(review_id) = request.review_id {
            node_properties.insert("review_id".into(), json!(review_id));
        }
        let resolution_node = self
            .store
            .add_node(scope, &resolution_name, "Resolution", node_properties)
            .await?;

        let base = self.resolution_properties(request, resolved_by, resolved_at);
        let mut resolution_edge_ids = Vec::with_capacity(2);
        for (leg, original) in [("RESOLVES_A", &edge_a), ("RESOLVES_B", &edge_b)] {
            let mut properties = base.clone();
            properties.insert("resolved_edge".into(), json!(original.id));
            let edge = self
                .store
                .add_edge(
                    scope,
                    NewEdge {
                        source_id: resolution_node.id,
                        target_id: original.target_id,
                        relation: leg.to_string(),
                        weight: 1.0,
                        properties,
                        memory_sector: None,
                    },
                    None,
                )
                .await?;
            resolution_edge_ids.push(edge.id);
        }

        let mut superseded_edges = Vec::new();
        if request.resolution_type == ResolutionType::Evolution {
            let audit = AuditEntry::new(
                AuditAction::EdgeSupersede,
                resolved_by,
                Some(edge_a.id.to_string()),
                scope.project_id(),
                json!({"superseded_by": edge_b.id, "resolution": resolution_node.id}),
            );
            if self
                .store
                .mark_superseded(scope, edge_a.id, resolved_by, resolved_at, audit)
                .await?
            {
                superseded_edges.push(edge_a.id);
            }
        }

        if let Some(review_id) = request.review_id {
            let review = self
                .reviews
                .get(review_id)
                .ok_or_else(|| CoreError::NotFound(format!("nuance review {review_id}")))?;
            let reclassified_to = if request.resolution_type.as_dissonance()
                == review.dissonance.dissonance_type
            {
                None
            } else {
                Some(request.resolution_type.as_dissonance())
            };
            self.reviews
                .resolve(review_id, reclassified_to, Some(request.context.clone()))?;
        }

        self.store
            .record_audit(AuditEntry::new(
                AuditAction::ResolutionCreate,
                resolved_by,
                Some(resolution_node.id.to_string()),
                scope.project_id(),
                json!({
                    "resolution_type": request.resolution_type,
                    "edge_a_id": request.edge_a_id,
                    "edge_b_id": request.edge_b_id,
                    "context": request.context,
                }),
            ))
            .await;

        info!(
            resolution = %resolution_node.id,
            resolution_type = %request.resolution_type,
            edge_a = %request.edge_a_id,
            edge_b = %request.edge_b_id,
            resolved_by,
            "resolution emitted"
        );

        Ok(ResolutionOutcome {
            resolution_id: resolution_node.id,
            resolution_name,
            resolution_type: request.resolution_type,
            edge_a_id: request.edge_a_id,
            edge_b_id: request.edge_b_id,
            resolved_by: resolved_by.to_string(),
            resolved_at,
            resolution_edge_ids,
            superseded_edges,
        })
    }

    /// Undo path: stamp the resolution legs as orphaned. Supersede flags are
    /// cleared by the caller, which knows which edges it tombstoned.
    pub async fn orphan(
        &self,
        scope: &ProjectScope,
        resolution_edge_ids: &[Uuid],
        actor: &str,
    ) -> Result<()> {
        for edge_id in resolution_edge_ids {
            let mut merge = Properties::new();
            merge.insert("orphaned".into(), json!(true));
            let audit = AuditEntry::new(
                AuditAction::ResolutionOrphan,
                actor,
                Some(edge_id.to_string()),
                scope.project_id(),
                json!({"orphaned": true}),
            );
            self.store
                .set_edge_properties(scope, *edge_id, merge, Some(audit))
                .await?;
        }
        Ok(())
    }

    fn resolution_properties(
        &self,
        request: &ResolutionRequest,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
    ) -> Properties {
        let mut properties = Properties::new();
        properties.insert("edge_type".into(), json!("resolution"));
        properties.insert("resolution_type".into(), json!(request.resolution_type));
        properties.insert("context".into(), json!(request.context));
        properties.insert("resolved_by".into(), json!(resolved_by));
        properties.insert("resolved_at".into(), json!(resolved_at.to_rfc3339()));

        match request.resolution_type {
            ResolutionType::Evolution => {
                properties.insert("supersedes".into(), json!([request.edge_a_id]));
                properties.insert("superseded_by".into(), json!([request.edge_b_id]));
            }
            ResolutionType::Contradiction | ResolutionType::Nuance => {
                properties.insert(
                    "affected_edges".into(),
                    json!([request.edge_a_id, request.edge_b_id]),
                );
            }
        }
        properties
    }
}

/// Filter helper used by neighborhood consumers: keep resolution edges and
/// live edges, drop tombstoned ones.
pub fn filter_superseded(edges: Vec<Edge>) -> Vec<Edge> {
    edges.into_iter().filter(|e| !e.is_superseded()).collect()
}

// ============================================================================
// TESTS
// ============================================================================
