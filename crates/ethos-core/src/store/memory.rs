//! In-process store backend.
//!
//! Implements the full store surface over hash maps with the same
//! project-scoping semantics as the Postgres backend: reads outside the
//! caller's project see nothing, writes against foreign rows fail with a
//! project violation. Used by the test suites and by local development runs
//! without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::budget::{BudgetAlert, CostEntry};
use crate::config::DecayConfig;
use crate::error::StoreError;
use crate::graph::{
    Direction, Edge, EdgeScope, Insight, InsightPatch, Neighbor, NeighborQuery, NewEdge, Node,
    Properties,
};
use crate::relevance::relevance_score;
use crate::retry::RetryLogEntry;
use crate::sector::{MemorySector, classify_memory_sector};
use crate::smf::{Proposal, ProposalStatus};
use crate::store::{
    AuditSink, CostLog, GraphStore, InsightStore, ProjectScope, ProposalStore, RetryLog,
};

/// Window for `EdgeScope::Recent`
const RECENT_WINDOW_DAYS: i64 = 30;

#[derive(Default)]
struct Inner {
    nodes: HashMap<Uuid, Node>,
    node_names: HashMap<(String, String), Uuid>,
    edges: HashMap<Uuid, Edge>,
    insights: HashMap<Uuid, Insight>,
    proposals: HashMap<Uuid, Proposal>,
    audit: Vec<AuditEntry>,
    costs: Vec<CostEntry>,
    alerts: Vec<BudgetAlert>,
    retries: Vec<RetryLogEntry>,
}

/// Hash-map backed store with Postgres-equivalent scoping rules
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Inspection and seeding (tests, imports)
    // ------------------------------------------------------------------

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().unwrap().audit.clone()
    }

    pub fn cost_entries(&self) -> Vec<CostEntry> {
        self.inner.lock().unwrap().costs.clone()
    }

    pub fn budget_alerts(&self) -> Vec<BudgetAlert> {
        self.inner.lock().unwrap().alerts.clone()
    }

    pub fn retry_entries(&self) -> Vec<RetryLogEntry> {
        self.inner.lock().unwrap().retries.clone()
    }

    /// Seed an insight row directly.
    pub fn insert_insight(&self, insight: Insight) {
        self.inner.lock().unwrap().insights.insert(insight.id, insight);
    }

    /// Insert a fully-formed edge bypassing the uniqueness constraint.
    /// Exists so tests and importers can reproduce legacy duplicate rows.
    pub fn insert_edge_raw(&self, edge: Edge) -> Uuid {
        let id = edge.id;
        self.inner.lock().unwrap().edges.insert(id, edge);
        id
    }

    /// Link a node to an insight vector by node name.
    pub async fn link_node_vector(&self, scope: &ProjectScope, name: &str, vector_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        let key = (scope.project_id().to_string(), name.to_string());
        if let Some(id) = inner.node_names.get(&key).copied() {
            if let Some(node) = inner.nodes.get_mut(&id) {
                node.vector_id = Some(vector_id);
            }
        }
    }

    /// Insert a proposal row verbatim, bypassing lifecycle validation.
    pub fn insert_proposal_raw(&self, proposal: Proposal) {
        self.inner
            .lock()
            .unwrap()
            .proposals
            .insert(proposal.id, proposal);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn edge_for_write<'a>(
        edges: &'a mut HashMap<Uuid, Edge>,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Result<&'a mut Edge, StoreError> {
        match edges.get_mut(&edge_id) {
            None => Err(StoreError::NotFound(format!("edge {edge_id}"))),
            Some(edge) if edge.project_id != scope.project_id() => Err(
                StoreError::ProjectViolation(format!("edge {edge_id} belongs to another project")),
            ),
            Some(edge) => Ok(edge),
        }
    }
}

// ============================================================================
// GRAPH STORE
// ============================================================================

#[async_trait]
impl GraphStore for MemoryStore {
    async fn add_node(
        &self,
        scope: &ProjectScope,
        name: &str,
        label: &str,
        properties: Properties,
    ) -> Result<Node, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (scope.project_id().to_string(), name.to_string());
        if let Some(id) = inner.node_names.get(&key) {
            return Ok(inner.nodes[id].clone());
        }
        let node = Node {
            id: Uuid::new_v4(),
            project_id: scope.project_id().to_string(),
            name: name.to_string(),
            label: label.to_string(),
            properties,
            vector_id: None,
        };
        inner.node_names.insert(key, node.id);
        inner.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    async fn get_node(&self, scope: &ProjectScope, node_id: Uuid) -> Result<Node, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(&node_id)
            .filter(|n| n.project_id == scope.project_id())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("node {node_id}")))
    }

    async fn find_node_by_name(
        &self,
        scope: &ProjectScope,
        name: &str,
    ) -> Result<Option<Node>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let key = (scope.project_id().to_string(), name.to_string());
        Ok(inner
            .node_names
            .get(&key)
            .and_then(|id| inner.nodes.get(id))
            .cloned())
    }

    async fn add_edge(
        &self,
        scope: &ProjectScope,
        edge: NewEdge,
        audit: Option<AuditEntry>,
    ) -> Result<Edge, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let source = inner
            .nodes
            .get(&edge.source_id)
            .filter(|n| n.project_id == scope.project_id())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("source node {}", edge.source_id)))?;
        let target = inner
            .nodes
            .get(&edge.target_id)
            .filter(|n| n.project_id == scope.project_id())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("target node {}", edge.target_id)))?;

        let duplicate = inner.edges.values().any(|e| {
            e.project_id == scope.project_id()
                && e.source_id == edge.source_id
                && e.target_id == edge.target_id
                && e.relation == edge.relation
        });
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "edge {} -{}-> {} already exists",
                source.name, edge.relation, target.name
            )));
        }

        let sector = edge
            .memory_sector
            .unwrap_or_else(|| classify_memory_sector(&edge.relation, Some(&edge.properties)));

        let now = Utc::now();
        let stored = Edge {
            id: Uuid::new_v4(),
            project_id: scope.project_id().to_string(),
            source_id: edge.source_id,
            target_id: edge.target_id,
            relation: edge.relation,
            weight: edge.weight,
            properties: edge.properties,
            memory_sector: sector,
            created_at: now,
            modified_at: now,
            last_accessed: None,
            last_engaged: None,
            access_count: 0,
            source_name: Some(source.name),
            target_name: Some(target.name),
        };
        inner.edges.insert(stored.id, stored.clone());
        if let Some(entry) = audit {
            inner.audit.push(entry);
        }
        Ok(stored)
    }

    async fn get_edge(&self, scope: &ProjectScope, edge_id: Uuid) -> Result<Edge, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .edges
            .get(&edge_id)
            .filter(|e| e.project_id == scope.project_id())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("edge {edge_id}")))
    }

    async fn fetch_edges_for_node(
        &self,
        scope: &ProjectScope,
        node_id: Uuid,
        edge_scope: EdgeScope,
    ) -> Result<Vec<Edge>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let cutoff = Utc::now() - Duration::days(RECENT_WINDOW_DAYS);

        let mut edges: Vec<Edge> = inner
            .edges
            .values()
            .filter(|e| e.project_id == scope.project_id())
            .filter(|e| e.source_id == node_id || e.target_id == node_id)
            .filter(|e| match edge_scope {
                EdgeScope::Full => true,
                EdgeScope::Recent => {
                    e.modified_at >= cutoff
                        || e.last_accessed.is_some_and(|t| t >= cutoff)
                        || e.created_at >= cutoff
                }
            })
            .cloned()
            .collect();

        // Deterministic order: newest modification first, id as tie-break
        edges.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(edges)
    }

    async fn find_edges(
        &self,
        scope: &ProjectScope,
        source_name: &str,
        target_name: &str,
        relation: &str,
    ) -> Result<Vec<Edge>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let resolve = |name: &str| {
            inner
                .node_names
                .get(&(scope.project_id().to_string(), name.to_string()))
                .copied()
        };
        let (Some(source_id), Some(target_id)) = (resolve(source_name), resolve(target_name))
        else {
            return Ok(Vec::new());
        };

        let mut edges: Vec<Edge> = inner
            .edges
            .values()
            .filter(|e| {
                e.project_id == scope.project_id()
                    && e.source_id == source_id
                    && e.target_id == target_id
                    && e.relation == relation
            })
            .cloned()
            .collect();
        edges.sort_by_key(|e| e.created_at);
        Ok(edges)
    }

    async fn set_edge_properties(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        merge: Properties,
        audit: Option<AuditEntry>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let edge = Self::edge_for_write(&mut inner.edges, scope, edge_id)?;
        for (key, value) in merge {
            edge.properties.insert(key, value);
        }
        if let Some(entry) = audit {
            inner.audit.push(entry);
        }
        Ok(())
    }

    async fn update_edge_sector(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        new_sector: MemorySector,
        stamp: Properties,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let edge = Self::edge_for_write(&mut inner.edges, scope, edge_id)?;
        edge.memory_sector = new_sector;
        for (key, value) in stamp {
            edge.properties.insert(key, value);
        }
        edge.modified_at = Utc::now();
        inner.audit.push(audit);
        Ok(())
    }

    async fn mark_superseded(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        by: &str,
        at: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match Self::edge_for_write(&mut inner.edges, scope, edge_id) {
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
            Ok(edge) => {
                edge.properties.insert("superseded".into(), json!(true));
                edge.properties
                    .insert("superseded_at".into(), json!(at.to_rfc3339()));
                edge.properties.insert("superseded_by".into(), json!(by));
                inner.audit.push(audit);
                Ok(true)
            }
        }
    }

    async fn clear_superseded(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        audit: AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match Self::edge_for_write(&mut inner.edges, scope, edge_id) {
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
            Ok(edge) => {
                edge.properties.remove("superseded");
                edge.properties.remove("superseded_at");
                edge.properties.remove("superseded_by");
                inner.audit.push(audit);
                Ok(true)
            }
        }
    }

    async fn record_engagement(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let edge = Self::edge_for_write(&mut inner.edges, scope, edge_id)?;
        edge.access_count += 1;
        edge.last_engaged = Some(Utc::now());
        edge.last_accessed = Some(Utc::now());
        Ok(())
    }

    async fn query_neighbors(
        &self,
        scope: &ProjectScope,
        query: &NeighborQuery,
        decay: &DecayConfig,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let max_depth = query.depth.clamp(1, 3);

        let mut visited: std::collections::HashSet<Uuid> = [query.node_id].into();
        let mut frontier = vec![query.node_id];
        let mut neighbors = Vec::new();

        for depth in 1..=max_depth {
            let mut next_frontier = Vec::new();
            for &node_id in &frontier {
                let mut touching: Vec<&Edge> = inner
                    .edges
                    .values()
                    .filter(|e| e.project_id == scope.project_id())
                    .filter(|e| match query.direction {
                        Direction::Outgoing => e.source_id == node_id,
                        Direction::Incoming => e.target_id == node_id,
                        Direction::Both => e.source_id == node_id || e.target_id == node_id,
                    })
                    .filter(|e| {
                        query
                            .relation
                            .as_deref()
                            .is_none_or(|relation| e.relation == relation)
                    })
                    .filter(|e| query.include_superseded || !e.is_superseded())
                    .collect();
                touching.sort_by(|a, b| {
                    b.modified_at
                        .cmp(&a.modified_at)
                        .then_with(|| a.id.cmp(&b.id))
                });

                for edge in touching {
                    let other_id = if edge.source_id == node_id {
                        edge.target_id
                    } else {
                        edge.source_id
                    };
                    if visited.contains(&other_id) {
                        continue;
                    }
                    visited.insert(other_id);
                    let Some(node) = inner.nodes.get(&other_id) else {
                        continue;
                    };
                    neighbors.push(Neighbor {
                        node: node.clone(),
                        edge: edge.clone(),
                        relevance_score: relevance_score(edge, decay, now),
                        depth,
                    });
                    next_frontier.push(other_id);
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(neighbors)
    }

    async fn get_memory_strength_for_edge(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Option<f64> {
        let inner = self.inner.lock().unwrap();
        let edge = inner
            .edges
            .get(&edge_id)
            .filter(|e| e.project_id == scope.project_id())?;

        // Endpoint vector linkage first
        for node_id in [edge.source_id, edge.target_id] {
            if let Some(vector_id) = inner.nodes.get(&node_id).and_then(|n| n.vector_id) {
                if let Some(insight) = inner.insights.get(&vector_id) {
                    return Some(insight.memory_strength);
                }
            }
        }

        // Content-match fallback; unreliable but harmless
        let needle = edge_id.to_string();
        let found = inner
            .insights
            .values()
            .find(|i| i.project_id == scope.project_id() && i.content.contains(&needle))
            .map(|i| i.memory_strength);
        if found.is_none() {
            debug!(edge_id = %edge_id, "no memory strength resolvable for edge");
        }
        found
    }
}

// ============================================================================
// PROPOSAL STORE
// ============================================================================

#[async_trait]
impl ProposalStore for MemoryStore {
    async fn insert_proposal(
        &self,
        scope: &ProjectScope,
        proposal: &Proposal,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        // WITH CHECK semantics: a row for another project never lands
        if proposal.project_id != scope.project_id() {
            return Err(StoreError::ProjectViolation(format!(
                "proposal {} targets project '{}' from scope '{}'",
                proposal.id,
                proposal.project_id,
                scope.project_id()
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.proposals.contains_key(&proposal.id) {
            return Err(StoreError::UniqueViolation(format!(
                "proposal {} already exists",
                proposal.id
            )));
        }
        inner.proposals.insert(proposal.id, proposal.clone());
        inner.audit.push(audit);
        Ok(())
    }

    async fn get_proposal(&self, scope: &ProjectScope, id: Uuid) -> Result<Proposal, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .proposals
            .get(&id)
            .filter(|p| p.project_id == scope.project_id())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("proposal {id}")))
    }

    async fn pending_proposals(&self, scope: &ProjectScope) -> Result<Vec<Proposal>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut pending: Vec<Proposal> = inner
            .proposals
            .values()
            .filter(|p| p.project_id == scope.project_id() && p.status == ProposalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    async fn update_proposal(
        &self,
        scope: &ProjectScope,
        proposal: &Proposal,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.proposals.get(&proposal.id) {
            None => Err(StoreError::NotFound(format!("proposal {}", proposal.id))),
            Some(existing) if existing.project_id != scope.project_id() => {
                Err(StoreError::ProjectViolation(format!(
                    "proposal {} belongs to another project",
                    proposal.id
                )))
            }
            Some(_) => {
                inner.proposals.insert(proposal.id, proposal.clone());
                inner.audit.push(audit);
                Ok(())
            }
        }
    }

    async fn find_approved_reclassification(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Result<Option<Proposal>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<&Proposal> = inner
            .proposals
            .values()
            .filter(|p| {
                p.project_id == scope.project_id()
                    && p.status == ProposalStatus::Approved
                    && p.proposed_action.is_reclassification()
                    && p.affected_edges.contains(&edge_id)
            })
            .collect();
        matching.sort_by_key(|p| std::cmp::Reverse(p.resolved_at));
        Ok(matching.first().map(|p| (*p).clone()))
    }
}

// ============================================================================
// INSIGHT STORE
// ============================================================================

#[async_trait]
impl InsightStore for MemoryStore {
    async fn get_insight(&self, scope: &ProjectScope, id: Uuid) -> Result<Insight, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .insights
            .get(&id)
            .filter(|i| i.project_id == scope.project_id())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("insight {id}")))
    }

    async fn update_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        patch: InsightPatch,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let insight = match inner.insights.get_mut(&id) {
            None => return Err(StoreError::NotFound(format!("insight {id}"))),
            Some(i) if i.project_id != scope.project_id() => {
                return Err(StoreError::ProjectViolation(format!(
                    "insight {id} belongs to another project"
                )));
            }
            Some(i) => i,
        };
        if insight.is_deleted {
            return Err(StoreError::NotFound(format!("insight {id} is deleted")));
        }

        if let Some(content) = patch.content {
            insight.content = content;
        }
        if let Some(strength) = patch.memory_strength {
            insight.memory_strength = strength.clamp(0.0, 1.0);
        }
        if let Some(metadata) = patch.metadata {
            insight.metadata = metadata;
        }
        let updated = insight.clone();
        inner.audit.push(audit);
        Ok(updated)
    }

    async fn soft_delete_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        deleted_by: &str,
        reason: &str,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let insight = match inner.insights.get_mut(&id) {
            None => return Err(StoreError::NotFound(format!("insight {id}"))),
            Some(i) if i.project_id != scope.project_id() => {
                return Err(StoreError::ProjectViolation(format!(
                    "insight {id} belongs to another project"
                )));
            }
            Some(i) => i,
        };
        if insight.is_deleted {
            return Err(StoreError::UniqueViolation(format!(
                "insight {id} already deleted"
            )));
        }

        insight.is_deleted = true;
        insight.deleted_at = Some(Utc::now());
        insight.deleted_by = Some(deleted_by.to_string());
        insight.deleted_reason = Some(reason.to_string());
        let deleted = insight.clone();
        inner.audit.push(audit);
        Ok(deleted)
    }

    async fn restore_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let insight = match inner.insights.get_mut(&id) {
            None => return Err(StoreError::NotFound(format!("insight {id}"))),
            Some(i) if i.project_id != scope.project_id() => {
                return Err(StoreError::ProjectViolation(format!(
                    "insight {id} belongs to another project"
                )));
            }
            Some(i) => i,
        };
        insight.is_deleted = false;
        insight.deleted_at = None;
        insight.deleted_by = None;
        insight.deleted_reason = None;
        let restored = insight.clone();
        inner.audit.push(audit);
        Ok(restored)
    }
}

// ============================================================================
// SINKS
// ============================================================================

#[async_trait]
impl CostLog for MemoryStore {
    async fn record_cost(&self, entry: CostEntry) {
        self.inner.lock().unwrap().costs.push(entry);
    }

    async fn costs_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        api_name: Option<&str>,
    ) -> Result<Vec<CostEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .costs
            .iter()
            .filter(|c| c.date >= start && c.date <= end)
            .filter(|c| api_name.is_none_or(|name| c.api_name == name))
            .cloned()
            .collect())
    }

    async fn record_budget_alert(&self, alert: BudgetAlert) {
        self.inner.lock().unwrap().alerts.push(alert);
    }
}

#[async_trait]
impl RetryLog for MemoryStore {
    async fn record_retry(&self, entry: RetryLogEntry) {
        self.inner.lock().unwrap().retries.push(entry);
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record_audit(&self, entry: AuditEntry) {
        self.inner.lock().unwrap().audit.push(entry);
    }
}

// ============================================================================
// TESTS
// ============================================================================
