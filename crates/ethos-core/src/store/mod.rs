//! Store boundary.
//!
//! The core talks to persistence through a handful of narrow async traits.
//! Two backends implement all of them:
//!
//! - [`PgStore`]: PostgreSQL with pgvector, row-level security scoped per
//!   request through `set_project_context`, audit rows co-committed with the
//!   business write.
//! - [`MemoryStore`]: an in-process backend for tests and local development
//!   with the same project-scoping semantics.
//!
//! Every operation carries the caller's [`ProjectScope`]; rows outside the
//! scope are invisible to reads and write attempts against them fail with a
//! project violation.

mod memory;
mod postgres;
mod schema;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use schema::MIGRATIONS;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::budget::{BudgetAlert, CostEntry};
use crate::config::DecayConfig;
use crate::error::StoreError;
use crate::graph::{
    Edge, EdgeScope, Insight, InsightPatch, Neighbor, NeighborQuery, NewEdge, Node, Properties,
};
use crate::retry::RetryLogEntry;
use crate::sector::MemorySector;
use crate::smf::Proposal;

// ============================================================================
// PROJECT SCOPE
// ============================================================================

/// The caller's project identity. Every read is filtered by it; every write
/// must target rows belonging to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectScope {
    project_id: String,
}

impl ProjectScope {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

// ============================================================================
// GRAPH STORE
// ============================================================================

/// Node and edge CRUD plus the neighborhood queries the engines consume.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create a node, idempotent on `(project, name)`: an existing node with
    /// the same name is returned unchanged.
    async fn add_node(
        &self,
        scope: &ProjectScope,
        name: &str,
        label: &str,
        properties: Properties,
    ) -> Result<Node, StoreError>;

    async fn get_node(&self, scope: &ProjectScope, node_id: Uuid) -> Result<Node, StoreError>;

    async fn find_node_by_name(
        &self,
        scope: &ProjectScope,
        name: &str,
    ) -> Result<Option<Node>, StoreError>;

    /// Create an edge, unique per `(project, source, target, relation)`.
    /// When `edge.memory_sector` is absent the sector classifier decides.
    async fn add_edge(
        &self,
        scope: &ProjectScope,
        edge: NewEdge,
        audit: Option<AuditEntry>,
    ) -> Result<Edge, StoreError>;

    async fn get_edge(&self, scope: &ProjectScope, edge_id: Uuid) -> Result<Edge, StoreError>;

    /// Edges touching `node_id` as source or target, newest modification
    /// first. `Recent` limits to edges touched within the last 30 days.
    async fn fetch_edges_for_node(
        &self,
        scope: &ProjectScope,
        node_id: Uuid,
        edge_scope: EdgeScope,
    ) -> Result<Vec<Edge>, StoreError>;

    /// All edges matching `(source name, target name, relation)`.
    async fn find_edges(
        &self,
        scope: &ProjectScope,
        source_name: &str,
        target_name: &str,
        relation: &str,
    ) -> Result<Vec<Edge>, StoreError>;

    /// Merge `merge` into the edge's property bag transactionally.
    async fn set_edge_properties(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        merge: Properties,
        audit: Option<AuditEntry>,
    ) -> Result<(), StoreError>;

    /// Set the sector, merge the reclassification stamp into the property
    /// bag, and touch `modified_at`, atomically.
    async fn update_edge_sector(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        new_sector: MemorySector,
        stamp: Properties,
        audit: AuditEntry,
    ) -> Result<(), StoreError>;

    /// Merge the supersede tombstone into the edge's property bag. Returns
    /// `true` if an existing edge was updated, `false` if not found.
    async fn mark_superseded(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        by: &str,
        at: DateTime<Utc>,
        audit: AuditEntry,
    ) -> Result<bool, StoreError>;

    /// Clear a supersede tombstone (undo path). Returns `true` if an edge
    /// was updated.
    async fn clear_superseded(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        audit: AuditEntry,
    ) -> Result<bool, StoreError>;

    /// Record an active engagement: bump `access_count`, stamp
    /// `last_engaged`.
    async fn record_engagement(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Result<(), StoreError>;

    /// Neighbors annotated with their inbound edge and decay-adjusted
    /// relevance. Superseded edges are filtered unless the query opts in.
    async fn query_neighbors(
        &self,
        scope: &ProjectScope,
        query: &NeighborQuery,
        decay: &DecayConfig,
    ) -> Result<Vec<Neighbor>, StoreError>;

    /// Best-effort memory strength via the endpoint nodes' linked insight
    /// vectors. Returns `None` on any failure, never errors.
    async fn get_memory_strength_for_edge(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Option<f64>;
}

// ============================================================================
// PROPOSAL STORE
// ============================================================================

/// Persistence for SMF proposals. State transitions for one proposal are
/// serialized by the backend (row lock in Postgres).
#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn insert_proposal(
        &self,
        scope: &ProjectScope,
        proposal: &Proposal,
        audit: AuditEntry,
    ) -> Result<(), StoreError>;

    async fn get_proposal(&self, scope: &ProjectScope, id: Uuid) -> Result<Proposal, StoreError>;

    async fn pending_proposals(&self, scope: &ProjectScope) -> Result<Vec<Proposal>, StoreError>;

    async fn update_proposal(
        &self,
        scope: &ProjectScope,
        proposal: &Proposal,
        audit: AuditEntry,
    ) -> Result<(), StoreError>;

    /// Latest APPROVED proposal whose action is a sector reclassification
    /// listing `edge_id` among its affected edges.
    async fn find_approved_reclassification(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Result<Option<Proposal>, StoreError>;
}

// ============================================================================
// INSIGHT STORE
// ============================================================================

/// Insight reads and the consent-gated write paths.
#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn get_insight(&self, scope: &ProjectScope, id: Uuid) -> Result<Insight, StoreError>;

    /// Apply a partial update. Fails with `NotFound` for absent or
    /// soft-deleted insights.
    async fn update_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        patch: InsightPatch,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError>;

    /// Soft-delete. Fails with `UniqueViolation`-class conflict when the
    /// insight is already deleted.
    async fn soft_delete_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        deleted_by: &str,
        reason: &str,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError>;

    /// Reverse a soft-delete (undo path).
    async fn restore_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError>;
}

// ============================================================================
// OBSERVABILITY SINKS
// ============================================================================

/// Cost accounting rows. Writes never fail callers.
#[async_trait]
pub trait CostLog: Send + Sync {
    async fn record_cost(&self, entry: CostEntry);

    async fn costs_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        api_name: Option<&str>,
    ) -> Result<Vec<CostEntry>, StoreError>;

    async fn record_budget_alert(&self, alert: BudgetAlert);
}

/// Retry outcome rows. Writes never fail callers.
#[async_trait]
pub trait RetryLog: Send + Sync {
    async fn record_retry(&self, entry: RetryLogEntry);
}

/// Standalone audit appends for transitions without a co-located store
/// write. Best-effort; failures are logged.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_audit(&self, entry: AuditEntry);
}

// ============================================================================
// COMPOSITE
// ============================================================================

/// The full store surface the application context wires together.
pub trait Store:
    GraphStore + ProposalStore + InsightStore + CostLog + RetryLog + AuditSink
{
}

impl<T> Store for T where
    T: GraphStore + ProposalStore + InsightStore + CostLog + RetryLog + AuditSink
{
}
