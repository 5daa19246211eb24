//! PostgreSQL store backend.
//!
//! Every operation runs in its own transaction that first installs the
//! caller's project through `set_project_context` (transaction-local, so
//! pooled connections never carry a stale scope) and co-commits the audit
//! entry with the business write. Row-level security does the actual
//! scoping; a row outside the caller's project is simply invisible, and an
//! insert for a foreign project fails the WITH CHECK policy.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Transaction};
use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::budget::{BudgetAlert, CostEntry};
use crate::config::DecayConfig;
use crate::error::{CoreError, Result as CoreResult, StoreError};
use crate::graph::{
    Direction, Edge, EdgeScope, Insight, InsightPatch, Neighbor, NeighborQuery, NewEdge, Node,
    Properties,
};
use crate::relevance::relevance_score;
use crate::retry::RetryLogEntry;
use crate::sector::{MemorySector, classify_memory_sector};
use crate::smf::{ApprovalLevel, Proposal, ProposalStatus, ProposedAction, TriggerType};
use crate::store::{
    AuditSink, CostLog, GraphStore, InsightStore, MIGRATIONS, ProjectScope, ProposalStore,
    RetryLog,
};

const RECENT_WINDOW_DAYS: i64 = 30;

/// Postgres + pgvector backend
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Connect a pool against `database_url` and apply the schema.
    pub async fn connect(database_url: &str, max_connections: usize) -> CoreResult<Self> {
        let pg_config = tokio_postgres::Config::from_str(database_url)
            .map_err(|e| CoreError::validation("DATABASE_URL", e.to_string()))?;
        // DISCARD ALL on recycle: no session state survives reuse
        let mut manager_config = ManagerConfig::default();
        manager_config.recycling_method = RecyclingMethod::Clean;
        let manager = Manager::from_config(pg_config, NoTls, manager_config);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| CoreError::Handler(format!("pool construction: {e}")))?;

        let store = Self { pool };
        store.apply_migrations().await?;
        Ok(store)
    }

    async fn apply_migrations(&self) -> CoreResult<()> {
        let client = self.pool.get().await.map_err(pool_err)?;
        for statement in MIGRATIONS {
            client.batch_execute(statement).await.map_err(|e| {
                CoreError::Handler(format!("migration failed: {e}"))
            })?;
        }
        debug!(statements = MIGRATIONS.len(), "schema migrations applied");
        Ok(())
    }

    /// Open a scoped transaction: project context installed, audit co-commit
    /// available.
    async fn begin<'a>(
        client: &'a mut deadpool_postgres::Object,
        scope: &ProjectScope,
    ) -> Result<Transaction<'a>, StoreError> {
        let tx = client.transaction().await.map_err(pg_err)?;
        tx.execute("SELECT set_project_context($1)", &[&scope.project_id()])
            .await
            .map_err(pg_err)?;
        Ok(tx)
    }

    async fn insert_audit(tx: &Transaction<'_>, entry: &AuditEntry) -> Result<(), StoreError> {
        tx.execute(
            "INSERT INTO audit_log (timestamp, actor, action, target_id, project_id, payload)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &entry.timestamp,
                &entry.actor,
                &entry.action.as_str(),
                &entry.target_id,
                &entry.project_id,
                &entry.payload,
            ],
        )
        .await
        .map_err(pg_err)?;
        Ok(())
    }
}

// ============================================================================
// ERROR AND ROW MAPPING
// ============================================================================

fn pool_err(e: deadpool_postgres::PoolError) -> StoreError {
    StoreError::Backend(format!("connection pool: {e}"))
}

fn pg_err(e: tokio_postgres::Error) -> StoreError {
    match e.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
            StoreError::UniqueViolation(e.to_string())
        }
        Some(code)
            if *code == SqlState::INSUFFICIENT_PRIVILEGE
                || *code == SqlState::CHECK_VIOLATION =>
        {
            StoreError::ProjectViolation(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn properties_from(value: Value) -> Properties {
    value.as_object().cloned().unwrap_or_default()
}

fn node_from_row(row: &Row) -> Result<Node, StoreError> {
    Ok(Node {
        id: row.try_get("id").map_err(pg_err)?,
        project_id: row.try_get("project_id").map_err(pg_err)?,
        name: row.try_get("name").map_err(pg_err)?,
        label: row.try_get("label").map_err(pg_err)?,
        properties: properties_from(row.try_get("properties").map_err(pg_err)?),
        vector_id: row.try_get("vector_id").map_err(pg_err)?,
    })
}

fn edge_from_row(row: &Row) -> Result<Edge, StoreError> {
    let sector: String = row.try_get("memory_sector").map_err(pg_err)?;
    Ok(Edge {
        id: row.try_get("id").map_err(pg_err)?,
        project_id: row.try_get("project_id").map_err(pg_err)?,
        source_id: row.try_get("source_id").map_err(pg_err)?,
        target_id: row.try_get("target_id").map_err(pg_err)?,
        relation: row.try_get("relation").map_err(pg_err)?,
        weight: row.try_get("weight").map_err(pg_err)?,
        properties: properties_from(row.try_get("properties").map_err(pg_err)?),
        memory_sector: MemorySector::parse(&sector).unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(pg_err)?,
        modified_at: row.try_get("modified_at").map_err(pg_err)?,
        last_accessed: row.try_get("last_accessed").map_err(pg_err)?,
        last_engaged: row.try_get("last_engaged").map_err(pg_err)?,
        access_count: row.try_get("access_count").map_err(pg_err)?,
        source_name: row.try_get("source_name").ok(),
        target_name: row.try_get("target_name").ok(),
    })
}

fn insight_from_row(row: &Row) -> Result<Insight, StoreError> {
    let embedding: Option<pgvector::Vector> = row.try_get("embedding").map_err(pg_err)?;
    Ok(Insight {
        id: row.try_get("id").map_err(pg_err)?,
        project_id: row.try_get("project_id").map_err(pg_err)?,
        content: row.try_get("content").map_err(pg_err)?,
        embedding: embedding.map(|v| v.as_slice().to_vec()),
        source_ids: row.try_get("source_ids").map_err(pg_err)?,
        memory_strength: row.try_get("memory_strength").map_err(pg_err)?,
        metadata: properties_from(row.try_get("metadata").map_err(pg_err)?),
        is_deleted: row.try_get("is_deleted").map_err(pg_err)?,
        deleted_at: row.try_get("deleted_at").map_err(pg_err)?,
        deleted_by: row.try_get("deleted_by").map_err(pg_err)?,
        deleted_reason: row.try_get("deleted_reason").map_err(pg_err)?,
    })
}

fn trigger_type_to_str(t: TriggerType) -> &'static str {
    match t {
        TriggerType::Dissonance => "DISSONANCE",
        TriggerType::Manual => "MANUAL",
        TriggerType::Proactive => "PROACTIVE",
    }
}

fn trigger_type_from_str(s: &str) -> TriggerType {
    match s {
        "DISSONANCE" => TriggerType::Dissonance,
        "PROACTIVE" => TriggerType::Proactive,
        _ => TriggerType::Manual,
    }
}

fn approval_level_to_str(level: ApprovalLevel) -> &'static str {
    match level {
        ApprovalLevel::Io => "io",
        ApprovalLevel::Bilateral => "bilateral",
    }
}

fn approval_level_from_str(s: &str) -> ApprovalLevel {
    if s == "bilateral" {
        ApprovalLevel::Bilateral
    } else {
        ApprovalLevel::Io
    }
}

fn status_to_str(status: ProposalStatus) -> &'static str {
    match status {
        ProposalStatus::Pending => "PENDING",
        ProposalStatus::Approved => "APPROVED",
        ProposalStatus::Rejected => "REJECTED",
        ProposalStatus::Undone => "UNDONE",
    }
}

fn status_from_str(s: &str) -> ProposalStatus {
    match s {
        "APPROVED" => ProposalStatus::Approved,
        "REJECTED" => ProposalStatus::Rejected,
        "UNDONE" => ProposalStatus::Undone,
        _ => ProposalStatus::Pending,
    }
}

fn proposal_from_row(row: &Row) -> Result<Proposal, StoreError> {
    let trigger: String = row.try_get("trigger_type").map_err(pg_err)?;
    let level: String = row.try_get("approval_level").map_err(pg_err)?;
    let status: String = row.try_get("status").map_err(pg_err)?;
    let action_raw: Value = row.try_get("proposed_action").map_err(pg_err)?;
    let proposed_action: ProposedAction = serde_json::from_value(action_raw)
        .map_err(|e| StoreError::Backend(format!("malformed proposed_action: {e}")))?;

    Ok(Proposal {
        id: row.try_get("id").map_err(pg_err)?,
        project_id: row.try_get("project_id").map_err(pg_err)?,
        trigger_type: trigger_type_from_str(&trigger),
        proposed_action,
        affected_edges: row.try_get("affected_edges").map_err(pg_err)?,
        reasoning: row.try_get("reasoning").map_err(pg_err)?,
        approval_level: approval_level_from_str(&level),
        status: status_from_str(&status),
        approved_by_io: row.try_get("approved_by_io").map_err(pg_err)?,
        approved_by_ethr: row.try_get("approved_by_ethr").map_err(pg_err)?,
        created_at: row.try_get("created_at").map_err(pg_err)?,
        resolved_at: row.try_get("resolved_at").map_err(pg_err)?,
        resolved_by: row.try_get("resolved_by").map_err(pg_err)?,
        undo_deadline: row.try_get("undo_deadline").map_err(pg_err)?,
        metadata: properties_from(row.try_get("metadata").map_err(pg_err)?),
    })
}

const EDGE_COLUMNS: &str = "e.id, e.project_id, e.source_id, e.target_id, e.relation, e.weight, \
     e.properties, e.memory_sector, e.created_at, e.modified_at, e.last_accessed, \
     e.last_engaged, e.access_count, ns.name AS source_name, nt.name AS target_name";

// ============================================================================
// GRAPH STORE
// ============================================================================

#[async_trait]
impl GraphStore for PgStore {
    async fn add_node(
        &self,
        scope: &ProjectScope,
        name: &str,
        label: &str,
        properties: Properties,
    ) -> Result<Node, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_one(
                "INSERT INTO nodes (project_id, name, label, properties)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (project_id, name) DO UPDATE SET name = EXCLUDED.name
                 RETURNING id, project_id, name, label, properties, vector_id",
                &[
                    &scope.project_id(),
                    &name,
                    &label,
                    &Value::Object(properties),
                ],
            )
            .await
            .map_err(pg_err)?;
        let node = node_from_row(&row)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(node)
    }

    async fn get_node(&self, scope: &ProjectScope, node_id: Uuid) -> Result<Node, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_opt(
                "SELECT id, project_id, name, label, properties, vector_id
                 FROM nodes WHERE id = $1",
                &[&node_id],
            )
            .await
            .map_err(pg_err)?
            .ok_or_else(|| StoreError::NotFound(format!("node {node_id}")))?;
        let node = node_from_row(&row)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(node)
    }

    async fn find_node_by_name(
        &self,
        scope: &ProjectScope,
        name: &str,
    ) -> Result<Option<Node>, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_opt(
                "SELECT id, project_id, name, label, properties, vector_id
                 FROM nodes WHERE name = $1",
                &[&name],
            )
            .await
            .map_err(pg_err)?;
        let node = row.as_ref().map(node_from_row).transpose()?;
        tx.commit().await.map_err(pg_err)?;
        Ok(node)
    }

    async fn add_edge(
        &self,
        scope: &ProjectScope,
        edge: NewEdge,
        audit: Option<AuditEntry>,
    ) -> Result<Edge, StoreError> {
        let sector = edge
            .memory_sector
            .unwrap_or_else(|| classify_memory_sector(&edge.relation, Some(&edge.properties)));

        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_one(
                format!(
                    "WITH inserted AS (
                         INSERT INTO edges
                             (project_id, source_id, target_id, relation, weight, properties, memory_sector)
                         VALUES ($1, $2, $3, $4, $5, $6, $7)
                         RETURNING *
                     )
                     SELECT {columns}
                     FROM inserted e
                     JOIN nodes ns ON e.source_id = ns.id
                     JOIN nodes nt ON e.target_id = nt.id",
                    columns = EDGE_COLUMNS
                ).as_str(),
                &[
                    &scope.project_id(),
                    &edge.source_id,
                    &edge.target_id,
                    &edge.relation,
                    &edge.weight,
                    &Value::Object(edge.properties),
                    &sector.as_str(),
                ],
            )
            .await
            .map_err(pg_err)?;
        let stored = edge_from_row(&row)?;
        if let Some(entry) = &audit {
            Self::insert_audit(&tx, entry).await?;
        }
        tx.commit().await.map_err(pg_err)?;
        Ok(stored)
    }

    async fn get_edge(&self, scope: &ProjectScope, edge_id: Uuid) -> Result<Edge, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_opt(
                format!(
                    "SELECT {EDGE_COLUMNS}
                     FROM edges e
                     JOIN nodes ns ON e.source_id = ns.id
                     JOIN nodes nt ON e.target_id = nt.id
                     WHERE e.id = $1"
                ).as_str(),
                &[&edge_id],
            )
            .await
            .map_err(pg_err)?
            .ok_or_else(|| StoreError::NotFound(format!("edge {edge_id}")))?;
        let edge = edge_from_row(&row)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(edge)
    }

    async fn fetch_edges_for_node(
        &self,
        scope: &ProjectScope,
        node_id: Uuid,
        edge_scope: EdgeScope,
    ) -> Result<Vec<Edge>, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;

        let cutoff = Utc::now() - Duration::days(RECENT_WINDOW_DAYS);
        let rows = match edge_scope {
            EdgeScope::Recent => {
                tx.query(
                    format!(
                        "SELECT {EDGE_COLUMNS}
                         FROM edges e
                         JOIN nodes ns ON e.source_id = ns.id
                         JOIN nodes nt ON e.target_id = nt.id
                         WHERE (e.source_id = $1 OR e.target_id = $1)
                           AND (e.modified_at >= $2 OR e.last_accessed >= $2 OR e.created_at >= $2)
                         ORDER BY e.modified_at DESC, e.id"
                    ).as_str(),
                    &[&node_id, &cutoff],
                )
                .await
            }
            EdgeScope::Full => {
                tx.query(
                    format!(
                        "SELECT {EDGE_COLUMNS}
                         FROM edges e
                         JOIN nodes ns ON e.source_id = ns.id
                         JOIN nodes nt ON e.target_id = nt.id
                         WHERE e.source_id = $1 OR e.target_id = $1
                         ORDER BY e.modified_at DESC, e.id"
                    ).as_str(),
                    &[&node_id],
                )
                .await
            }
        }
        .map_err(pg_err)?;

        let edges = rows.iter().map(edge_from_row).collect::<Result<Vec<_>, _>>()?;
        tx.commit().await.map_err(pg_err)?;
        Ok(edges)
    }

    async fn find_edges(
        &self,
        scope: &ProjectScope,
        source_name: &str,
        target_name: &str,
        relation: &str,
    ) -> Result<Vec<Edge>, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let rows = tx
            .query(
                format!(
                    "SELECT {EDGE_COLUMNS}
                     FROM edges e
                     JOIN nodes ns ON e.source_id = ns.id
                     JOIN nodes nt ON e.target_id = nt.id
                     WHERE ns.name = $1 AND nt.name = $2 AND e.relation = $3
                     ORDER BY e.created_at"
                ).as_str(),
                &[&source_name, &target_name, &relation],
            )
            .await
            .map_err(pg_err)?;
        let edges = rows.iter().map(edge_from_row).collect::<Result<Vec<_>, _>>()?;
        tx.commit().await.map_err(pg_err)?;
        Ok(edges)
    }

    async fn set_edge_properties(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        merge: Properties,
        audit: Option<AuditEntry>,
    ) -> Result<(), StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let updated = tx
            .execute(
                "UPDATE edges
                 SET properties = coalesce(properties, '{}'::jsonb) || $2::jsonb
                 WHERE id = $1",
                &[&edge_id, &Value::Object(merge)],
            )
            .await
            .map_err(pg_err)?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("edge {edge_id}")));
        }
        if let Some(entry) = &audit {
            Self::insert_audit(&tx, entry).await?;
        }
        tx.commit().await.map_err(pg_err)?;
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
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let updated = tx
            .execute(
                "UPDATE edges
                 SET memory_sector = $2,
                     properties = coalesce(properties, '{}'::jsonb) || $3::jsonb,
                     modified_at = now()
                 WHERE id = $1",
                &[&edge_id, &new_sector.as_str(), &Value::Object(stamp)],
            )
            .await
            .map_err(pg_err)?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("edge {edge_id}")));
        }
        Self::insert_audit(&tx, &audit).await?;
        tx.commit().await.map_err(pg_err)?;
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
        let merge = serde_json::json!({
            "superseded": true,
            "superseded_at": at.to_rfc3339(),
            "superseded_by": by,
        });
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let updated = tx
            .execute(
                "UPDATE edges
                 SET properties = coalesce(properties, '{}'::jsonb) || $2::jsonb
                 WHERE id = $1",
                &[&edge_id, &merge],
            )
            .await
            .map_err(pg_err)?;
        if updated > 0 {
            Self::insert_audit(&tx, &audit).await?;
        }
        tx.commit().await.map_err(pg_err)?;
        Ok(updated > 0)
    }

    async fn clear_superseded(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
        audit: AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let updated = tx
            .execute(
                "UPDATE edges
                 SET properties = properties - 'superseded' - 'superseded_at' - 'superseded_by'
                 WHERE id = $1",
                &[&edge_id],
            )
            .await
            .map_err(pg_err)?;
        if updated > 0 {
            Self::insert_audit(&tx, &audit).await?;
        }
        tx.commit().await.map_err(pg_err)?;
        Ok(updated > 0)
    }

    async fn record_engagement(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let updated = tx
            .execute(
                "UPDATE edges
                 SET access_count = access_count + 1,
                     last_engaged = now(),
                     last_accessed = now()
                 WHERE id = $1",
                &[&edge_id],
            )
            .await
            .map_err(pg_err)?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("edge {edge_id}")));
        }
        tx.commit().await.map_err(pg_err)?;
        Ok(())
    }

    async fn query_neighbors(
        &self,
        scope: &ProjectScope,
        query: &NeighborQuery,
        decay: &DecayConfig,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;

        let direction_clause = match query.direction {
            Direction::Outgoing => "e.source_id = ANY($1)",
            Direction::Incoming => "e.target_id = ANY($1)",
            Direction::Both => "(e.source_id = ANY($1) OR e.target_id = ANY($1))",
        };
        let sql = format!(
            "SELECT {EDGE_COLUMNS}
             FROM edges e
             JOIN nodes ns ON e.source_id = ns.id
             JOIN nodes nt ON e.target_id = nt.id
             WHERE {direction_clause}
               AND ($2::text IS NULL OR e.relation = $2)
             ORDER BY e.modified_at DESC, e.id"
        );

        let now = Utc::now();
        let max_depth = query.depth.clamp(1, 3);
        let mut visited: std::collections::HashSet<Uuid> = [query.node_id].into();
        let mut frontier = vec![query.node_id];
        let mut neighbors = Vec::new();

        for depth in 1..=max_depth {
            if frontier.is_empty() {
                break;
            }
            let rows = tx
                .query(&sql, &[&frontier, &query.relation])
                .await
                .map_err(pg_err)?;
            let mut next_frontier = Vec::new();

            for row in &rows {
                let edge = edge_from_row(row)?;
                if !query.include_superseded && edge.is_superseded() {
                    continue;
                }
                let other_id = if frontier.contains(&edge.source_id) {
                    edge.target_id
                } else {
                    edge.source_id
                };
                if visited.contains(&other_id) {
                    continue;
                }
                visited.insert(other_id);

                let node_row = tx
                    .query_opt(
                        "SELECT id, project_id, name, label, properties, vector_id
                         FROM nodes WHERE id = $1",
                        &[&other_id],
                    )
                    .await
                    .map_err(pg_err)?;
                let Some(node_row) = node_row else { continue };

                let score = relevance_score(&edge, decay, now);
                neighbors.push(Neighbor {
                    node: node_from_row(&node_row)?,
                    edge,
                    relevance_score: score,
                    depth,
                });
                next_frontier.push(other_id);
            }
            frontier = next_frontier;
        }

        tx.commit().await.map_err(pg_err)?;
        Ok(neighbors)
    }

    async fn get_memory_strength_for_edge(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Option<f64> {
        let result: Result<Option<f64>, StoreError> = async {
            let mut client = self.pool.get().await.map_err(pool_err)?;
            let tx = Self::begin(&mut client, scope).await?;

            // Endpoint vector linkage first
            let row = tx
                .query_opt(
                    "SELECT COALESCE(
                         (SELECT memory_strength FROM l2_insights WHERE id = ns.vector_id),
                         (SELECT memory_strength FROM l2_insights WHERE id = nt.vector_id)
                     ) AS memory_strength
                     FROM edges e
                     JOIN nodes ns ON e.source_id = ns.id
                     JOIN nodes nt ON e.target_id = nt.id
                     WHERE e.id = $1",
                    &[&edge_id],
                )
                .await
                .map_err(pg_err)?;
            if let Some(row) = row {
                if let Ok(Some(strength)) = row.try_get::<_, Option<f64>>("memory_strength") {
                    tx.commit().await.map_err(pg_err)?;
                    return Ok(Some(strength));
                }
            }

            // Content-match fallback; unreliable but harmless
            let pattern = format!("%{edge_id}%");
            let row = tx
                .query_opt(
                    "SELECT memory_strength FROM l2_insights WHERE content ILIKE $1 LIMIT 1",
                    &[&pattern],
                )
                .await
                .map_err(pg_err)?;
            let strength = row
                .and_then(|r| r.try_get::<_, Option<f64>>("memory_strength").ok())
                .flatten();
            tx.commit().await.map_err(pg_err)?;
            Ok(strength)
        }
        .await;

        match result {
            Ok(strength) => strength,
            Err(e) => {
                debug!(edge_id = %edge_id, error = %e, "memory strength lookup failed");
                None
            }
        }
    }
}

// ============================================================================
// PROPOSAL STORE
// ============================================================================

const PROPOSAL_COLUMNS: &str = "id, project_id, trigger_type, proposed_action, affected_edges, \
     reasoning, approval_level, status, approved_by_io, approved_by_ethr, created_at, \
     resolved_at, resolved_by, undo_deadline, metadata";

#[async_trait]
impl ProposalStore for PgStore {
    async fn insert_proposal(
        &self,
        scope: &ProjectScope,
        proposal: &Proposal,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let action = serde_json::to_value(&proposal.proposed_action)
            .map_err(|e| StoreError::Backend(format!("serialize proposed_action: {e}")))?;
        let metadata = Value::Object(proposal.metadata.clone());

        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        tx.execute(
            "INSERT INTO smf_proposals
                 (id, project_id, trigger_type, proposed_action, affected_edges, reasoning,
                  approval_level, status, approved_by_io, approved_by_ethr, created_at,
                  resolved_at, resolved_by, undo_deadline, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            &[
                &proposal.id,
                &proposal.project_id,
                &trigger_type_to_str(proposal.trigger_type),
                &action,
                &proposal.affected_edges,
                &proposal.reasoning,
                &approval_level_to_str(proposal.approval_level),
                &status_to_str(proposal.status),
                &proposal.approved_by_io,
                &proposal.approved_by_ethr,
                &proposal.created_at,
                &proposal.resolved_at,
                &proposal.resolved_by,
                &proposal.undo_deadline,
                &metadata,
            ],
        )
        .await
        .map_err(pg_err)?;
        Self::insert_audit(&tx, &audit).await?;
        tx.commit().await.map_err(pg_err)?;
        Ok(())
    }

    async fn get_proposal(&self, scope: &ProjectScope, id: Uuid) -> Result<Proposal, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_opt(
                format!("SELECT {PROPOSAL_COLUMNS} FROM smf_proposals WHERE id = $1").as_str(),
                &[&id],
            )
            .await
            .map_err(pg_err)?
            .ok_or_else(|| StoreError::NotFound(format!("proposal {id}")))?;
        let proposal = proposal_from_row(&row)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(proposal)
    }

    async fn pending_proposals(&self, scope: &ProjectScope) -> Result<Vec<Proposal>, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let rows = tx
            .query(
                format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM smf_proposals
                     WHERE status = 'PENDING' ORDER BY created_at"
                ).as_str(),
                &[],
            )
            .await
            .map_err(pg_err)?;
        let proposals = rows
            .iter()
            .map(proposal_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit().await.map_err(pg_err)?;
        Ok(proposals)
    }

    async fn update_proposal(
        &self,
        scope: &ProjectScope,
        proposal: &Proposal,
        audit: AuditEntry,
    ) -> Result<(), StoreError> {
        let action = serde_json::to_value(&proposal.proposed_action)
            .map_err(|e| StoreError::Backend(format!("serialize proposed_action: {e}")))?;
        let metadata = Value::Object(proposal.metadata.clone());

        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;

        // Row lock serializes state transitions for this proposal
        let locked = tx
            .query_opt(
                "SELECT id FROM smf_proposals WHERE id = $1 FOR UPDATE",
                &[&proposal.id],
            )
            .await
            .map_err(pg_err)?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("proposal {}", proposal.id)));
        }

        tx.execute(
            "UPDATE smf_proposals
             SET proposed_action = $2, affected_edges = $3, reasoning = $4,
                 approval_level = $5, status = $6, approved_by_io = $7,
                 approved_by_ethr = $8, resolved_at = $9, resolved_by = $10,
                 undo_deadline = $11, metadata = $12
             WHERE id = $1",
            &[
                &proposal.id,
                &action,
                &proposal.affected_edges,
                &proposal.reasoning,
                &approval_level_to_str(proposal.approval_level),
                &status_to_str(proposal.status),
                &proposal.approved_by_io,
                &proposal.approved_by_ethr,
                &proposal.resolved_at,
                &proposal.resolved_by,
                &proposal.undo_deadline,
                &metadata,
            ],
        )
        .await
        .map_err(pg_err)?;
        Self::insert_audit(&tx, &audit).await?;
        tx.commit().await.map_err(pg_err)?;
        Ok(())
    }

    async fn find_approved_reclassification(
        &self,
        scope: &ProjectScope,
        edge_id: Uuid,
    ) -> Result<Option<Proposal>, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_opt(
                format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM smf_proposals
                     WHERE status = 'APPROVED'
                       AND $1 = ANY(affected_edges)
                       AND (proposed_action->>'action' = 'reclassify'
                            OR proposed_action->>'action' = 'reclassify_sector')
                     ORDER BY resolved_at DESC NULLS LAST
                     LIMIT 1"
                ).as_str(),
                &[&edge_id],
            )
            .await
            .map_err(pg_err)?;
        let proposal = row.as_ref().map(proposal_from_row).transpose()?;
        tx.commit().await.map_err(pg_err)?;
        Ok(proposal)
    }
}

// ============================================================================
// INSIGHT STORE
// ============================================================================

const INSIGHT_COLUMNS: &str = "id, project_id, content, embedding, source_ids, memory_strength, \
     metadata, is_deleted, deleted_at, deleted_by, deleted_reason";

#[async_trait]
impl InsightStore for PgStore {
    async fn get_insight(&self, scope: &ProjectScope, id: Uuid) -> Result<Insight, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_opt(
                format!("SELECT {INSIGHT_COLUMNS} FROM l2_insights WHERE id = $1").as_str(),
                &[&id],
            )
            .await
            .map_err(pg_err)?
            .ok_or_else(|| StoreError::NotFound(format!("insight {id}")))?;
        let insight = insight_from_row(&row)?;
        tx.commit().await.map_err(pg_err)?;
        Ok(insight)
    }

    async fn update_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        patch: InsightPatch,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError> {
        let metadata = patch.metadata.map(Value::Object);
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_opt(
                format!(
                    "UPDATE l2_insights
                     SET content = COALESCE($2::text, content),
                         memory_strength = LEAST(GREATEST(COALESCE($3::double precision, memory_strength), 0.0), 1.0),
                         metadata = COALESCE($4::jsonb, metadata)
                     WHERE id = $1 AND is_deleted = false
                     RETURNING {INSIGHT_COLUMNS}"
                ).as_str(),
                &[&id, &patch.content, &patch.memory_strength, &metadata],
            )
            .await
            .map_err(pg_err)?
            .ok_or_else(|| StoreError::NotFound(format!("insight {id}")))?;
        let insight = insight_from_row(&row)?;
        Self::insert_audit(&tx, &audit).await?;
        tx.commit().await.map_err(pg_err)?;
        Ok(insight)
    }

    async fn soft_delete_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        deleted_by: &str,
        reason: &str,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;

        let existing = tx
            .query_opt(
                "SELECT is_deleted FROM l2_insights WHERE id = $1 FOR UPDATE",
                &[&id],
            )
            .await
            .map_err(pg_err)?
            .ok_or_else(|| StoreError::NotFound(format!("insight {id}")))?;
        let is_deleted: bool = existing.try_get("is_deleted").map_err(pg_err)?;
        if is_deleted {
            return Err(StoreError::UniqueViolation(format!(
                "insight {id} already deleted"
            )));
        }

        let row = tx
            .query_one(
                format!(
                    "UPDATE l2_insights
                     SET is_deleted = true, deleted_at = now(), deleted_by = $2, deleted_reason = $3
                     WHERE id = $1
                     RETURNING {INSIGHT_COLUMNS}"
                ).as_str(),
                &[&id, &deleted_by, &reason],
            )
            .await
            .map_err(pg_err)?;
        let insight = insight_from_row(&row)?;
        Self::insert_audit(&tx, &audit).await?;
        tx.commit().await.map_err(pg_err)?;
        Ok(insight)
    }

    async fn restore_insight(
        &self,
        scope: &ProjectScope,
        id: Uuid,
        audit: AuditEntry,
    ) -> Result<Insight, StoreError> {
        let mut client = self.pool.get().await.map_err(pool_err)?;
        let tx = Self::begin(&mut client, scope).await?;
        let row = tx
            .query_opt(
                format!(
                    "UPDATE l2_insights
                     SET is_deleted = false, deleted_at = NULL, deleted_by = NULL,
                         deleted_reason = NULL
                     WHERE id = $1
                     RETURNING {INSIGHT_COLUMNS}"
                ).as_str(),
                &[&id],
            )
            .await
            .map_err(pg_err)?
            .ok_or_else(|| StoreError::NotFound(format!("insight {id}")))?;
        let insight = insight_from_row(&row)?;
        Self::insert_audit(&tx, &audit).await?;
        tx.commit().await.map_err(pg_err)?;
        Ok(insight)
    }
}

// ============================================================================
// SINKS
// ============================================================================

#[async_trait]
impl CostLog for PgStore {
    async fn record_cost(&self, entry: CostEntry) {
        let result: Result<(), StoreError> = async {
            let client = self.pool.get().await.map_err(pool_err)?;
            client
                .execute(
                    "INSERT INTO api_cost_log (date, api_name, num_calls, token_count, estimated_cost, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &entry.date,
                        &entry.api_name,
                        &entry.num_calls,
                        &entry.token_count,
                        &entry.estimated_cost,
                        &entry.created_at,
                    ],
                )
                .await
                .map_err(pg_err)?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(api_name = %entry.api_name, error = %e, "cost log write failed");
        }
    }

    async fn costs_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        api_name: Option<&str>,
    ) -> Result<Vec<CostEntry>, StoreError> {
        let client = self.pool.get().await.map_err(pool_err)?;
        let rows = client
            .query(
                "SELECT date, api_name, num_calls, token_count, estimated_cost, created_at
                 FROM api_cost_log
                 WHERE date >= $1 AND date <= $2 AND ($3::text IS NULL OR api_name = $3)
                 ORDER BY date, api_name",
                &[&start, &end, &api_name],
            )
            .await
            .map_err(pg_err)?;
        rows.iter()
            .map(|row| {
                Ok(CostEntry {
                    date: row.try_get("date").map_err(pg_err)?,
                    api_name: row.try_get("api_name").map_err(pg_err)?,
                    num_calls: row.try_get("num_calls").map_err(pg_err)?,
                    token_count: row.try_get("token_count").map_err(pg_err)?,
                    estimated_cost: row.try_get("estimated_cost").map_err(pg_err)?,
                    created_at: row.try_get("created_at").map_err(pg_err)?,
                })
            })
            .collect()
    }

    async fn record_budget_alert(&self, alert: BudgetAlert) {
        let result: Result<(), StoreError> = async {
            let client = self.pool.get().await.map_err(pool_err)?;
            client
                .execute(
                    "INSERT INTO budget_alerts
                         (alert_date, alert_type, projected_cost, budget_limit, utilization_pct,
                          alert_sent, notification_methods, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                    &[
                        &alert.alert_date,
                        &alert.alert_type,
                        &alert.projected_cost,
                        &alert.budget_limit,
                        &alert.utilization_pct,
                        &alert.alert_sent,
                        &alert.notification_methods,
                        &alert.created_at,
                    ],
                )
                .await
                .map_err(pg_err)?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "budget alert write failed");
        }
    }
}

#[async_trait]
impl RetryLog for PgStore {
    async fn record_retry(&self, entry: RetryLogEntry) {
        let result: Result<(), StoreError> = async {
            let client = self.pool.get().await.map_err(pool_err)?;
            client
                .execute(
                    "INSERT INTO api_retry_log (api_name, error_type, retry_count, success, created_at)
                     VALUES ($1, $2, $3, $4, $5)",
                    &[
                        &entry.api_name,
                        &entry.error_type,
                        &(entry.retry_count as i32),
                        &entry.success,
                        &entry.created_at,
                    ],
                )
                .await
                .map_err(pg_err)?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(api_name = %entry.api_name, error = %e, "retry log write failed");
        }
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn record_audit(&self, entry: AuditEntry) {
        let result: Result<(), StoreError> = async {
            let client = self.pool.get().await.map_err(pool_err)?;
            client
                .execute(
                    "INSERT INTO audit_log (timestamp, actor, action, target_id, project_id, payload)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &entry.timestamp,
                        &entry.actor,
                        &entry.action.as_str(),
                        &entry.target_id,
                        &entry.project_id,
                        &entry.payload,
                    ],
                )
                .await
                .map_err(pg_err)?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(action = ?entry.action, error = %e, "audit write failed");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips() {
        for trigger in [TriggerType::Dissonance, TriggerType::Manual, TriggerType::Proactive] {
            assert_eq!(trigger_type_from_str(trigger_type_to_str(trigger)), trigger);
        }
        for level in [ApprovalLevel::Io, ApprovalLevel::Bilateral] {
            assert_eq!(approval_level_from_str(approval_level_to_str(level)), level);
        }
        for status in [
            ProposalStatus::Pending,
            ProposalStatus::Approved,
            ProposalStatus::Rejected,
            ProposalStatus::Undone,
        ] {
            assert_eq!(status_from_str(status_to_str(status)), status);
        }
    }

    #[test]
    fn test_edge_columns_cover_struct() {
        for column in [
            "id", "project_id", "source_id", "target_id", "relation", "weight", "properties",
            "memory_sector", "created_at", "modified_at", "last_accessed", "last_engaged",
            "access_count", "source_name", "target_name",
        ] {
            assert!(EDGE_COLUMNS.contains(column), "missing column {column}");
        }
    }
}
