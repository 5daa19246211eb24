//! Graph data model.
//!
//! Nodes and edges carry opaque JSON property bags whose shape varies by
//! use. The typed accessors below cover the narrow part the core validates
//! (`edge_type`, constitutive and superseded markers); everything else stays
//! in the open map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::sector::MemorySector;

/// Opaque JSON property bag
pub type Properties = Map<String, Value>;

// ============================================================================
// EDGE KIND
// ============================================================================

/// The typed part of `properties.edge_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Ordinary edge; decays, mutable under IO-level consent
    #[default]
    Descriptive,
    /// Identity-defining edge; never decays, bilateral-consent-gated
    Constitutive,
    /// Hyperedge emitted by the resolution emitter
    Resolution,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Descriptive => "descriptive",
            EdgeKind::Constitutive => "constitutive",
            EdgeKind::Resolution => "resolution",
        }
    }
}

// ============================================================================
// NODE
// ============================================================================

/// Addressable vertex, unique per `(project, name)`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: Uuid,
    pub project_id: String,
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub properties: Properties,
    /// Optional link to an insight vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<Uuid>,
}

// ============================================================================
// EDGE
// ============================================================================

/// Directed relationship between two nodes.
///
/// Unique per `(project, source, target, relation)`. Never hard-deleted by
/// the core; superseded edges are tombstoned through their property bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: Uuid,
    pub project_id: String,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation: String,
    pub weight: f64,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub memory_sector: MemorySector,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_engaged: Option<DateTime<Utc>>,
    pub access_count: i32,
    /// Joined source node name (populated by neighborhood fetches)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Joined target node name (populated by neighborhood fetches)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

impl Edge {
    /// The typed edge kind. Unrecognized `edge_type` values read as
    /// descriptive; the open remainder of the bag is not validated.
    pub fn kind(&self) -> EdgeKind {
        match self.properties.get("edge_type").and_then(Value::as_str) {
            Some("constitutive") => EdgeKind::Constitutive,
            Some("resolution") => EdgeKind::Resolution,
            _ => EdgeKind::Descriptive,
        }
    }

    /// Identity-defining check. Either marker makes the edge constitutive:
    /// `is_constitutive: true` or `edge_type: "constitutive"`.
    pub fn is_constitutive(&self) -> bool {
        self.properties.get("is_constitutive").and_then(Value::as_bool) == Some(true)
            || self.kind() == EdgeKind::Constitutive
    }

    /// Tombstone check. Resolution edges are never themselves superseded.
    pub fn is_superseded(&self) -> bool {
        self.properties.get("superseded").and_then(Value::as_bool) == Some(true)
            || self.properties.get("status").and_then(Value::as_str) == Some("superseded")
    }

    /// Orphaned resolution hyperedges are kept but flagged after an undo.
    pub fn is_orphaned(&self) -> bool {
        self.properties.get("orphaned").and_then(Value::as_bool) == Some(true)
    }
}

/// Input for creating a new edge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEdge {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub properties: Properties,
    /// Explicit sector; when absent, the classifier decides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_sector: Option<MemorySector>,
}

fn default_weight() -> f64 {
    1.0
}

// ============================================================================
// NEIGHBORHOOD QUERIES
// ============================================================================

/// Which edges to fetch for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeScope {
    /// Edges touched within the last 30 days
    Recent,
    /// All edges
    Full,
}

impl EdgeScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeScope::Recent => "recent",
            EdgeScope::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recent" => Some(EdgeScope::Recent),
            "full" => Some(EdgeScope::Full),
            _ => None,
        }
    }
}

/// Traversal direction for neighborhood queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
    #[default]
    Both,
}

/// Parameters for [`GraphStore::query_neighbors`](crate::store::GraphStore)
#[derive(Debug, Clone)]
pub struct NeighborQuery {
    pub node_id: Uuid,
    /// Restrict to one relation label
    pub relation: Option<String>,
    /// Traversal depth, 1 to 3
    pub depth: u8,
    pub direction: Direction,
    /// Tombstoned edges are excluded unless set
    pub include_superseded: bool,
}

impl NeighborQuery {
    pub fn new(node_id: Uuid) -> Self {
        Self {
            node_id,
            relation: None,
            depth: 1,
            direction: Direction::Both,
            include_superseded: false,
        }
    }
}

/// A neighbor annotated with its inbound edge and decay-adjusted relevance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbor {
    pub node: Node,
    pub edge: Edge,
    pub relevance_score: f64,
    /// Hops from the query node
    pub depth: u8,
}

// ============================================================================
// INSIGHTS
// ============================================================================

/// A compressed memory item with an externally-produced embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: Uuid,
    pub project_id: String,
    pub content: String,
    /// Fixed-width vector, produced outside the core
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub source_ids: Vec<i32>,
    /// Memory strength in [0, 1]
    pub memory_strength: f64,
    #[serde(default)]
    pub metadata: Properties,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_reason: Option<String>,
}

/// Partial update for an insight; absent fields stay untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Properties>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edge_with_properties(value: Value) -> Edge {
        let now = Utc::now();
        Edge {
            id: Uuid::new_v4(),
            project_id: "test".into(),
            source_id: Uuid::new_v4(),
            target_id: Uuid::new_v4(),
            relation: "KNOWS".into(),
            weight: 1.0,
            properties: value.as_object().cloned().unwrap_or_default(),
            memory_sector: MemorySector::Semantic,
            created_at: now,
            modified_at: now,
            last_accessed: None,
            last_engaged: None,
            access_count: 0,
            source_name: None,
            target_name: None,
        }
    }

    #[test]
    fn test_constitutive_markers() {
        assert!(edge_with_properties(json!({"is_constitutive": true})).is_constitutive());
        assert!(edge_with_properties(json!({"edge_type": "constitutive"})).is_constitutive());
        assert!(!edge_with_properties(json!({"is_constitutive": false})).is_constitutive());
        assert!(!edge_with_properties(json!({})).is_constitutive());
    }

    #[test]
    fn test_edge_kind_parsing() {
        assert_eq!(
            edge_with_properties(json!({"edge_type": "resolution"})).kind(),
            EdgeKind::Resolution
        );
        assert_eq!(
            edge_with_properties(json!({"edge_type": "unknown"})).kind(),
            EdgeKind::Descriptive
        );
        assert_eq!(edge_with_properties(json!({})).kind(), EdgeKind::Descriptive);
    }

    #[test]
    fn test_superseded_markers() {
        assert!(edge_with_properties(json!({"superseded": true})).is_superseded());
        assert!(edge_with_properties(json!({"status": "superseded"})).is_superseded());
        assert!(!edge_with_properties(json!({"superseded": false})).is_superseded());
        assert!(!edge_with_properties(json!({"edge_type": "resolution"})).is_superseded());
    }

    #[test]
    fn test_edge_scope_parse() {
        assert_eq!(EdgeScope::parse("recent"), Some(EdgeScope::Recent));
        assert_eq!(EdgeScope::parse("full"), Some(EdgeScope::Full));
        assert_eq!(EdgeScope::parse("all"), None);
    }

    #[test]
    fn test_edge_serde_roundtrip() {
        let edge = edge_with_properties(json!({"edge_type": "constitutive"}));
        let raw = serde_json::to_string(&edge).unwrap();
        let back: Edge = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, edge.id);
        assert!(back.is_constitutive());
    }
}
