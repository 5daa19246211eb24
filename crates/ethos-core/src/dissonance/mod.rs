//! Dissonance detection and classification.
//!
//! A dissonance is a pairwise conflict between two edges touching the same
//! node, classified under an AGM-inspired entrenchment discipline:
//!
//! - **EVOLUTION**: positions show temporal development, one superseded the
//!   other
//! - **CONTRADICTION**: both positions claim simultaneous validity and
//!   cannot both hold
//! - **NUANCE**: dialectical tension that can stand; complexity is part of
//!   the identity
//! - **NONE**: no conflict
//!
//! The engine lives in [`engine`]; NUANCE outcomes produce durable review
//! intents tracked by [`review`].

mod engine;
mod review;

pub use engine::{CheckStatus, DissonanceCheckResult, DissonanceEngine, MAX_PAIRS};
pub use review::{NuanceReview, ReviewLog, ReviewStatus};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// DISSONANCE TYPES
// ============================================================================

/// Classification of a pair of edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DissonanceType {
    Evolution,
    Contradiction,
    Nuance,
    None,
}

impl DissonanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DissonanceType::Evolution => "EVOLUTION",
            DissonanceType::Contradiction => "CONTRADICTION",
            DissonanceType::Nuance => "NUANCE",
            DissonanceType::None => "NONE",
        }
    }

    /// Parse a classifier answer; case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EVOLUTION" => Some(DissonanceType::Evolution),
            "CONTRADICTION" => Some(DissonanceType::Contradiction),
            "NUANCE" => Some(DissonanceType::Nuance),
            "NONE" => Some(DissonanceType::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for DissonanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The resolvable subset of [`DissonanceType`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResolutionType {
    Evolution,
    Contradiction,
    Nuance,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionType::Evolution => "EVOLUTION",
            ResolutionType::Contradiction => "CONTRADICTION",
            ResolutionType::Nuance => "NUANCE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EVOLUTION" => Some(ResolutionType::Evolution),
            "CONTRADICTION" => Some(ResolutionType::Contradiction),
            "NUANCE" => Some(ResolutionType::Nuance),
            _ => None,
        }
    }

    pub fn as_dissonance(&self) -> DissonanceType {
        match self {
            ResolutionType::Evolution => DissonanceType::Evolution,
            ResolutionType::Contradiction => DissonanceType::Contradiction,
            ResolutionType::Nuance => DissonanceType::Nuance,
        }
    }
}

impl std::fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// DISSONANCE RESULT
// ============================================================================

/// Which edge of a pair is treated as authoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthoritativeSource {
    EdgeA,
    EdgeB,
}

/// Single classification outcome for one pair of edges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DissonanceResult {
    pub edge_a_id: Uuid,
    pub edge_b_id: Uuid,
    pub dissonance_type: DissonanceType,
    /// Classifier confidence in [0, 1]
    pub confidence_score: f64,
    pub description: String,
    /// Additional metadata: classifier reasoning, edge snapshots
    pub context: Value,
    /// True for NUANCE outcomes awaiting review
    #[serde(default)]
    pub requires_review: bool,
    /// Memory strength of edge A from its linked insight, when resolvable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_a_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_b_strength: Option<f64>,
    /// Set when both strengths are present: the stronger edge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authoritative_source: Option<AuthoritativeSource>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_parse_is_case_insensitive() {
        assert_eq!(DissonanceType::parse("evolution"), Some(DissonanceType::Evolution));
        assert_eq!(DissonanceType::parse("Contradiction"), Some(DissonanceType::Contradiction));
        assert_eq!(DissonanceType::parse("NONE"), Some(DissonanceType::None));
        assert_eq!(DissonanceType::parse("maybe"), None);
    }

    #[test]
    fn test_resolution_type_subset() {
        assert_eq!(ResolutionType::parse("NONE"), None);
        assert_eq!(
            ResolutionType::parse("nuance").map(|t| t.as_dissonance()),
            Some(DissonanceType::Nuance)
        );
    }

    #[test]
    fn test_serde_uppercase() {
        assert_eq!(
            serde_json::to_string(&DissonanceType::Evolution).unwrap(),
            "\"EVOLUTION\""
        );
        assert_eq!(
            serde_json::to_string(&AuthoritativeSource::EdgeA).unwrap(),
            "\"edge_a\""
        );
    }
}
