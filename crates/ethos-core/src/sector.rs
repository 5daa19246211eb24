//! Memory sector classification.
//!
//! Every edge belongs to exactly one sector drawn from a closed set. The
//! classifier is a pure function over `(relation, properties)` applying five
//! priority rules, first match wins. Sector values are always lowercase on
//! the wire and in the database.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

// ============================================================================
// MEMORY SECTOR
// ============================================================================

/// The closed set of memory sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemorySector {
    /// Emotionally-charged memories with valence metadata
    Emotional,
    /// Episode memories with shared-experience context
    Episodic,
    /// Facts, concepts, abstract information (default)
    #[default]
    Semantic,
    /// Skills, capabilities, learned behaviors
    Procedural,
    /// Reflections, realizations, self-awareness
    Reflective,
}

/// All valid sectors, in classification-rule order
pub const ALL_SECTORS: [MemorySector; 5] = [
    MemorySector::Emotional,
    MemorySector::Episodic,
    MemorySector::Semantic,
    MemorySector::Procedural,
    MemorySector::Reflective,
];

impl MemorySector {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySector::Emotional => "emotional",
            MemorySector::Episodic => "episodic",
            MemorySector::Semantic => "semantic",
            MemorySector::Procedural => "procedural",
            MemorySector::Reflective => "reflective",
        }
    }

    /// Parse a sector value. Only exact lowercase names are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "emotional" => Some(MemorySector::Emotional),
            "episodic" => Some(MemorySector::Episodic),
            "semantic" => Some(MemorySector::Semantic),
            "procedural" => Some(MemorySector::Procedural),
            "reflective" => Some(MemorySector::Reflective),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemorySector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Relations that classify as procedural
const PROCEDURAL_RELATIONS: [&str; 2] = ["LEARNED", "CAN_DO"];

/// Relations that classify as reflective
const REFLECTIVE_RELATIONS: [&str; 3] = ["REFLECTS", "REFLECTS_ON", "REALIZED"];

/// Classify an edge into a memory sector.
///
/// Rules in priority order, first match wins:
/// 1. `emotional_valence` present (non-null) -> emotional
/// 2. `context_type == "shared_experience"` -> episodic
/// 3. relation in {LEARNED, CAN_DO} -> procedural
/// 4. relation in {REFLECTS, REFLECTS_ON, REALIZED} -> reflective
/// 5. otherwise -> semantic
pub fn classify_memory_sector(
    relation: &str,
    properties: Option<&Map<String, Value>>,
) -> MemorySector {
    if let Some(props) = properties {
        if matches!(props.get("emotional_valence"), Some(v) if !v.is_null()) {
            debug!(sector = "emotional", rule_matched = "emotional_valence", "sector classification");
            return MemorySector::Emotional;
        }
        if props.get("context_type").and_then(Value::as_str) == Some("shared_experience") {
            debug!(sector = "episodic", rule_matched = "shared_experience", "sector classification");
            return MemorySector::Episodic;
        }
    }

    if PROCEDURAL_RELATIONS.contains(&relation) {
        debug!(sector = "procedural", rule_matched = "procedural_relation", "sector classification");
        return MemorySector::Procedural;
    }

    if REFLECTIVE_RELATIONS.contains(&relation) {
        debug!(sector = "reflective", rule_matched = "reflective_relation", "sector classification");
        return MemorySector::Reflective;
    }

    debug!(sector = "semantic", rule_matched = "default_semantic", "sector classification");
    MemorySector::Semantic
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_sector_roundtrip() {
        for sector in ALL_SECTORS {
            assert_eq!(MemorySector::parse(sector.as_str()), Some(sector));
        }
        // Uppercase is not a valid stored value
        assert_eq!(MemorySector::parse("Emotional"), None);
        assert_eq!(MemorySector::parse("invalid"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&MemorySector::Reflective).unwrap(),
            "\"reflective\""
        );
        let parsed: MemorySector = serde_json::from_str("\"episodic\"").unwrap();
        assert_eq!(parsed, MemorySector::Episodic);
    }

    #[test]
    fn test_emotional_valence_wins() {
        let p = props(json!({"emotional_valence": "positive"}));
        assert_eq!(
            classify_memory_sector("EXPERIENCED", Some(&p)),
            MemorySector::Emotional
        );
    }

    #[test]
    fn test_emotional_priority_over_reflective_relation() {
        // Priority rule: valence beats a reflective relation
        let p = props(json!({"emotional_valence": "neutral"}));
        assert_eq!(
            classify_memory_sector("REFLECTS_ON", Some(&p)),
            MemorySector::Emotional
        );
    }

    #[test]
    fn test_null_valence_does_not_match() {
        let p = props(json!({"emotional_valence": null}));
        assert_eq!(
            classify_memory_sector("KNOWS", Some(&p)),
            MemorySector::Semantic
        );
    }

    #[test]
    fn test_shared_experience_is_episodic() {
        let p = props(json!({"context_type": "shared_experience"}));
        assert_eq!(
            classify_memory_sector("CONNECTED_TO", Some(&p)),
            MemorySector::Episodic
        );
    }

    #[test]
    fn test_episodic_priority_over_procedural_relation() {
        let p = props(json!({"context_type": "shared_experience"}));
        assert_eq!(
            classify_memory_sector("LEARNED", Some(&p)),
            MemorySector::Episodic
        );
    }

    #[test]
    fn test_other_context_type_is_not_episodic() {
        let p = props(json!({"context_type": "conversation"}));
        assert_eq!(
            classify_memory_sector("DISCUSSED", Some(&p)),
            MemorySector::Semantic
        );
    }

    #[test]
    fn test_procedural_relations() {
        assert_eq!(
            classify_memory_sector("LEARNED", None),
            MemorySector::Procedural
        );
        assert_eq!(
            classify_memory_sector("CAN_DO", Some(&Map::new())),
            MemorySector::Procedural
        );
        // Lowercase relation does not match
        assert_eq!(
            classify_memory_sector("learned", None),
            MemorySector::Semantic
        );
    }

    #[test]
    fn test_reflective_relations() {
        for relation in ["REFLECTS", "REFLECTS_ON", "REALIZED"] {
            assert_eq!(
                classify_memory_sector(relation, None),
                MemorySector::Reflective
            );
        }
        assert_eq!(
            classify_memory_sector("REMEMBERS", None),
            MemorySector::Semantic
        );
    }

    #[test]
    fn test_default_semantic() {
        assert_eq!(classify_memory_sector("KNOWS", None), MemorySector::Semantic);
        assert_eq!(
            classify_memory_sector("", Some(&Map::new())),
            MemorySector::Semantic
        );
    }

    #[test]
    fn test_determinism() {
        let p = props(json!({"emotional_valence": "negative", "context_type": "shared_experience"}));
        let first = classify_memory_sector("LEARNED", Some(&p));
        for _ in 0..10 {
            assert_eq!(classify_memory_sector("LEARNED", Some(&p)), first);
        }
    }

    /// Golden set: labeled edges covering every rule with positive and
    /// negative cases. Classification must agree with every expectation.
    #[test]
    fn test_golden_set() {
        let cases: Vec<(&str, Value, MemorySector)> = vec![
            ("EXPERIENCED", json!({"emotional_valence": "positive"}), MemorySector::Emotional),
            ("FEARS", json!({"emotional_valence": "negative"}), MemorySector::Emotional),
            ("VALUES", json!({"emotional_valence": "positive", "weight": 0.9}), MemorySector::Emotional),
            ("REFLECTS", json!({"emotional_valence": "neutral"}), MemorySector::Emotional),
            ("LEARNED", json!({"emotional_valence": "positive"}), MemorySector::Emotional),
            ("SHARED", json!({"context_type": "shared_experience"}), MemorySector::Episodic),
            ("VISITED", json!({"context_type": "shared_experience", "location": "Berlin"}), MemorySector::Episodic),
            ("CAN_DO", json!({"context_type": "shared_experience"}), MemorySector::Episodic),
            ("DISCUSSED", json!({"context_type": "shared_experience"}), MemorySector::Episodic),
            ("LEARNED", json!({}), MemorySector::Procedural),
            ("CAN_DO", json!({"skill_level": "expert"}), MemorySector::Procedural),
            ("LEARNED", json!({"context_type": "lesson"}), MemorySector::Procedural),
            ("REFLECTS", json!({}), MemorySector::Reflective),
            ("REFLECTS_ON", json!({"topic": "identity"}), MemorySector::Reflective),
            ("REALIZED", json!({}), MemorySector::Reflective),
            ("KNOWS", json!({}), MemorySector::Semantic),
            ("RELATES_TO", json!({"strength": 0.4}), MemorySector::Semantic),
            ("DISCUSSED", json!({"context_type": "conversation"}), MemorySector::Semantic),
            ("BELIEVES", json!({"emotional_valence": null}), MemorySector::Semantic),
            ("WORKS_WITH", json!({}), MemorySector::Semantic),
            ("CREATED", json!({}), MemorySector::Semantic),
        ];

        let total = cases.len();
        assert!(total >= 20);
        let mut agree = 0usize;
        for (relation, raw, expected) in cases {
            let p = props(raw);
            if classify_memory_sector(relation, Some(&p)) == expected {
                agree += 1;
            }
        }
        // The rule set is deterministic, so agreement is total, well above
        // the 80% acceptance bar for the labeled set.
        assert!(agree as f64 / total as f64 >= 0.8);
        assert_eq!(agree, total);
    }
}
