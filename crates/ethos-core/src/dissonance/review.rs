//! Nuance review intents.
//!
//! Every NUANCE classification creates a review that is later confirmed or
//! reclassified, exactly once. Reviews live in the application context; the
//! durable artifacts they lead to (resolution hyperedges, proposals, audit
//! rows) live in the store.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DissonanceResult, DissonanceType};
use crate::error::{CoreError, Result};

// ============================================================================
// REVIEW
// ============================================================================

/// Lifecycle of a nuance review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Confirmed,
    Reclassified,
}

/// Durable intent to confirm a NUANCE classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NuanceReview {
    pub id: Uuid,
    pub dissonance: DissonanceResult,
    pub status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclassified_to: Option<DissonanceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// REVIEW LOG
// ============================================================================

/// Process-wide review registry, owned by the application context.
#[derive(Default)]
pub struct ReviewLog {
    reviews: Mutex<Vec<NuanceReview>>,
}

impl ReviewLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a review for a NUANCE outcome.
    pub fn create(&self, dissonance: DissonanceResult) -> NuanceReview {
        let review = NuanceReview {
            id: Uuid::new_v4(),
            dissonance,
            status: ReviewStatus::Pending,
            reclassified_to: None,
            reason: None,
            created_at: Utc::now(),
            reviewed_at: None,
        };
        self.reviews.lock().unwrap().push(review.clone());
        review
    }

    pub fn get(&self, id: Uuid) -> Option<NuanceReview> {
        self.reviews
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn pending(&self) -> Vec<NuanceReview> {
        self.reviews
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == ReviewStatus::Pending)
            .cloned()
            .collect()
    }

    /// Close a review. `reclassified_to` carries the final type when it
    /// differs from the original NUANCE classification. Reviews are reviewed
    /// exactly once; a second resolution is a conflict.
    pub fn resolve(
        &self,
        id: Uuid,
        reclassified_to: Option<DissonanceType>,
        reason: Option<String>,
    ) -> Result<NuanceReview> {
        let mut reviews = self.reviews.lock().unwrap();
        let review = reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("nuance review {id}")))?;

        if review.status != ReviewStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "review {id} already reviewed ({:?})",
                review.status
            )));
        }

        match reclassified_to {
            Some(to) if to != DissonanceType::Nuance => {
                review.status = ReviewStatus::Reclassified;
                review.reclassified_to = Some(to);
            }
            _ => {
                review.status = ReviewStatus::Confirmed;
            }
        }
        review.reason = reason;
        review.reviewed_at = Some(Utc::now());
        Ok(review.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dissonance(dissonance_type: DissonanceType) -> DissonanceResult {
        DissonanceResult {
            edge_a_id: Uuid::new_v4(),
            edge_b_id: Uuid::new_v4(),
            dissonance_type,
            confidence_score: 0.8,
            description: "tension between autonomy and connection".into(),
            context: json!({}),
            requires_review: true,
            edge_a_strength: None,
            edge_b_strength: None,
            authoritative_source: None,
        }
    }

    #[test]
    fn test_create_and_pending() {
        let log = ReviewLog::new();
        let review = log.create(dissonance(DissonanceType::Nuance));
        assert_eq!(review.status, ReviewStatus::Pending);
        assert_eq!(log.pending().len(), 1);
        assert!(log.get(review.id).is_some());
    }

    #[test]
    fn test_confirm() {
        let log = ReviewLog::new();
        let review = log.create(dissonance(DissonanceType::Nuance));
        let resolved = log.resolve(review.id, None, Some("holds up".into())).unwrap();
        assert_eq!(resolved.status, ReviewStatus::Confirmed);
        assert!(resolved.reviewed_at.is_some());
        assert!(log.pending().is_empty());
    }

    #[test]
    fn test_reclassify() {
        let log = ReviewLog::new();
        let review = log.create(dissonance(DissonanceType::Nuance));
        let resolved = log
            .resolve(review.id, Some(DissonanceType::Evolution), None)
            .unwrap();
        assert_eq!(resolved.status, ReviewStatus::Reclassified);
        assert_eq!(resolved.reclassified_to, Some(DissonanceType::Evolution));
    }

    #[test]
    fn test_reviewed_exactly_once() {
        let log = ReviewLog::new();
        let review = log.create(dissonance(DissonanceType::Nuance));
        log.resolve(review.id, None, None).unwrap();
        let err = log.resolve(review.id, None, None).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn test_unknown_review() {
        let log = ReviewLog::new();
        let err = log.resolve(Uuid::new_v4(), None, None).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
