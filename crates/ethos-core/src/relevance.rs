//! Decay-adjusted relevance scoring.
//!
//! Ebbinghaus-style exponential decay with sector-specific parameters:
//!
//! ```text
//! S     = S_base * (1 + ln(1 + access_count)), floored by S_floor
//! score = clamp(exp(-days_since_engagement / S), 0.0, 1.0)
//! ```
//!
//! Constitutive edges are identity-defining and never decay: their score is
//! exactly 1.0 regardless of age and access history.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::DecayConfig;
use crate::graph::Edge;

/// Compute the relevance score for an edge at `now`.
///
/// Missing engagement timestamps (`last_engaged`, falling back to
/// `last_accessed`) yield 1.0: without a timestamp there is nothing to decay
/// from. Scores are always within [0.0, 1.0].
pub fn relevance_score(edge: &Edge, decay: &DecayConfig, now: DateTime<Utc>) -> f64 {
    let started = Instant::now();

    if edge.is_constitutive() {
        return 1.0;
    }

    let params = decay.get(edge.memory_sector);
    let access_count = edge.access_count.max(0) as f64;
    let mut s = params.s_base * (1.0 + (1.0 + access_count).ln());
    if let Some(floor) = params.s_floor {
        s = s.max(floor);
    }

    let Some(last_engaged) = edge.last_engaged.or(edge.last_accessed) else {
        return 1.0;
    };

    let days = (now - last_engaged).num_seconds() as f64 / 86_400.0;
    let score = (-days / s).exp().clamp(0.0, 1.0);

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    debug!(
        relevance_score = score,
        sector = %edge.memory_sector,
        s = s,
        s_base = params.s_base,
        s_floor = params.s_floor,
        access_count = edge.access_count,
        days_since = days,
        elapsed_ms = elapsed_ms,
        "calculated relevance score"
    );

    score
}

// ============================================================================
// TESTS
// ============================================================================
