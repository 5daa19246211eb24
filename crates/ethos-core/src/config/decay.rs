//! Per-sector decay parameters.
//!
//! Each sector carries a base memory strength `S_base` (higher = slower
//! decay) and an optional floor `S_floor` below which the effective strength
//! never drops. Loaded once, immutable afterwards; the built-in defaults
//! cover every sector so a broken table never leaves a sector unparameterized.

use serde::Deserialize;
use tracing::warn;

use crate::sector::{ALL_SECTORS, MemorySector};

// ============================================================================
// SECTOR DECAY
// ============================================================================

/// Decay parameters for one memory sector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorDecay {
    /// Base memory strength; must be positive
    pub s_base: f64,
    /// Minimum memory strength (None = strength can decay freely)
    pub s_floor: Option<f64>,
}

impl SectorDecay {
    pub const fn new(s_base: f64, s_floor: Option<f64>) -> Self {
        Self { s_base, s_floor }
    }
}

/// Raw YAML entry; keys match the settings file (`S_base`, `S_floor`).
#[derive(Debug, Deserialize)]
struct RawSectorDecay {
    #[serde(rename = "S_base")]
    s_base: f64,
    #[serde(rename = "S_floor", default)]
    s_floor: Option<f64>,
}

// ============================================================================
// DECAY CONFIG
// ============================================================================

/// The complete sector -> decay-parameter table.
///
/// Owned by the application context; never a process global. Construct once
/// at startup, pass by reference into the relevance scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayConfig {
    emotional: SectorDecay,
    episodic: SectorDecay,
    semantic: SectorDecay,
    procedural: SectorDecay,
    reflective: SectorDecay,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            emotional: SectorDecay::new(200.0, Some(150.0)),
            episodic: SectorDecay::new(150.0, Some(100.0)),
            semantic: SectorDecay::new(100.0, None),
            procedural: SectorDecay::new(120.0, None),
            reflective: SectorDecay::new(180.0, Some(120.0)),
        }
    }
}

impl DecayConfig {
    /// Parse a decay table from the settings YAML.
    ///
    /// The table must name all five sectors with positive `S_base` values;
    /// anything less falls back to the defaults with a warning.
    pub fn from_yaml(raw: serde_yaml::Value) -> Self {
        match Self::try_from_yaml(raw) {
            Ok(config) => config,
            Err(reason) => {
                warn!(fallback_reason = %reason, "falling back to default decay config");
                DecayConfig::default()
            }
        }
    }

    fn try_from_yaml(raw: serde_yaml::Value) -> std::result::Result<Self, String> {
        let table: std::collections::HashMap<String, RawSectorDecay> =
            serde_yaml::from_value(raw).map_err(|e| e.to_string())?;

        let mut config = DecayConfig::default();
        for sector in ALL_SECTORS {
            let entry = table
                .get(sector.as_str())
                .ok_or_else(|| format!("missing sector: {sector}"))?;
            if entry.s_base <= 0.0 {
                return Err(format!("non-positive S_base for sector {sector}"));
            }
            *config.slot_mut(sector) = SectorDecay::new(entry.s_base, entry.s_floor);
        }
        Ok(config)
    }

    /// Decay parameters for a sector.
    pub fn get(&self, sector: MemorySector) -> SectorDecay {
        match sector {
            MemorySector::Emotional => self.emotional,
            MemorySector::Episodic => self.episodic,
            MemorySector::Semantic => self.semantic,
            MemorySector::Procedural => self.procedural,
            MemorySector::Reflective => self.reflective,
        }
    }

    fn slot_mut(&mut self, sector: MemorySector) -> &mut SectorDecay {
        match sector {
            MemorySector::Emotional => &mut self.emotional,
            MemorySector::Episodic => &mut self.episodic,
            MemorySector::Semantic => &mut self.semantic,
            MemorySector::Procedural => &mut self.procedural,
            MemorySector::Reflective => &mut self.reflective,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
