//! Configuration loading.
//!
//! Two layers, both immutable after load:
//!
//! - [`Settings`]: the YAML settings file (budget limits, per-API cost rates,
//!   decay table) plus environment variables for secrets and the database URL.
//! - [`DecayConfig`]: the per-sector decay parameters, with built-in defaults
//!   used whenever the file is missing or malformed.

mod decay;

pub use decay::{DecayConfig, SectorDecay};

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::{CoreError, Result};

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Environment variable carrying the Postgres connection string
pub const DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable carrying the Anthropic API key
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

/// Environment variable carrying the OpenAI API key (embeddings, judges)
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Placeholder values shipped in env templates; treated as absent.
const PLACEHOLDER_KEY_PREFIXES: [&str; 2] = ["sk-ant-your-", "sk-your-"];

/// Read a required API key from the environment.
///
/// Missing or placeholder keys are fatal at construction time, not at first
/// call, so misconfiguration surfaces on startup.
pub fn require_api_key(var: &str) -> Result<String> {
    let value = std::env::var(var).map_err(|_| {
        CoreError::validation(var, format!("environment variable {var} is not set"))
    })?;
    if value.trim().is_empty() || PLACEHOLDER_KEY_PREFIXES.iter().any(|p| value.starts_with(p)) {
        return Err(CoreError::validation(
            var,
            format!("environment variable {var} holds a placeholder key"),
        ));
    }
    Ok(value)
}

// ============================================================================
// SETTINGS FILE
// ============================================================================

/// Per-API cost rate. Chat-style models carry separate input and output
/// rates; embeddings carry a single rate (output stays zero).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
pub struct CostRate {
    /// Cost per input token
    #[serde(default)]
    pub input: f64,
    /// Cost per output token
    #[serde(default)]
    pub output: f64,
}

impl CostRate {
    pub fn chat(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn single(rate: f64) -> Self {
        Self {
            input: rate,
            output: 0.0,
        }
    }
}

/// Monthly budget settings
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    /// Monthly budget limit in the configured currency unit
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit: f64,
    /// Alert threshold as a percentage of the monthly limit
    #[serde(default = "default_alert_threshold_pct")]
    pub alert_threshold_pct: f64,
}

fn default_monthly_limit() -> f64 {
    10.0
}

fn default_alert_threshold_pct() -> f64 {
    80.0
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            monthly_limit: default_monthly_limit(),
            alert_threshold_pct: default_alert_threshold_pct(),
        }
    }
}

/// Classification model settings
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    /// Model identifier used for dissonance classification
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    /// Minimum interval between calls in milliseconds (client-side pacing)
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
}

fn default_classifier_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_min_call_interval_ms() -> u64 {
    100
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            classifier_model: default_classifier_model(),
            min_call_interval_ms: default_min_call_interval_ms(),
        }
    }
}

/// The YAML settings file.
///
/// ```yaml
/// budget:
///   monthly_limit: 10.0
///   alert_threshold_pct: 80
/// api_cost_rates:
///   haiku_classify: { input: 0.0000008, output: 0.000004 }
///   openai_embeddings: { input: 0.00000002 }
/// decay_config:
///   emotional: { S_base: 200, S_floor: 150 }
///   ...
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub budget: BudgetSettings,
    #[serde(default)]
    pub api_cost_rates: HashMap<String, CostRate>,
    #[serde(default)]
    pub model: ModelSettings,
    /// Raw decay table; parsed into [`DecayConfig`] separately so the
    /// fallback rules stay in one place.
    #[serde(default)]
    pub decay_config: Option<serde_yaml::Value>,
}

impl Settings {
    /// Load settings from a YAML file. A missing or malformed file yields
    /// defaults with a warning; settings never block startup.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_yaml::from_str::<Settings>(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed settings file, using defaults");
                    Settings::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings file unreadable, using defaults");
                Settings::default()
            }
        }
    }

    /// Build the decay configuration from the embedded table, falling back
    /// to defaults when the table is absent or incomplete.
    pub fn decay_config(&self) -> DecayConfig {
        match &self.decay_config {
            Some(raw) => DecayConfig::from_yaml(raw.clone()),
            None => {
                warn!("settings carry no decay table, using default decay config");
                DecayConfig::default()
            }
        }
    }

    /// Look up the cost rate for an API name.
    pub fn cost_rate(&self, api_name: &str) -> Option<CostRate> {
        self.api_cost_rates.get(api_name).copied()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = Settings::load(Path::new("/nonexistent/settings.yaml"));
        assert_eq!(settings.budget.monthly_limit, 10.0);
        assert_eq!(settings.budget.alert_threshold_pct, 80.0);
        assert!(settings.api_cost_rates.is_empty());
    }

    #[test]
    fn test_load_full_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
budget:
  monthly_limit: 5.0
  alert_threshold_pct: 75
api_cost_rates:
  haiku_classify:
    input: 0.0000008
    output: 0.000004
  openai_embeddings:
    input: 0.00000002
model:
  classifier_model: claude-3-5-haiku-20241022
  min_call_interval_ms: 250
decay_config:
  emotional:
    S_base: 210
    S_floor: 160
  episodic:
    S_base: 150
    S_floor: 100
  semantic:
    S_base: 100
  procedural:
    S_base: 120
  reflective:
    S_base: 180
    S_floor: 120
"#
        )
        .unwrap();

        let settings = Settings::load(file.path());
        assert_eq!(settings.budget.monthly_limit, 5.0);
        assert_eq!(settings.model.min_call_interval_ms, 250);
        let rate = settings.cost_rate("haiku_classify").unwrap();
        assert!(rate.output > rate.input);

        let decay = settings.decay_config();
        assert_eq!(decay.get(crate::sector::MemorySector::Emotional).s_base, 210.0);
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "budget: [not, a, map]").unwrap();
        let settings = Settings::load(file.path());
        assert_eq!(settings.budget.monthly_limit, 10.0);
    }

    #[test]
    fn test_require_api_key_rejects_placeholder() {
        // Scoped env mutation; test-only.
        unsafe {
            std::env::set_var("ETHOS_TEST_KEY", "sk-ant-REDACTED");
        }
        assert!(require_api_key("ETHOS_TEST_KEY").is_err());
        unsafe {
            std::env::set_var("ETHOS_TEST_KEY", "sk-ant-real-key");
        }
        assert_eq!(require_api_key("ETHOS_TEST_KEY").unwrap(), "sk-ant-real-key");
        unsafe {
            std::env::remove_var("ETHOS_TEST_KEY");
        }
        assert!(require_api_key("ETHOS_TEST_KEY").is_err());
    }
}
