//! Neutral proposal framing.
//!
//! Proposal reasoning may not carry recommendation or urgency language, so
//! approval rates cannot be optimized through wording. Free-form texts are
//! scanned against a bilingual stop-list and, when a model is configured,
//! cross-checked by a structured LLM judgement; either source failing fails
//! the text. Template-generated reasoning is accepted unconditionally.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dissonance::DissonanceType;
use crate::llm::{CompletionRequest, LlmClient};

// ============================================================================
// STOP-LIST
// ============================================================================

/// Case-insensitive stop-list, English and German entries paired.
pub const STOP_WORDS: [&str; 10] = [
    "recommend",
    "empfehle",
    "urgent",
    "dringend",
    "important",
    "wichtig",
    "necessary",
    "notwendig",
    "must",
    "muss",
];

/// Stop-list scan. Tokens are compared case-insensitively; longer stems also
/// match their inflections (recommends, importantly, empfehlen).
pub fn stop_word_violations(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut violations = Vec::new();
    for token in lowered.split(|c: char| !c.is_alphabetic()) {
        if token.is_empty() {
            continue;
        }
        for stop in STOP_WORDS {
            let hit = token == stop || (stop.len() >= 6 && token.starts_with(stop));
            if hit && !violations.contains(&stop.to_string()) {
                violations.push(stop.to_string());
            }
        }
    }
    violations
}

// ============================================================================
// TEMPLATE GENERATOR
// ============================================================================

/// Structured neutral reasoning rendered by the template generator.
/// `neutral_summary: true` marks the text as engine-produced; validation
/// accepts it unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NeutralReasoning {
    pub detected: String,
    pub affected: Vec<String>,
    pub if_approved: String,
    pub if_rejected: String,
    pub full_reasoning: String,
    pub neutral_summary: bool,
}

/// Render neutral reasoning for a dissonance-derived proposal.
pub fn generate_neutral_reasoning(
    dissonance_type: DissonanceType,
    edge_a: &str,
    edge_b: &str,
    action: &str,
) -> NeutralReasoning {
    let detected = format!(
        "Detected {} between '{}' and '{}'.",
        dissonance_type.as_str(),
        edge_a,
        edge_b
    );
    let affected = vec![edge_a.to_string(), edge_b.to_string()];
    let if_approved = format!(
        "If approved: the action '{action}' is executed, a resolution artifact is stored, and the original edges remain in the graph."
    );
    let if_rejected =
        "If rejected: no change is made and both edges remain as they are.".to_string();
    let full_reasoning = format!("{detected} {if_approved} {if_rejected}");

    NeutralReasoning {
        detected,
        affected,
        if_approved,
        if_rejected,
        full_reasoning,
        neutral_summary: true,
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

/// Structured answer expected from the LLM neutrality check
#[derive(Debug, Deserialize)]
struct LlmNeutralityAnswer {
    is_neutral: bool,
    #[serde(default)]
    violations: Vec<String>,
}

const NEUTRALITY_CHECK_PROMPT: &str = r#"Evaluate whether the following proposal reasoning is neutrally framed. Neutral reasoning states facts and consequences without recommending, urging, or pressuring a decision.

Text:
{text}

Answer with JSON only:
{"is_neutral": true | false, "violations": ["<offending phrase>", ...]}
"#;

/// Validates free-form reasoning. The stop-list always runs; the LLM check
/// runs when a client is configured and its verdict is merged (either
/// violating source fails the text). An unreachable model degrades to the
/// stop-list alone.
pub struct NeutralityValidator {
    llm: Option<Arc<dyn LlmClient>>,
}

impl NeutralityValidator {
    pub fn new() -> Self {
        Self { llm: None }
    }

    pub fn with_llm(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm: Some(llm) }
    }

    /// Returns `(is_neutral, violations)`.
    pub async fn validate(&self, text: &str) -> (bool, Vec<String>) {
        let mut violations = stop_word_violations(text);

        if let Some(llm) = &self.llm {
            let prompt = NEUTRALITY_CHECK_PROMPT.replace("{text}", text);
            match llm.complete(CompletionRequest::classification(prompt)).await {
                Ok(completion) => match extract_json::<LlmNeutralityAnswer>(&completion.text) {
                    Some(answer) if !answer.is_neutral => {
                        debug!(violations = ?answer.violations, "llm flagged non-neutral framing");
                        for v in answer.violations {
                            if !violations.contains(&v) {
                                violations.push(v);
                            }
                        }
                        if violations.is_empty() {
                            violations.push("non-neutral framing".to_string());
                        }
                    }
                    Some(_) => {}
                    None => {
                        warn!("unparseable llm neutrality answer, using stop-list only");
                    }
                },
                Err(e) => {
                    warn!(error = %e, "llm neutrality check unavailable, using stop-list only");
                }
            }
        }

        (violations.is_empty(), violations)
    }
}

impl Default for NeutralityValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the first JSON object out of a model answer that may carry prose or
/// code fences around it.
pub(crate) fn extract_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str::<T>(text.trim()) {
        return Some(value);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, LlmError};
    use async_trait::async_trait;

    #[test]
    fn test_stop_words_detected_case_insensitive() {
        let text = "Ich empfehle dringend diese wichtige Loesung, die notwendig ist.";
        let violations = stop_word_violations(text);
        assert!(violations.contains(&"empfehle".to_string()));
        assert!(violations.contains(&"dringend".to_string()));
        assert!(violations.contains(&"wichtig".to_string()));
        assert!(violations.contains(&"notwendig".to_string()));

        assert!(!stop_word_violations("This RECOMMENDS caution").is_empty());
        assert!(!stop_word_violations("You MUST approve").is_empty());
    }

    #[test]
    fn test_neutral_text_passes() {
        let text = "Edge A records a preference stated in March. Edge B records a \
                    different preference stated in June. If approved, a resolution \
                    hyperedge links both; if rejected, both remain unchanged.";
        assert!(stop_word_violations(text).is_empty());
    }

    #[test]
    fn test_short_stems_do_not_overmatch() {
        // "mustard" must not trip the "must" entry
        assert!(stop_word_violations("add mustard to the record").is_empty());
        // "mussten" must not trip "muss" (exact match only for short stems)
        assert!(stop_word_violations("sie mussten gehen").is_empty());
        assert!(!stop_word_violations("das muss geschehen").is_empty());
    }

    #[test]
    fn test_template_output_is_neutral() {
        let reasoning = generate_neutral_reasoning(
            DissonanceType::Evolution,
            "I/O VALUES autonomy",
            "I/O VALUES connection",
            "resolve_dissonance",
        );
        assert!(reasoning.neutral_summary);
        assert_eq!(reasoning.affected.len(), 2);
        assert!(reasoning.detected.contains("EVOLUTION"));
        assert!(stop_word_violations(&reasoning.full_reasoning).is_empty());
    }

    #[tokio::test]
    async fn test_validator_without_llm() {
        let validator = NeutralityValidator::new();
        let (neutral, violations) = validator.validate("I urgently recommend this").await;
        assert!(!neutral);
        assert!(!violations.is_empty());

        let (neutral, violations) = validator.validate("Edge A and edge B conflict.").await;
        assert!(neutral);
        assert!(violations.is_empty());
    }

    struct CannedJudge {
        answer: String,
    }

    #[async_trait]
    impl LlmClient for CannedJudge {
        fn api_name(&self) -> &str {
            "judge"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
            Ok(Completion {
                text: self.answer.clone(),
                input_tokens: 10,
                output_tokens: 10,
            })
        }
    }

    #[tokio::test]
    async fn test_llm_verdict_merged() {
        // Stop-list passes but the model flags manipulation
        let validator = NeutralityValidator::with_llm(Arc::new(CannedJudge {
            answer: r#"{"is_neutral": false, "violations": ["approval-seeking tone"]}"#.into(),
        }));
        let (neutral, violations) = validator.validate("A perfectly harmless text.").await;
        assert!(!neutral);
        assert_eq!(violations, vec!["approval-seeking tone".to_string()]);
    }

    #[tokio::test]
    async fn test_llm_agreement_keeps_neutral() {
        let validator = NeutralityValidator::with_llm(Arc::new(CannedJudge {
            answer: r#"{"is_neutral": true, "violations": []}"#.into(),
        }));
        let (neutral, _) = validator.validate("Edge A and edge B diverge.").await;
        assert!(neutral);
    }

    struct DownJudge;

    #[async_trait]
    impl LlmClient for DownJudge {
        fn api_name(&self) -> &str {
            "judge"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
            Err(LlmError::Unavailable { status: 503 })
        }
    }

    #[tokio::test]
    async fn test_llm_outage_degrades_to_stop_list() {
        let validator = NeutralityValidator::with_llm(Arc::new(DownJudge));
        let (neutral, _) = validator.validate("Edge A and edge B diverge.").await;
        assert!(neutral);
        let (neutral, _) = validator.validate("This is urgent.").await;
        assert!(!neutral);
    }

    #[test]
    fn test_extract_json_with_fences() {
        #[derive(Deserialize)]
        struct Probe {
            ok: bool,
        }
        let fenced = "Here is the answer:\n```json\n{\"ok\": true}\n```";
        assert!(extract_json::<Probe>(fenced).unwrap().ok);
        assert!(extract_json::<Probe>("no json here").is_none());
    }
}
