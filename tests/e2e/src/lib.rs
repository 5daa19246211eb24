//! Shared harness for the end-to-end journey tests.
//!
//! Wires a full application context over the in-process store and a
//! scripted classifier, plus seeding helpers for graph fixtures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use ethos_core::{
    AppContext, Completion, CompletionRequest, DissonanceType, Edge, GraphStore, LlmClient,
    LlmError, MemoryStore, NewEdge, Properties, ProjectScope, Settings,
};

// ============================================================================
// SCRIPTED CLASSIFIER
// ============================================================================

/// One scripted classifier outcome
pub enum Step {
    Classify(DissonanceType, f64),
    Fail(LlmError),
}

/// Plays back a queue of outcomes, then answers NONE forever.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Step>>,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn api_name(&self) -> &str {
        "haiku_classify"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
        let step = self.script.lock().unwrap().pop_front();
        let dissonance_type = match step {
            Some(Step::Fail(e)) => return Err(e),
            Some(Step::Classify(t, _)) => t,
            None => DissonanceType::None,
        };
        Ok(Completion {
            text: json!({
                "dissonance_type": dissonance_type.as_str(),
                "confidence_score": 0.85,
                "description": "scripted verdict",
                "reasoning": "scripted"
            })
            .to_string(),
            input_tokens: 200,
            output_tokens: 60,
        })
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub app: AppContext,
    pub scope: ProjectScope,
}

pub fn harness(llm: Arc<dyn LlmClient>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let app = AppContext::build(Settings::default(), store.clone(), llm);
    Harness {
        store,
        app,
        scope: ProjectScope::new("e2e"),
    }
}

/// Seed `source --relation--> target` between named nodes.
pub async fn seed_edge(
    h: &Harness,
    source: &str,
    target: &str,
    relation: &str,
    properties: Properties,
) -> Edge {
    let source = h
        .store
        .add_node(&h.scope, source, "Node", Properties::new())
        .await
        .unwrap();
    let target = h
        .store
        .add_node(&h.scope, target, "Node", Properties::new())
        .await
        .unwrap();
    h.store
        .add_edge(
            &h.scope,
            NewEdge {
                source_id: source.id,
                target_id: target.id,
                relation: relation.into(),
                weight: 1.0,
                properties,
                memory_sector: None,
            },
            None,
        )
        .await
        .unwrap()
}
