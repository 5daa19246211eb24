//! Journey: classifier exhaustion flips the engine into fallback; a
//! successful health probe restores normal operation.

use std::sync::Arc;
use std::time::Duration;

use ethos_core::{
    CLASSIFICATION_SERVICE, CheckStatus, DissonanceType, EdgeScope, HealthMonitor, LlmError,
};
use ethos_e2e_tests::{ScriptedLlm, Step, harness, seed_edge};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn exhaustion_then_recovery() {
    // First call exhausts; everything after answers normally
    let llm = ScriptedLlm::new(vec![Step::Fail(LlmError::Exhausted {
        api_name: "haiku_classify".into(),
        last_error: "rate limited".into(),
    })]);
    let h = harness(llm.clone());
    seed_edge(&h, "I/O", "music", "ENJOYS", Default::default()).await;
    seed_edge(&h, "I/O", "noise", "AVOIDS", Default::default()).await;

    // 1. Exhaustion: the whole check degrades, nothing partial leaks out
    let cancel = CancellationToken::new();
    let check = h
        .app
        .engine
        .check(&h.scope, "I/O", EdgeScope::Full, &cancel)
        .await
        .unwrap();
    assert_eq!(check.status, CheckStatus::Skipped);
    assert!(check.fallback);
    assert_eq!(check.edges_analyzed, 0);
    assert!(check.dissonances.is_empty());
    assert!(h.app.fallback.is_active(CLASSIFICATION_SERVICE));

    // 2. While degraded, checks short-circuit
    let check = h
        .app
        .engine
        .check(&h.scope, "I/O", EdgeScope::Full, &cancel)
        .await
        .unwrap();
    assert_eq!(check.status, CheckStatus::Skipped);

    // 3. The health monitor probes the now-healthy classifier and recovers
    let monitor = HealthMonitor::new(h.app.fallback.clone(), Arc::new(HealthyProbe))
        .with_timing(Duration::from_millis(5), Duration::from_millis(100));
    let monitor_cancel = CancellationToken::new();
    let handle = tokio::spawn(monitor.run(monitor_cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor_cancel.cancel();
    handle.await.unwrap();
    assert!(!h.app.fallback.is_active(CLASSIFICATION_SERVICE));

    // 4. Subsequent checks succeed again
    let check = h
        .app
        .engine
        .check(&h.scope, "I/O", EdgeScope::Full, &cancel)
        .await
        .unwrap();
    assert_eq!(check.status, CheckStatus::Success);
    assert_eq!(check.edges_analyzed, 2);
}

struct HealthyProbe;

#[async_trait::async_trait]
impl ethos_core::LlmClient for HealthyProbe {
    fn api_name(&self) -> &str {
        "haiku_classify"
    }

    async fn complete(
        &self,
        _request: ethos_core::CompletionRequest,
    ) -> Result<ethos_core::Completion, LlmError> {
        Ok(ethos_core::Completion {
            text: "pong".into(),
            input_tokens: 1,
            output_tokens: 1,
        })
    }
}

#[tokio::test]
async fn scripted_classifier_sanity() {
    // The shared harness answers NONE once the script is exhausted
    let llm = ScriptedLlm::new(vec![Step::Classify(DissonanceType::None, 0.9)]);
    let h = harness(llm);
    seed_edge(&h, "I/O", "music", "ENJOYS", Default::default()).await;
    seed_edge(&h, "I/O", "noise", "AVOIDS", Default::default()).await;

    let check = h
        .app
        .engine
        .check(&h.scope, "I/O", EdgeScope::Full, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(check.status, CheckStatus::Success);
    assert_eq!(check.conflicts_found, 0);
}
