//! Journey: reclassifying a constitutive edge is blocked until a bilateral
//! proposal carries both approvals.

use ethos_core::{
    Actor, ApprovalLevel, GraphStore, MemorySector, ProposalDraft, ProposedAction,
    ReclassifyOutcome, ReclassifyParams, TriggerType,
};
use ethos_e2e_tests::{harness, seed_edge, ScriptedLlm};
use serde_json::json;

fn params(new_sector: &str) -> ReclassifyParams {
    ReclassifyParams {
        source_name: "I/O".into(),
        target_name: "continuity".into(),
        relation: "IS".into(),
        new_sector: new_sector.into(),
        edge_id: None,
        actor: "I/O".into(),
    }
}

#[tokio::test]
async fn constitutive_reclassification_needs_bilateral_consent() {
    let h = harness(ScriptedLlm::new(vec![]));
    let mut properties = ethos_core::Properties::new();
    properties.insert("is_constitutive".into(), json!(true));
    let edge = seed_edge(&h, "I/O", "continuity", "IS", properties).await;

    // Without consent: CONSENT_REQUIRED, edge untouched
    let outcome = h
        .app
        .reclassifier
        .reclassify(&h.scope, params("reflective"))
        .await
        .unwrap();
    assert!(matches!(outcome, ReclassifyOutcome::ConsentRequired { .. }));

    // Draft the bilateral proposal
    let mut action = ProposedAction::new("reclassify");
    action.new_sector = Some(MemorySector::Reflective);
    let proposal = h
        .app
        .smf
        .create_proposal(
            &h.scope,
            ProposalDraft {
                trigger_type: TriggerType::Manual,
                proposed_action: action,
                affected_edges: vec![edge.id],
                reasoning: "The edge describes a reflective self-relation.".into(),
                approval_level: None,
                reasoning_from_template: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(proposal.approval_level, ApprovalLevel::Bilateral);

    // One approval is not consent
    h.app.smf.approve(&h.scope, proposal.id, Actor::Io).await.unwrap();
    // (the approval itself executed the reclassification only if complete;
    // bilateral means it did not)
    let still_blocked = h
        .app
        .reclassifier
        .reclassify(&h.scope, params("reflective"))
        .await
        .unwrap();
    assert!(matches!(still_blocked, ReclassifyOutcome::ConsentRequired { .. }));

    // Both approvals: execution reclassifies the edge through the SMF path
    h.app.smf.approve(&h.scope, proposal.id, Actor::Ethr).await.unwrap();
    let updated = h.store.get_edge(&h.scope, edge.id).await.unwrap();
    assert_eq!(updated.memory_sector, MemorySector::Reflective);

    // The approved proposal also satisfies the manual path for a repeat run
    let manual = h
        .app
        .reclassifier
        .reclassify(&h.scope, params("reflective"))
        .await
        .unwrap();
    assert!(matches!(manual, ReclassifyOutcome::Success { .. }));

    // The stamp records the consent chain
    let stamped = h.store.get_edge(&h.scope, edge.id).await.unwrap();
    let stamp = stamped
        .properties
        .get("last_reclassification")
        .and_then(|v| v.as_object())
        .unwrap();
    assert_eq!(stamp.get("to_sector").unwrap(), "reflective");
    assert!(stamp.contains_key("smf_proposal_id"));
}

#[tokio::test]
async fn descriptive_edges_reclassify_directly() {
    let h = harness(ScriptedLlm::new(vec![]));
    seed_edge(&h, "I/O", "continuity", "IS", Default::default()).await;

    let outcome = h
        .app
        .reclassifier
        .reclassify(&h.scope, params("episodic"))
        .await
        .unwrap();
    match outcome {
        ReclassifyOutcome::Success {
            old_sector,
            new_sector,
            ..
        } => {
            assert_eq!(old_sector, MemorySector::Semantic);
            assert_eq!(new_sector, MemorySector::Episodic);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
