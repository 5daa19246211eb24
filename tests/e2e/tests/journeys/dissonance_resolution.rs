//! Journey: detect a dissonance, elevate it to a proposal, approve it,
//! observe the resolution hyperedge, then undo everything.

use ethos_core::{
    Actor, AuditAction, CheckStatus, DissonanceType, EdgeScope, GraphStore, NeighborQuery,
    ProposalStatus, ResolutionType,
};
use ethos_e2e_tests::{Harness, ScriptedLlm, Step, harness, seed_edge};
use tokio_util::sync::CancellationToken;

async fn seeded(h: &Harness) {
    seed_edge(h, "I/O", "solitude", "PREFERS", Default::default()).await;
    seed_edge(h, "I/O", "collaboration", "PREFERS", Default::default()).await;
}

#[tokio::test]
async fn dissonance_to_resolution_and_undo() {
    let llm = ScriptedLlm::new(vec![Step::Classify(DissonanceType::Evolution, 0.9)]);
    let h = harness(llm);
    seeded(&h).await;

    // 1. Detect: one pair, classified EVOLUTION
    let cancel = CancellationToken::new();
    let check = h
        .app
        .engine
        .check(&h.scope, "I/O", EdgeScope::Recent, &cancel)
        .await
        .unwrap();
    assert_eq!(check.status, CheckStatus::Success);
    assert_eq!(check.edges_analyzed, 2);
    assert_eq!(check.conflicts_found, 1);
    let dissonance = &check.dissonances[0];
    assert_eq!(dissonance.dissonance_type, DissonanceType::Evolution);

    // 2. Elevate: neutral template reasoning, no framing rejection
    let proposal = h
        .app
        .engine
        .propose_resolution(
            &h.scope,
            &h.app.smf,
            dissonance,
            ResolutionType::Evolution,
            None,
            "preference moved from solitude to collaboration",
        )
        .await
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Pending);

    // 3. Approve: IO-level consent executes the resolution
    let outcome = h
        .app
        .smf
        .approve(&h.scope, proposal.id, Actor::Io)
        .await
        .unwrap();
    assert!(outcome.executed);

    // 4. The older edge is tombstoned and filtered from neighborhood reads
    let edge_a = h.store.get_edge(&h.scope, dissonance.edge_a_id).await.unwrap();
    assert!(edge_a.is_superseded());

    let io = h.store.find_node_by_name(&h.scope, "I/O").await.unwrap().unwrap();
    let neighbors = h
        .store
        .query_neighbors(&h.scope, &NeighborQuery::new(io.id), &h.app.decay)
        .await
        .unwrap();
    assert!(neighbors.iter().all(|n| n.edge.id != dissonance.edge_a_id));

    let mut with_superseded = NeighborQuery::new(io.id);
    with_superseded.include_superseded = true;
    let all = h
        .store
        .query_neighbors(&h.scope, &with_superseded, &h.app.decay)
        .await
        .unwrap();
    assert!(all.len() > neighbors.len());

    // 5. Undo within the window restores the edge and orphans the hyperedge
    let undone = h.app.smf.undo(&h.scope, proposal.id, Actor::Ethr).await.unwrap();
    assert_eq!(undone.status, ProposalStatus::Undone);
    let edge_a = h.store.get_edge(&h.scope, dissonance.edge_a_id).await.unwrap();
    assert!(!edge_a.is_superseded());

    // 6. Every transition left an audit entry
    let audits = h.store.audit_entries();
    for action in [
        AuditAction::SmfPropose,
        AuditAction::SmfApprove,
        AuditAction::EdgeSupersede,
        AuditAction::ResolutionCreate,
        AuditAction::SmfUndo,
        AuditAction::EdgeSupersedeClear,
        AuditAction::ResolutionOrphan,
    ] {
        assert!(
            audits.iter().any(|a| a.action == action),
            "missing audit entry for {action:?}"
        );
    }
}

#[tokio::test]
async fn nuance_review_confirmation_flow() {
    let llm = ScriptedLlm::new(vec![Step::Classify(DissonanceType::Nuance, 0.75)]);
    let h = harness(llm);
    seeded(&h).await;

    let cancel = CancellationToken::new();
    let check = h
        .app
        .engine
        .check(&h.scope, "I/O", EdgeScope::Full, &cancel)
        .await
        .unwrap();
    assert_eq!(check.pending_reviews.len(), 1);
    let review = &check.pending_reviews[0];

    // Resolving the review as NUANCE confirms it and keeps both edges live
    let outcome = h
        .app
        .emitter
        .resolve_review(
            &h.scope,
            review.id,
            ResolutionType::Nuance,
            "both preferences hold in different contexts",
            "I/O",
        )
        .await
        .unwrap();
    assert!(outcome.superseded_edges.is_empty());
    assert_eq!(
        h.app.reviews.get(review.id).unwrap().status,
        ethos_core::ReviewStatus::Confirmed
    );
    assert!(h.app.reviews.pending().is_empty());
}
