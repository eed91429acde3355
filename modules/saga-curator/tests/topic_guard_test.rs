use std::sync::Arc;

use serde_json::json;

use saga_common::{OracleConfig, SagaError, Topic};
use saga_curator::testing::{MemoryGraph, ScriptedOracle};
use saga_curator::{ProposeOutcome, TopicGuard};
use saga_oracle::{DecisionKind, Oracle};

fn guard(graph: &Arc<MemoryGraph>, script: &Arc<ScriptedOracle>, max_topics: u32) -> TopicGuard {
    TopicGuard::new(graph.clone(), Oracle::new(script.clone(), &OracleConfig::default()), max_topics)
}

fn full_graph() -> Arc<MemoryGraph> {
    Arc::new(
        MemoryGraph::new()
            .with_topic(Topic::new("eurusd", "EUR/USD", 1))
            .with_topic(Topic::new("dxy", "Dollar Index", 2)),
    )
}

#[tokio::test]
async fn below_cap_creates_without_oracle() {
    let graph = Arc::new(MemoryGraph::new());
    let script = Arc::new(ScriptedOracle::new());

    let out = guard(&graph, &script, 2).propose_topic(Topic::new("gold", "Gold", 3)).await.unwrap();

    assert_eq!(out, ProposeOutcome::Created);
    assert!(graph.topic("gold").is_some());
    assert_eq!(script.total_calls(), 0);
}

#[tokio::test]
async fn at_cap_oracle_decides() {
    let graph = full_graph();
    let script = Arc::new(
        ScriptedOracle::new()
            .on(DecisionKind::TopicCapacity, json!({ "action": "reject", "rationale": "overlaps dxy" }))
            .on(DecisionKind::TopicCapacity, json!({ "action": "add", "rationale": "distinct" })),
    );
    let guard = guard(&graph, &script, 2);

    let rejected = guard.propose_topic(Topic::new("usd", "USD", 2)).await.unwrap();
    assert!(matches!(rejected, ProposeOutcome::Rejected(_)));
    assert!(graph.topic("usd").is_none());

    let added = guard.propose_topic(Topic::new("gold", "Gold", 3)).await.unwrap();
    assert_eq!(added, ProposeOutcome::Created);
    assert!(graph.topic("gold").is_some());
}

#[tokio::test]
async fn at_cap_with_failing_oracle_fails_open() {
    let graph = full_graph();
    let script = Arc::new(ScriptedOracle::new());

    let out = guard(&graph, &script, 2).propose_topic(Topic::new("gold", "Gold", 3)).await.unwrap();

    assert_eq!(out, ProposeOutcome::Created);
    assert!(graph.topic("gold").is_some());
}

#[tokio::test]
async fn at_cap_with_malformed_answer_is_hard_error() {
    let graph = full_graph();
    let script = Arc::new(ScriptedOracle::new().always(DecisionKind::TopicCapacity, json!({ "action": "maybe" })));

    let err = guard(&graph, &script, 2).propose_topic(Topic::new("gold", "Gold", 3)).await.unwrap_err();

    assert!(matches!(err, SagaError::Validation(_)));
    assert!(graph.topic("gold").is_none());
}

#[tokio::test]
async fn existing_id_and_bad_priority() {
    let graph = full_graph();
    let script = Arc::new(ScriptedOracle::new());
    let guard = guard(&graph, &script, 10);

    assert_eq!(
        guard.propose_topic(Topic::new("eurusd", "Again", 1)).await.unwrap(),
        ProposeOutcome::AlreadyExists
    );
    assert!(matches!(
        guard.propose_topic(Topic::new("oil", "Oil", 6)).await,
        Err(SagaError::Validation(_))
    ));
}
