use std::sync::Arc;

use chrono::{Duration, Utc};

use saga_common::{FileConfig, SagaError, Topic};
use saga_curator::testing::{MemoryGraph, MemorySource, ScriptedOracle};
use saga_curator::{ClaimOutcome, Curator, Notifier, TickOutcome};

fn curator(graph: &Arc<MemoryGraph>) -> Curator {
    let (notifier, _rx) = Notifier::channel();
    Curator::new(
        graph.clone(),
        Arc::new(ScriptedOracle::new()),
        Arc::new(MemorySource::new()),
        &FileConfig::default(),
        notifier,
    )
}

fn queried(id: &str, priority: u8, secs_ago: i64) -> Topic {
    let mut t = Topic::new(id, id, priority);
    t.last_queried = Some(Utc::now() - Duration::seconds(secs_ago));
    t
}

#[tokio::test]
async fn racing_claims_on_same_snapshot_have_one_winner() {
    let snapshot = queried("eurusd", 1, 5000);
    let graph = Arc::new(MemoryGraph::new().with_topic(snapshot.clone()));
    let curator = curator(&graph);

    let now = Utc::now();
    let (first, second) = tokio::join!(
        curator.scheduler.claim(&snapshot, now),
        curator.scheduler.claim(&snapshot, now + Duration::seconds(1)),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let wins = outcomes.iter().filter(|o| matches!(o, ClaimOutcome::Claimed(_))).count();
    assert_eq!(wins, 1);
    assert!(outcomes.contains(&ClaimOutcome::Lost));
    assert_ne!(graph.topic("eurusd").unwrap().last_queried, snapshot.last_queried);
}

#[tokio::test]
async fn claim_echoing_another_id_is_fatal() {
    let topic = queried("eurusd", 1, 5000);
    let graph = Arc::new(MemoryGraph::new().with_topic(topic.clone()).with_claim_echo("dxy"));

    let err = curator(&graph).scheduler.claim(&topic, Utc::now()).await.unwrap_err();

    assert!(matches!(err, SagaError::ClaimFailed(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn claim_without_row_is_fatal() {
    let topic = queried("eurusd", 1, 5000);
    let graph = Arc::new(MemoryGraph::new().with_topic(topic.clone()).with_missing_claim_rows());

    let err = curator(&graph).scheduler.claim(&topic, Utc::now()).await.unwrap_err();

    assert!(matches!(err, SagaError::ClaimFailed(_)));
}

#[tokio::test]
async fn dispatch_pass_claims_only_due_topics() {
    let graph = Arc::new(
        MemoryGraph::new()
            .with_topic(queried("fast", 1, 5000))
            .with_topic(queried("slow", 5, 5000))
            .with_topic(Topic::new("fresh", "Fresh", 3)),
    );
    let curator = curator(&graph);

    let report = curator.scheduler.dispatch_pass().await.unwrap();
    curator.scheduler.pool().drain().await.unwrap();

    assert_eq!(report.dispatched, vec!["fresh", "fast"]);
    assert!(report.lost.is_empty());
    // slow is due in 81400s, clamped to the 1800s ceiling.
    assert_eq!(report.sleep.as_secs(), 1800);

    assert_eq!(graph.topic("fast").unwrap().queries, 1);
    assert_eq!(graph.topic("fresh").unwrap().queries, 1);
    assert_eq!(graph.topic("slow").unwrap().queries, 0);
    assert!(graph.topic("fresh").unwrap().last_queried.is_some());
}

#[tokio::test]
async fn tick_refreshes_most_overdue_then_goes_idle() {
    let graph = Arc::new(
        MemoryGraph::new()
            .with_topic(queried("fast", 1, 5000))
            .with_topic(queried("slow", 5, 5000)),
    );
    let curator = curator(&graph);

    match curator.scheduler.tick_once().await.unwrap() {
        TickOutcome::Refreshed(report) => assert_eq!(report.topic_id, "fast"),
        other => panic!("expected refresh, got {other:?}"),
    }
    assert!(matches!(curator.scheduler.tick_once().await.unwrap(), TickOutcome::Idle(_)));
}

#[tokio::test]
async fn run_stops_on_shutdown_after_draining() {
    let graph = Arc::new(MemoryGraph::new().with_topic(Topic::new("eurusd", "EUR/USD", 1)));
    let curator = curator(&graph);

    curator.scheduler.run(async {}).await.unwrap();

    assert_eq!(graph.topic("eurusd").unwrap().queries, 1);
}

#[tokio::test]
async fn run_aborts_on_claim_failure() {
    let graph = Arc::new(
        MemoryGraph::new()
            .with_topic(Topic::new("eurusd", "EUR/USD", 1))
            .with_claim_echo("someone-else"),
    );
    let curator = curator(&graph);

    let err = curator.scheduler.run(std::future::pending::<()>()).await.unwrap_err();

    assert!(matches!(err, SagaError::ClaimFailed(_)));
}
