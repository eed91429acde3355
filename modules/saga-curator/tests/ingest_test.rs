//! End to end through the curator: spool -> classify -> admit -> replace -> notify.

use std::sync::Arc;

use serde_json::json;

use saga_common::{ChangeReason, FileConfig, Tier, Timeframe, Topic, TopicAnalysis};
use saga_curator::testing::{article, classification_json, seeded_entry, MemoryGraph, MemorySource, RecordingSink, ScriptedOracle};
use saga_curator::{
    spawn_notifier, ContentSource, Curator, GraphFlagSink, IngestOutcome, IngestSkip, LinkOutcome, Notifier,
    ReplacementOutcome, SkipReason, SpoolSource,
};
use saga_oracle::{DecisionKind, OracleError};

fn eurusd() -> Topic {
    Topic::new("eurusd", "EUR/USD", 1)
}

fn spool_line(summary: &str, hour: u32) -> String {
    json!({ "summary": summary, "source": "wire", "published_at": format!("2026-03-01T{hour:02}:00:00Z") }).to_string()
}

#[tokio::test]
async fn refresh_consumes_spool_and_signals_missing_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (0..3).map(|i| spool_line(&format!("ecb holds {i}"), i)).collect();
    std::fs::write(dir.path().join("eurusd.jsonl"), lines.join("\n")).unwrap();

    let graph = Arc::new(MemoryGraph::new().with_topic(eurusd()));
    let script = Arc::new(ScriptedOracle::new().always(DecisionKind::Classify, classification_json("medium", [2, 1, 0, 0])));
    let sink = Arc::new(RecordingSink::new());
    let (notifier, rx) = Notifier::channel();
    let notifications = spawn_notifier(rx, sink.clone());

    let curator = Curator::new(
        graph.clone(),
        script.clone(),
        Arc::new(SpoolSource::new(dir.path())),
        &FileConfig::default(),
        notifier,
    );
    let report = curator.refresh.run(&eurusd()).await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.admitted, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.link, Some(LinkOutcome::Skipped(SkipReason::NoCandidates)));
    assert_eq!(graph.tier_ids("eurusd", Timeframe::Medium, 2).len(), 3);
    assert_eq!(graph.topic("eurusd").unwrap().queries, 1);
    assert!(std::fs::read_to_string(dir.path().join("eurusd.jsonl")).unwrap().trim().is_empty());

    drop(curator);
    notifications.await.unwrap();
    assert_eq!(
        sink.reasons(),
        vec![("eurusd".to_string(), ChangeReason::AnalysisMissing); 3]
    );
}

#[tokio::test]
async fn zero_importance_is_skipped_before_admission() {
    let graph = Arc::new(MemoryGraph::new().with_topic(eurusd()));
    let script = Arc::new(ScriptedOracle::new().on(DecisionKind::Classify, classification_json("immediate", [0, 0, 0, 0])));
    let (notifier, _rx) = Notifier::channel();
    let curator = Curator::new(graph.clone(), script.clone(), Arc::new(MemorySource::new()), &FileConfig::default(), notifier);

    let out = curator.ingestor.ingest(&eurusd(), article("noise", 1)).await.unwrap();

    assert_eq!(out, IngestOutcome::Skipped(IngestSkip::ZeroImportance));
    assert!(graph.about_edges("eurusd").is_empty());
    assert!(!graph.has_article("noise"));
}

#[tokio::test]
async fn reingesting_is_a_no_op() {
    let graph = Arc::new(MemoryGraph::new().with_topic(eurusd()));
    let script = Arc::new(ScriptedOracle::new().always(DecisionKind::Classify, classification_json("structural", [0, 3, 0, 0])));
    let (notifier, _rx) = Notifier::channel();
    let curator = Curator::new(graph.clone(), script.clone(), Arc::new(MemorySource::new()), &FileConfig::default(), notifier);

    let first = curator.ingestor.ingest(&eurusd(), article("a1", 1)).await.unwrap();
    let state = graph.about_edges("eurusd");
    let second = curator.ingestor.ingest(&eurusd(), article("a1", 1)).await.unwrap();

    assert!(matches!(first, IngestOutcome::Admitted { tier, .. } if tier == Tier::TOP));
    assert_eq!(second, IngestOutcome::AlreadyAdmitted(Tier::TOP));
    assert_eq!(graph.about_edges("eurusd"), state);
    assert_eq!(script.call_count(DecisionKind::Classify), 1);
}

#[tokio::test]
async fn one_article_per_topic_edge_shared_article_node() {
    let graph = Arc::new(
        MemoryGraph::new()
            .with_topic(eurusd())
            .with_topic(Topic::new("dxy", "Dollar Index", 2)),
    );
    let script = Arc::new(ScriptedOracle::new().always(DecisionKind::Classify, classification_json("medium", [1, 0, 0, 0])));
    let (notifier, _rx) = Notifier::channel();
    let curator = Curator::new(graph.clone(), script, Arc::new(MemorySource::new()), &FileConfig::default(), notifier);

    curator.ingestor.ingest(&eurusd(), article("fed", 1)).await.unwrap();
    curator
        .ingestor
        .ingest(&Topic::new("dxy", "Dollar Index", 2), article("fed", 1))
        .await
        .unwrap();

    assert!(graph.edge("eurusd", "fed").is_some());
    assert!(graph.edge("dxy", "fed").is_some());
}

#[tokio::test]
async fn invalid_classification_fails_one_article_not_the_refresh() {
    let graph = Arc::new(MemoryGraph::new().with_topic(eurusd()));
    let script = Arc::new(
        ScriptedOracle::new()
            .on(DecisionKind::Classify, classification_json("medium", [4, 0, 0, 0]))
            .on(DecisionKind::Classify, classification_json("weekly", [1, 0, 0, 0]))
            .always(DecisionKind::Classify, classification_json("medium", [1, 0, 0, 0])),
    );
    let source = Arc::new(MemorySource::new().with_articles("eurusd", vec![article("bad", 2), article("good", 1)]));
    let (notifier, _rx) = Notifier::channel();
    let curator = Curator::new(graph.clone(), script, source, &FileConfig::default(), notifier);

    let report = curator.refresh.run(&eurusd()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.admitted, 1);
    assert!(graph.edge("eurusd", "good").is_some());
    assert!(graph.edge("eurusd", "bad").is_none());
}

#[tokio::test]
async fn outage_hands_article_back_for_next_refresh() {
    let graph = Arc::new(MemoryGraph::new().with_topic(eurusd()));
    let script = Arc::new(
        ScriptedOracle::new()
            .on_error(DecisionKind::Classify, OracleError::Unavailable("overloaded".into()))
            .on_error(DecisionKind::Classify, OracleError::Unavailable("overloaded".into()))
            .always(DecisionKind::Classify, classification_json("medium", [1, 0, 0, 0])),
    );
    let source = Arc::new(MemorySource::new().with_articles("eurusd", vec![article("late", 2), article("ok", 1)]));
    let (notifier, _rx) = Notifier::channel();
    let curator = Curator::new(graph.clone(), script, source.clone(), &FileConfig::default(), notifier);

    let first = curator.refresh.run(&eurusd()).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.admitted, 1);
    assert_eq!(source.pending("eurusd"), vec!["late".to_string()]);

    let second = curator.refresh.run(&eurusd()).await.unwrap();
    assert_eq!(second.admitted, 1);
    assert!(graph.edge("eurusd", "late").is_some());
    assert!(source.pending("eurusd").is_empty());
}

#[tokio::test]
async fn rejected_classification_is_not_requeued() {
    let graph = Arc::new(MemoryGraph::new().with_topic(eurusd()));
    let script = Arc::new(
        ScriptedOracle::new()
            .on(DecisionKind::Classify, classification_json("medium", [4, 0, 0, 0]))
            .on(DecisionKind::Classify, classification_json("medium", [4, 0, 0, 0])),
    );
    let source = Arc::new(MemorySource::new().with_articles("eurusd", vec![article("bad", 2)]));
    let (notifier, _rx) = Notifier::channel();
    let curator = Curator::new(graph, script, source.clone(), &FileConfig::default(), notifier);

    let report = curator.refresh.run(&eurusd()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert!(source.pending("eurusd").is_empty());
}

#[tokio::test]
async fn full_pool_eviction_flags_topic_for_rewrite() {
    let mut topic = eurusd();
    topic.analysis = TopicAnalysis {
        structural: Some("s".into()),
        medium: Some("m".into()),
        immediate: Some("i".into()),
    };
    let mut graph = MemoryGraph::new().with_topic(topic.clone());
    for i in 0..10 {
        graph = graph.with_entry(seeded_entry("eurusd", &format!("old{i}"), Timeframe::Medium, 0, 200 - i));
    }
    let graph = Arc::new(graph);
    let script = Arc::new(ScriptedOracle::new().always(DecisionKind::Classify, classification_json("medium", [0, 0, 1, 0])));
    let (notifier, rx) = Notifier::channel();
    let notifications = spawn_notifier(rx, Arc::new(GraphFlagSink::new(graph.clone())));
    let curator = Curator::new(graph.clone(), script, Arc::new(MemorySource::new()), &FileConfig::default(), notifier);

    let out = curator.ingestor.ingest(&topic, article("fresh", 0)).await.unwrap();

    let IngestOutcome::Admitted { replacement: ReplacementOutcome::Applied { actions, .. }, .. } = out else {
        panic!("expected admission with eviction");
    };
    assert_eq!(actions[0].article_id, "old0");
    assert_eq!(graph.visible_count("eurusd", Timeframe::Medium), 10);

    drop(curator);
    notifications.await.unwrap();
    assert_eq!(graph.rewrite_flags(), vec![("eurusd".to_string(), ChangeReason::ArticleReplaced)]);
}

#[tokio::test]
async fn memory_source_honours_limit() {
    let source = MemorySource::new().with_articles("eurusd", (0..5).map(|i| article(&format!("a{i}"), i)).collect());
    assert_eq!(source.fetch(&eurusd(), 2).await.unwrap().len(), 2);
    assert_eq!(source.fetch(&eurusd(), 10).await.unwrap().len(), 3);
}
