//! Integration tests for the Cypher layer against a real Neo4j instance.
//!
//! Requirements: Docker (for Neo4j via testcontainers)
//!
//! Run with: cargo test -p saga-graph --features test-utils --test graph_writer_test

#![cfg(feature = "test-utils")]

use chrono::{Duration, Utc};

use saga_common::{
    AboutEdge, Article, Classification, ImportanceScores, RelationshipEdge, RelationshipType, Tier,
    Timeframe, Topic,
};
use saga_graph::GraphWriter;

/// Spin up a fresh Neo4j container and run migrations.
async fn setup() -> (impl std::any::Any, GraphWriter) {
    let (container, client) = saga_graph::testutil::neo4j_container().await;
    saga_graph::migrate::migrate(&client)
        .await
        .expect("migration failed");
    (container, GraphWriter::new(client))
}

fn article(id: &str) -> Article {
    Article {
        id: id.to_string(),
        summary: format!("summary of {id}"),
        source: "newswire".to_string(),
        published_at: Some(Utc::now() - Duration::hours(1)),
    }
}

fn classification(timeframe: Timeframe, top: u8) -> Classification {
    Classification {
        timeframe,
        scores: ImportanceScores { risk: top, opportunity: 0, trend: top.min(1), catalyst: 0 },
        motivation: "moves the pair".to_string(),
        implications: "watch the curve".to_string(),
    }
}

async fn seed_topic(writer: &GraphWriter, id: &str) {
    let created = writer
        .create_topic(&Topic::new(id, id.to_uppercase(), 1), Utc::now())
        .await
        .unwrap();
    assert!(created);
}

#[tokio::test]
async fn create_topic_is_check_and_create() {
    let (_c, writer) = setup().await;
    seed_topic(&writer, "eurusd").await;

    let again = writer
        .create_topic(&Topic::new("eurusd", "dup", 3), Utc::now())
        .await
        .unwrap();
    assert!(!again);
    assert_eq!(writer.count_topics().await.unwrap(), 1);

    let topic = writer.get_topic("eurusd").await.unwrap().unwrap();
    assert_eq!(topic.name, "EURUSD");
    assert_eq!(topic.priority, 1);
    assert_eq!(topic.last_queried, None);
}

#[tokio::test]
async fn claim_is_compare_and_set() {
    let (_c, writer) = setup().await;
    seed_topic(&writer, "eurusd").await;

    let now = Utc::now();
    let first = writer.claim_topic("eurusd", None, now).await.unwrap().unwrap();
    assert_eq!(first.id, "eurusd");
    assert!(first.claimed);

    // Second claimant still believes last_queried is unset.
    let second = writer.claim_topic("eurusd", None, now).await.unwrap().unwrap();
    assert!(!second.claimed);

    let topic = writer.get_topic("eurusd").await.unwrap().unwrap();
    let stored = topic.last_queried.unwrap();
    let third = writer
        .claim_topic("eurusd", Some(&stored), now + Duration::seconds(5))
        .await
        .unwrap()
        .unwrap();
    assert!(third.claimed);

    assert!(writer.claim_topic("missing", None, now).await.unwrap().is_none());
}

#[tokio::test]
async fn about_edges_count_exact_tier_and_skip_hidden() {
    let (_c, writer) = setup().await;
    seed_topic(&writer, "eurusd").await;
    let now = Utc::now();

    for (id, tier) in [("a1", 3), ("a2", 3), ("a3", 2)] {
        let c = classification(Timeframe::Immediate, tier);
        let edge = AboutEdge::admitted(id, "eurusd", &c, Tier::new(tier).unwrap(), now);
        assert!(writer.write_about(&article(id), &edge, now).await.unwrap());
    }

    let top = writer
        .tier_members("eurusd", Timeframe::Immediate, Tier::TOP)
        .await
        .unwrap();
    assert_eq!(top.len(), 2);

    writer.hide_about("a1", "eurusd").await.unwrap();
    let top = writer
        .tier_members("eurusd", Timeframe::Immediate, Tier::TOP)
        .await
        .unwrap();
    assert_eq!(top.iter().map(|e| e.article.id.as_str()).collect::<Vec<_>>(), vec!["a2"]);

    let pool = writer.timeframe_pool("eurusd", Timeframe::Immediate).await.unwrap();
    assert_eq!(pool.len(), 2);
}

#[tokio::test]
async fn demotion_caps_scores_and_stamps_reason() {
    let (_c, writer) = setup().await;
    seed_topic(&writer, "eurusd").await;
    let now = Utc::now();

    let c = classification(Timeframe::Medium, 3);
    writer
        .write_about(&article("a1"), &AboutEdge::admitted("a1", "eurusd", &c, Tier::TOP, now), now)
        .await
        .unwrap();

    let tier2 = Tier::new(2).unwrap();
    let capped = c.scores.capped_at(tier2);
    writer
        .demote_about("a1", "eurusd", &capped, tier2, "superseded", now)
        .await
        .unwrap();

    let entry = writer.about_edge("a1", "eurusd").await.unwrap().unwrap();
    assert_eq!(entry.edge.tier, tier2);
    assert_eq!(entry.edge.scores.risk, 2);
    assert_eq!(entry.edge.downgrade_reason.as_deref(), Some("superseded"));
    assert!(entry.edge.downgraded_at.is_some());
}

#[tokio::test]
async fn remove_deletes_orphaned_article_only() {
    let (_c, writer) = setup().await;
    seed_topic(&writer, "eurusd").await;
    seed_topic(&writer, "dxy").await;
    let now = Utc::now();

    let c = classification(Timeframe::Structural, 1);
    for topic in ["eurusd", "dxy"] {
        let edge = AboutEdge::admitted("shared", topic, &c, Tier::new(1).unwrap(), now);
        writer
            .write_about(&article("shared"), &edge, now)
            .await
            .unwrap();
    }

    assert!(!writer.remove_about("shared", "eurusd").await.unwrap());
    assert!(writer.about_edge("shared", "dxy").await.unwrap().is_some());
    assert!(writer.remove_about("shared", "dxy").await.unwrap());
}

#[tokio::test]
async fn lower_priority_floors_at_one() {
    let (_c, writer) = setup().await;
    seed_topic(&writer, "eurusd").await;
    let now = Utc::now();

    let c = classification(Timeframe::Immediate, 2);
    writer
        .write_about(
            &article("a1"),
            &AboutEdge::admitted("a1", "eurusd", &c, Tier::new(2).unwrap(), now),
            now,
        )
        .await
        .unwrap();

    assert_eq!(writer.lower_priority("a1", "eurusd").await.unwrap(), Some(1));
    assert_eq!(writer.lower_priority("a1", "eurusd").await.unwrap(), Some(1));
    assert_eq!(writer.lower_priority("missing", "eurusd").await.unwrap(), None);
}

#[tokio::test]
async fn relationship_upsert_is_idempotent() {
    let (_c, writer) = setup().await;
    seed_topic(&writer, "eurusd").await;
    seed_topic(&writer, "dxy").await;
    let now = Utc::now();

    let edge = RelationshipEdge::new(RelationshipType::Peers, "eurusd", "dxy", "same driver", now);
    writer.upsert_relationship(&edge).await.unwrap();
    writer.upsert_relationship(&edge).await.unwrap();

    let out = writer
        .relationships_from("eurusd", RelationshipType::Peers)
        .await
        .unwrap();
    assert_eq!(out.len(), 1);

    let reverse_id = RelationshipEdge::edge_id(RelationshipType::Peers, "dxy", "eurusd");
    assert!(writer
        .relationship_exists(RelationshipType::Peers, &reverse_id)
        .await
        .unwrap());

    writer
        .delete_relationship(RelationshipType::Peers, &edge.id)
        .await
        .unwrap();
    assert!(writer
        .relationships_from("eurusd", RelationshipType::Peers)
        .await
        .unwrap()
        .is_empty());
}


#[tokio::test]
async fn about_write_recreates_article_removed_by_another_topic() {
    let (_c, writer) = setup().await;
    seed_topic(&writer, "eurusd").await;
    seed_topic(&writer, "dxy").await;
    let now = Utc::now();
    let c = classification(Timeframe::Medium, 1);

    let first = AboutEdge::admitted("a1", "eurusd", &c, Tier::new(1).unwrap(), now);
    assert!(writer.write_about(&article("a1"), &first, now).await.unwrap());
    assert!(writer.remove_about("a1", "eurusd").await.unwrap());

    let second = AboutEdge::admitted("a1", "dxy", &c, Tier::new(1).unwrap(), now);
    assert!(writer.write_about(&article("a1"), &second, now).await.unwrap());
    assert!(writer.about_edge("a1", "dxy").await.unwrap().is_some());
}

#[tokio::test]
async fn about_write_reports_missing_topic() {
    let (_c, writer) = setup().await;
    let now = Utc::now();
    let c = classification(Timeframe::Medium, 1);

    let edge = AboutEdge::admitted("a1", "ghost", &c, Tier::new(1).unwrap(), now);
    assert!(!writer.write_about(&article("a1"), &edge, now).await.unwrap());
    assert!(writer.about_edge("a1", "ghost").await.unwrap().is_none());
}
