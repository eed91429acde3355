// Repository seams for the curator.
//
// TopicStore: topic reads, creation, the scheduler's compare-and-set claim.
// CapacityRepository: one method per capacity bound plus the AboutEdge writes.
// RelationshipStore: topic-to-topic edges.
// ContentSource: where refresh jobs pull new articles from.
//
// Counts are always read fresh from the store; nothing here caches.
// `GraphWriter` implements all three stores (store.rs); `testing::MemoryGraph` is the fake.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use saga_common::{
    AboutEdge, AboutEntry, Article, ChangeReason, ImportanceScores, RelationshipEdge,
    RelationshipType, Tier, Timeframe, Topic,
};
use saga_graph::ClaimRow;

#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<Topic>>;

    async fn get_topic(&self, id: &str) -> Result<Option<Topic>>;

    async fn count_topics(&self) -> Result<u32>;

    /// Create if absent. Returns false when the id is taken.
    async fn create_topic(&self, topic: &Topic) -> Result<bool>;

    /// Atomic compare-and-set of `last_queried` from `expected` to `now`.
    /// `None` means the store returned no row at all.
    async fn claim_topic(
        &self,
        id: &str,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimRow>>;

    async fn increment_queries(&self, id: &str) -> Result<()>;

    async fn flag_rewrite(&self, id: &str, reason: ChangeReason, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait CapacityRepository: Send + Sync {
    /// Visible edges at exactly `tier`. Its length is the tier's CapacityStatus.
    async fn tier_members(&self, topic_id: &str, timeframe: Timeframe, tier: Tier) -> Result<Vec<AboutEntry>>;

    /// Visible edges of the timeframe, any tier.
    async fn timeframe_pool(&self, topic_id: &str, timeframe: Timeframe) -> Result<Vec<AboutEntry>>;

    async fn about_edge(&self, article_id: &str, topic_id: &str) -> Result<Option<AboutEntry>>;

    /// Upsert the Article and write its edge atomically. Errors when the topic is missing.
    async fn write_about(&self, article: &Article, edge: &AboutEdge) -> Result<()>;

    async fn demote_about(
        &self,
        article_id: &str,
        topic_id: &str,
        scores: &ImportanceScores,
        tier: Tier,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Returns whether the Article became orphaned and was deleted.
    async fn remove_about(&self, article_id: &str, topic_id: &str) -> Result<bool>;

    async fn hide_about(&self, article_id: &str, topic_id: &str) -> Result<()>;

    async fn lower_priority(&self, article_id: &str, topic_id: &str) -> Result<Option<u8>>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn relationships_from(&self, source: &str, rel_type: RelationshipType) -> Result<Vec<RelationshipEdge>>;

    async fn relationship_exists(&self, rel_type: RelationshipType, id: &str) -> Result<bool>;

    async fn upsert_relationship(&self, edge: &RelationshipEdge) -> Result<()>;

    async fn delete_relationship(&self, rel_type: RelationshipType, id: &str) -> Result<()>;
}

/// Everything the curator needs from the graph.
pub trait GraphStore: TopicStore + CapacityRepository + RelationshipStore {}

impl<T: TopicStore + CapacityRepository + RelationshipStore> GraphStore for T {}

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Up to `limit` new articles for the topic. Consumed articles are not returned again.
    async fn fetch(&self, topic: &Topic, limit: usize) -> Result<Vec<Article>>;

    /// Hand fetched articles back so a later fetch returns them again.
    async fn requeue(&self, topic: &Topic, articles: &[Article]) -> Result<()>;
}
