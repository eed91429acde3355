use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use saga_common::{
    AboutEdge, AboutEntry, Article, ChangeReason, ImportanceScores, RelationshipEdge,
    RelationshipType, Tier, Timeframe, Topic,
};
use saga_graph::{ClaimRow, GraphWriter};

use crate::traits::{CapacityRepository, RelationshipStore, TopicStore};

#[async_trait]
impl TopicStore for GraphWriter {
    async fn list_topics(&self) -> Result<Vec<Topic>> {
        Ok(self.list_topics().await?)
    }

    async fn get_topic(&self, id: &str) -> Result<Option<Topic>> {
        Ok(self.get_topic(id).await?)
    }

    async fn count_topics(&self) -> Result<u32> {
        Ok(self.count_topics().await?)
    }

    async fn create_topic(&self, topic: &Topic) -> Result<bool> {
        Ok(self.create_topic(topic, Utc::now()).await?)
    }

    async fn claim_topic(
        &self,
        id: &str,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimRow>> {
        Ok(self.claim_topic(id, expected.as_ref(), now).await?)
    }

    async fn increment_queries(&self, id: &str) -> Result<()> {
        Ok(self.increment_queries(id).await?)
    }

    async fn flag_rewrite(&self, id: &str, reason: ChangeReason, at: DateTime<Utc>) -> Result<()> {
        Ok(self.flag_rewrite(id, reason, at).await?)
    }
}

#[async_trait]
impl CapacityRepository for GraphWriter {
    async fn tier_members(&self, topic_id: &str, timeframe: Timeframe, tier: Tier) -> Result<Vec<AboutEntry>> {
        Ok(self.tier_members(topic_id, timeframe, tier).await?)
    }

    async fn timeframe_pool(&self, topic_id: &str, timeframe: Timeframe) -> Result<Vec<AboutEntry>> {
        Ok(self.timeframe_pool(topic_id, timeframe).await?)
    }

    async fn about_edge(&self, article_id: &str, topic_id: &str) -> Result<Option<AboutEntry>> {
        Ok(self.about_edge(article_id, topic_id).await?)
    }

    async fn write_about(&self, article: &Article, edge: &AboutEdge) -> Result<()> {
        if !self.write_about(article, edge, Utc::now()).await? {
            bail!("ABOUT edge {} -> {} not written: topic missing", edge.article_id, edge.topic_id);
        }
        Ok(())
    }

    async fn demote_about(
        &self,
        article_id: &str,
        topic_id: &str,
        scores: &ImportanceScores,
        tier: Tier,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        Ok(self.demote_about(article_id, topic_id, scores, tier, reason, at).await?)
    }

    async fn remove_about(&self, article_id: &str, topic_id: &str) -> Result<bool> {
        Ok(self.remove_about(article_id, topic_id).await?)
    }

    async fn hide_about(&self, article_id: &str, topic_id: &str) -> Result<()> {
        Ok(self.hide_about(article_id, topic_id).await?)
    }

    async fn lower_priority(&self, article_id: &str, topic_id: &str) -> Result<Option<u8>> {
        Ok(self.lower_priority(article_id, topic_id).await?)
    }
}

#[async_trait]
impl RelationshipStore for GraphWriter {
    async fn relationships_from(&self, source: &str, rel_type: RelationshipType) -> Result<Vec<RelationshipEdge>> {
        Ok(self.relationships_from(source, rel_type).await?)
    }

    async fn relationship_exists(&self, rel_type: RelationshipType, id: &str) -> Result<bool> {
        Ok(self.relationship_exists(rel_type, id).await?)
    }

    async fn upsert_relationship(&self, edge: &RelationshipEdge) -> Result<()> {
        Ok(self.upsert_relationship(edge).await?)
    }

    async fn delete_relationship(&self, rel_type: RelationshipType, id: &str) -> Result<()> {
        Ok(self.delete_relationship(rel_type, id).await?)
    }
}
