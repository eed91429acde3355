use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use saga_common::{
    AboutEntry, Article, Classification, OracleConfig, RelationshipEdge, RelationshipType, Tier,
    Timeframe, Topic,
};

use crate::decisions::*;
use crate::error::OracleError;
use crate::prompts::{self, Contender};
use crate::schema::StructuredOutput;
use crate::traits::{DecisionKind, DecisionOracle, OracleRequest};

/// The validating boundary around a `DecisionOracle`. Every call runs under a timeout,
/// is retried up to `max_attempts`, and comes back as a typed decision whose ids have
/// been checked against what the oracle was shown.
#[derive(Clone)]
pub struct Oracle {
    backend: Arc<dyn DecisionOracle>,
    timeout: Duration,
    max_attempts: u32,
    max_items: usize,
}

impl Oracle {
    pub fn new(backend: Arc<dyn DecisionOracle>, config: &OracleConfig) -> Self {
        Self {
            backend,
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts.max(1),
            max_items: 50,
        }
    }

    /// Cap on items rendered into a single prompt. Items past the cap are not offered and
    /// so can never be named.
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn ask<T, V>(
        &self,
        kind: DecisionKind,
        system: &str,
        prompt: String,
        context: serde_json::Value,
        resolve: impl Fn(T) -> Result<V, OracleError>,
    ) -> Result<V, OracleError>
    where
        T: StructuredOutput,
    {
        let request = OracleRequest {
            kind,
            system: system.to_string(),
            prompt,
            schema: T::tool_schema(),
            context,
        };

        let mut last_error = OracleError::Unavailable("no attempt made".to_string());
        for attempt in 1..=self.max_attempts {
            let outcome = match tokio::time::timeout(self.timeout, self.backend.decide(&request)).await {
                Err(_) => Err(OracleError::Timeout(self.timeout)),
                Ok(Err(e)) => Err(e),
                Ok(Ok(raw)) => serde_json::from_value::<T>(raw)
                    .map_err(OracleError::from)
                    .and_then(&resolve),
            };
            match outcome {
                Ok(value) => {
                    debug!(%kind, attempt, "Oracle decision accepted");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(%kind, attempt, max_attempts = self.max_attempts, error = %e, "Oracle attempt failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    pub async fn classify(&self, topic: &Topic, article: &Article) -> Result<Classification, OracleError> {
        let context = json!({ "topic_id": topic.id, "article_id": article.id });
        self.ask::<ClassificationOutput, _>(
            DecisionKind::Classify,
            prompts::CLASSIFY_SYSTEM,
            prompts::classify(topic, article),
            context,
            ClassificationOutput::validate,
        )
        .await
    }

    /// Ask how to resolve a full tier. `incumbents` beyond `max_items` are not offered.
    pub async fn resolve_tier_conflict(
        &self,
        topic: &Topic,
        timeframe: Timeframe,
        tier: Tier,
        limit: u32,
        contender: &Contender<'_>,
        incumbents: &[AboutEntry],
    ) -> Result<TierDecision, OracleError> {
        let shown = &incumbents[..incumbents.len().min(self.max_items)];
        let allowed = article_ids(shown);
        let context = json!({
            "topic_id": topic.id,
            "timeframe": timeframe,
            "tier": tier.value(),
            "limit": limit,
            "new_article_id": contender.article.id,
            "existing_ids": sorted(&allowed),
        });
        self.ask::<TierConflictOutput, _>(
            DecisionKind::TierConflict,
            prompts::TIER_CONFLICT_SYSTEM,
            prompts::tier_conflict(topic, timeframe, tier, limit, contender, shown),
            context,
            |out| Ok(out.resolve(tier, &allowed)),
        )
        .await
    }

    pub async fn choose_replacement(
        &self,
        topic: &Topic,
        timeframe: Timeframe,
        mode: ReplacementMode,
        incoming: &AboutEntry,
        pool: &[AboutEntry],
    ) -> Result<ReplacementDecision, OracleError> {
        let shown = &pool[..pool.len().min(self.max_items)];
        let allowed = article_ids(shown);
        let context = json!({
            "topic_id": topic.id,
            "timeframe": timeframe,
            "mode": mode,
            "new_article_id": incoming.article.id,
            "pool_ids": sorted(&allowed),
        });
        self.ask::<ReplacementOutput, _>(
            DecisionKind::Replacement,
            prompts::REPLACEMENT_SYSTEM,
            prompts::replacement(topic, timeframe, mode, incoming, shown),
            context,
            |out| Ok(out.resolve(&allowed)),
        )
        .await
    }

    pub async fn shortlist(&self, source: &Topic, candidates: &[Topic]) -> Result<Vec<String>, OracleError> {
        let shown = &candidates[..candidates.len().min(self.max_items)];
        let allowed: HashSet<String> = shown.iter().map(|t| t.id.clone()).collect();
        let context = json!({ "source_id": source.id, "candidate_ids": sorted(&allowed) });
        self.ask::<ShortlistOutput, _>(
            DecisionKind::Shortlist,
            prompts::SHORTLIST_SYSTEM,
            prompts::shortlist(source, shown),
            context,
            |out| Ok(out.resolve(&allowed)),
        )
        .await
    }

    pub async fn propose_edge(
        &self,
        source: &Topic,
        shortlist: &[Topic],
        existing: &[RelationshipEdge],
    ) -> Result<ProposalDecision, OracleError> {
        let allowed: HashSet<String> = shortlist.iter().map(|t| t.id.clone()).collect();
        let context = json!({
            "source_id": source.id,
            "shortlist_ids": sorted(&allowed),
            "existing_edge_ids": existing.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        });
        self.ask::<EdgeProposalOutput, _>(
            DecisionKind::ProposeEdge,
            prompts::PROPOSE_EDGE_SYSTEM,
            prompts::propose_edge(source, shortlist, existing),
            context,
            |out| Ok(out.resolve(&source.id, &allowed)),
        )
        .await
    }

    /// Nominate an existing edge of `rel_type` to drop for `proposal`. `None` keeps them all.
    pub async fn weakest_edge(
        &self,
        source: &Topic,
        rel_type: RelationshipType,
        existing: &[RelationshipEdge],
        proposal: &EdgeProposal,
    ) -> Result<Option<String>, OracleError> {
        let allowed: HashSet<String> = existing.iter().map(|e| e.id.clone()).collect();
        let context = json!({
            "source_id": source.id,
            "rel_type": rel_type,
            "proposed_target": proposal.target,
            "existing_edge_ids": sorted(&allowed),
        });
        self.ask::<WeakestEdgeOutput, _>(
            DecisionKind::WeakestEdge,
            prompts::WEAKEST_EDGE_SYSTEM,
            prompts::weakest_edge(source, rel_type, existing, &proposal.target, &proposal.motivation),
            context,
            |out| Ok(out.resolve(&allowed)),
        )
        .await
    }

    pub async fn topic_capacity(
        &self,
        proposed: &Topic,
        existing: &[Topic],
        max_topics: u32,
    ) -> Result<TopicCapacityAction, OracleError> {
        let context = json!({
            "proposed_id": proposed.id,
            "topic_count": existing.len(),
            "max_topics": max_topics,
        });
        self.ask::<TopicCapacityOutput, _>(
            DecisionKind::TopicCapacity,
            prompts::TOPIC_CAPACITY_SYSTEM,
            prompts::topic_capacity(proposed, existing, max_topics),
            context,
            |out| Ok(out.action),
        )
        .await
    }
}

fn article_ids(entries: &[AboutEntry]) -> HashSet<String> {
    entries.iter().map(|e| e.article.id.clone()).collect()
}

fn sorted(ids: &HashSet<String>) -> Vec<&str> {
    let mut v: Vec<&str> = ids.iter().map(String::as_str).collect();
    v.sort_unstable();
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Canned {
        replies: Mutex<VecDeque<Result<serde_json::Value, OracleError>>>,
        calls: Mutex<u32>,
    }

    impl Canned {
        fn new(replies: Vec<Result<serde_json::Value, OracleError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), calls: Mutex::new(0) })
        }
        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl DecisionOracle for Canned {
        async fn decide(&self, _request: &OracleRequest) -> Result<serde_json::Value, OracleError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(OracleError::Unavailable("exhausted".into())))
        }
    }

    struct Hangs;

    #[async_trait]
    impl DecisionOracle for Hangs {
        async fn decide(&self, _request: &OracleRequest) -> Result<serde_json::Value, OracleError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({}))
        }
    }

    fn topic() -> Topic {
        Topic::new("eurusd", "EUR/USD", 1)
    }

    fn article() -> Article {
        Article { id: "a1".into(), summary: "ECB holds".into(), source: "wire".into(), published_at: None }
    }

    fn classification_json(risk: i64) -> serde_json::Value {
        json!({
            "timeframe": "immediate", "risk": risk, "opportunity": 0, "trend": 1,
            "catalyst": 0, "motivation": "rates", "implications": "euro weaker"
        })
    }

    #[tokio::test]
    async fn invalid_output_is_retried_once() {
        let backend = Canned::new(vec![Ok(classification_json(4)), Ok(classification_json(2))]);
        let oracle = Oracle::new(backend.clone(), &OracleConfig::default());

        let c = oracle.classify(&topic(), &article()).await.unwrap();
        assert_eq!(c.scores.risk, 2);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn persistent_invalid_output_surfaces() {
        let backend = Canned::new(vec![Ok(classification_json(4)), Ok(classification_json(4)), Ok(classification_json(1))]);
        let oracle = Oracle::new(backend.clone(), &OracleConfig::default());

        let err = oracle.classify(&topic(), &article()).await.unwrap_err();
        assert!(matches!(err, OracleError::Invalid(_)));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let config = OracleConfig { timeout_secs: 1, max_attempts: 2, ..Default::default() };
        let oracle = Oracle::new(Arc::new(Hangs), &config).with_timeout(Duration::from_millis(20));

        let err = oracle.classify(&topic(), &article()).await.unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
    }

    #[tokio::test]
    async fn topic_capacity_action_parses() {
        let backend = Canned::new(vec![Ok(json!({ "action": "reject", "rationale": "overlaps dxy" }))]);
        let oracle = Oracle::new(backend, &OracleConfig::default());

        let action = oracle.topic_capacity(&topic(), &[], 100).await.unwrap();
        assert_eq!(action, TopicCapacityAction::Reject);
    }
}
