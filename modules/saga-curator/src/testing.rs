// In-memory fakes for the curator's seams.
//
// - MemoryGraph (TopicStore + CapacityRepository + RelationshipStore): stateful graph
// - ScriptedOracle (DecisionOracle): per-kind queued answers, records every request
// - RecordingSink (ChangeSink): captures change notifications
// - MemorySource (ContentSource): per-topic article queues
//
// Plus helpers for building articles, classifications and seeded AboutEdges.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use saga_common::{
    AboutEdge, AboutEntry, Article, ChangeReason, Classification, ImportanceScores,
    RelationshipEdge, RelationshipType, Tier, Timeframe, Topic, MIN_PRIORITY_RANK,
};
use saga_graph::ClaimRow;
use saga_oracle::{DecisionKind, DecisionOracle, OracleError, OracleRequest};

use crate::notify::{ChangeSink, TopicChanged};
use crate::traits::{CapacityRepository, ContentSource, RelationshipStore, TopicStore};

// ---------------------------------------------------------------------------
// MemoryGraph
// ---------------------------------------------------------------------------

/// Stateful in-memory graph. Claims are a real compare-and-set under the mutex.
pub struct MemoryGraph {
    inner: Mutex<MemoryGraphInner>,
}

#[derive(Default)]
struct MemoryGraphInner {
    topics: BTreeMap<String, Topic>,
    articles: BTreeMap<String, Article>,
    /// Keyed by (topic_id, article_id).
    about: BTreeMap<(String, String), AboutEdge>,
    relationships: BTreeMap<String, RelationshipEdge>,
    rewrites: Vec<(String, ChangeReason)>,
    claim_echo: Option<String>,
    drop_claim_rows: bool,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self { inner: Mutex::new(MemoryGraphInner::default()) }
    }

    pub fn with_topic(self, topic: Topic) -> Self {
        self.inner.lock().unwrap().topics.insert(topic.id.clone(), topic);
        self
    }

    pub fn with_entry(self, entry: AboutEntry) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let key = (entry.edge.topic_id.clone(), entry.article.id.clone());
            inner.articles.insert(entry.article.id.clone(), entry.article);
            inner.about.insert(key, entry.edge);
        }
        self
    }

    pub fn with_relationship(self, edge: RelationshipEdge) -> Self {
        self.inner.lock().unwrap().relationships.insert(edge.id.clone(), edge);
        self
    }

    /// Make every claim echo `id` instead of the claimed topic's id.
    pub fn with_claim_echo(self, id: &str) -> Self {
        self.inner.lock().unwrap().claim_echo = Some(id.to_string());
        self
    }

    /// Make every claim return no row.
    pub fn with_missing_claim_rows(self) -> Self {
        self.inner.lock().unwrap().drop_claim_rows = true;
        self
    }

    pub fn topic(&self, id: &str) -> Option<Topic> {
        self.inner.lock().unwrap().topics.get(id).cloned()
    }

    /// Every AboutEdge of the topic, hidden included, ordered by article id.
    pub fn about_edges(&self, topic_id: &str) -> Vec<AboutEdge> {
        self.inner
            .lock()
            .unwrap()
            .about
            .iter()
            .filter(|((t, _), _)| t == topic_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn edge(&self, topic_id: &str, article_id: &str) -> Option<AboutEdge> {
        self.inner
            .lock()
            .unwrap()
            .about
            .get(&(topic_id.to_string(), article_id.to_string()))
            .cloned()
    }

    /// Sorted article ids of visible edges at exactly `tier`.
    pub fn tier_ids(&self, topic_id: &str, timeframe: Timeframe, tier: u8) -> Vec<String> {
        self.about_edges(topic_id)
            .into_iter()
            .filter(|e| !e.hidden && e.timeframe == timeframe && e.tier.value() == tier)
            .map(|e| e.article_id)
            .collect()
    }

    pub fn visible_count(&self, topic_id: &str, timeframe: Timeframe) -> usize {
        self.about_edges(topic_id)
            .iter()
            .filter(|e| !e.hidden && e.timeframe == timeframe)
            .count()
    }

    pub fn has_article(&self, id: &str) -> bool {
        self.inner.lock().unwrap().articles.contains_key(id)
    }

    pub fn relationships(&self, source: &str) -> Vec<RelationshipEdge> {
        self.inner
            .lock()
            .unwrap()
            .relationships
            .values()
            .filter(|e| e.source == source)
            .cloned()
            .collect()
    }

    pub fn rewrite_flags(&self) -> Vec<(String, ChangeReason)> {
        self.inner.lock().unwrap().rewrites.clone()
    }

    fn entries(&self, topic_id: &str, keep: impl Fn(&AboutEdge) -> bool) -> Vec<AboutEntry> {
        let inner = self.inner.lock().unwrap();
        inner
            .about
            .iter()
            .filter(|((t, _), e)| t == topic_id && keep(e))
            .filter_map(|((_, a), e)| {
                inner.articles.get(a).map(|article| AboutEntry {
                    article: article.clone(),
                    edge: e.clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl TopicStore for MemoryGraph {
    async fn list_topics(&self) -> Result<Vec<Topic>> {
        Ok(self.inner.lock().unwrap().topics.values().cloned().collect())
    }

    async fn get_topic(&self, id: &str) -> Result<Option<Topic>> {
        Ok(self.topic(id))
    }

    async fn count_topics(&self) -> Result<u32> {
        Ok(self.inner.lock().unwrap().topics.len() as u32)
    }

    async fn create_topic(&self, topic: &Topic) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.topics.contains_key(&topic.id) {
            return Ok(false);
        }
        inner.topics.insert(topic.id.clone(), topic.clone());
        Ok(true)
    }

    async fn claim_topic(
        &self,
        id: &str,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimRow>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.drop_claim_rows {
            return Ok(None);
        }
        let echo = inner.claim_echo.clone();
        let Some(topic) = inner.topics.get_mut(id) else {
            return Ok(None);
        };
        let claimed = topic.last_queried == expected;
        if claimed {
            topic.last_queried = Some(now);
        }
        Ok(Some(ClaimRow {
            id: echo.unwrap_or_else(|| id.to_string()),
            claimed,
        }))
    }

    async fn increment_queries(&self, id: &str) -> Result<()> {
        if let Some(t) = self.inner.lock().unwrap().topics.get_mut(id) {
            t.queries += 1;
        }
        Ok(())
    }

    async fn flag_rewrite(&self, id: &str, reason: ChangeReason, _at: DateTime<Utc>) -> Result<()> {
        self.inner.lock().unwrap().rewrites.push((id.to_string(), reason));
        Ok(())
    }
}

#[async_trait]
impl CapacityRepository for MemoryGraph {
    async fn tier_members(&self, topic_id: &str, timeframe: Timeframe, tier: Tier) -> Result<Vec<AboutEntry>> {
        Ok(self.entries(topic_id, |e| !e.hidden && e.timeframe == timeframe && e.tier == tier))
    }

    async fn timeframe_pool(&self, topic_id: &str, timeframe: Timeframe) -> Result<Vec<AboutEntry>> {
        Ok(self.entries(topic_id, |e| !e.hidden && e.timeframe == timeframe))
    }

    async fn about_edge(&self, article_id: &str, topic_id: &str) -> Result<Option<AboutEntry>> {
        Ok(self
            .entries(topic_id, |e| e.article_id == article_id)
            .into_iter()
            .next())
    }

    async fn write_about(&self, article: &Article, edge: &AboutEdge) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.topics.contains_key(&edge.topic_id) {
            bail!("ABOUT edge {} -> {} not written: topic missing", edge.article_id, edge.topic_id);
        }
        inner
            .articles
            .entry(article.id.clone())
            .or_insert_with(|| article.clone());
        inner
            .about
            .entry((edge.topic_id.clone(), edge.article_id.clone()))
            .or_insert_with(|| edge.clone());
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
        let mut inner = self.inner.lock().unwrap();
        if let Some(e) = inner.about.get_mut(&(topic_id.to_string(), article_id.to_string())) {
            e.scores = *scores;
            e.tier = tier;
            e.downgraded_at = Some(at);
            e.downgrade_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn remove_about(&self, article_id: &str, topic_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.about.remove(&(topic_id.to_string(), article_id.to_string()));
        let orphaned = !inner.about.keys().any(|(_, a)| a == article_id);
        if orphaned {
            inner.articles.remove(article_id);
        }
        Ok(orphaned)
    }

    async fn hide_about(&self, article_id: &str, topic_id: &str) -> Result<()> {
        if let Some(e) = self
            .inner
            .lock()
            .unwrap()
            .about
            .get_mut(&(topic_id.to_string(), article_id.to_string()))
        {
            e.hidden = true;
        }
        Ok(())
    }

    async fn lower_priority(&self, article_id: &str, topic_id: &str) -> Result<Option<u8>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .about
            .get_mut(&(topic_id.to_string(), article_id.to_string()))
            .map(|e| {
                e.priority_rank = e.priority_rank.saturating_sub(1).max(MIN_PRIORITY_RANK);
                e.priority_rank
            }))
    }
}

#[async_trait]
impl RelationshipStore for MemoryGraph {
    async fn relationships_from(&self, source: &str, rel_type: RelationshipType) -> Result<Vec<RelationshipEdge>> {
        Ok(self
            .relationships(source)
            .into_iter()
            .filter(|e| e.rel_type == rel_type)
            .collect())
    }

    async fn relationship_exists(&self, rel_type: RelationshipType, id: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .relationships
            .get(id)
            .is_some_and(|e| e.rel_type == rel_type))
    }

    async fn upsert_relationship(&self, edge: &RelationshipEdge) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .relationships
            .entry(edge.id.clone())
            .or_insert_with(|| edge.clone());
        Ok(())
    }

    async fn delete_relationship(&self, _rel_type: RelationshipType, id: &str) -> Result<()> {
        self.inner.lock().unwrap().relationships.remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedOracle
// ---------------------------------------------------------------------------

/// Answers from per-kind queues, then from per-kind `always` answers, else fails as
/// unavailable. Builder pattern: `.on()`, `.on_error()`, `.always()`.
pub struct ScriptedOracle {
    inner: Mutex<ScriptedInner>,
}

#[derive(Default)]
struct ScriptedInner {
    queued: HashMap<DecisionKind, VecDeque<Result<Value, OracleError>>>,
    always: HashMap<DecisionKind, Value>,
    calls: Vec<OracleRequest>,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self { inner: Mutex::new(ScriptedInner::default()) }
    }

    pub fn on(self, kind: DecisionKind, answer: Value) -> Self {
        self.inner.lock().unwrap().queued.entry(kind).or_default().push_back(Ok(answer));
        self
    }

    pub fn on_error(self, kind: DecisionKind, error: OracleError) -> Self {
        self.inner.lock().unwrap().queued.entry(kind).or_default().push_back(Err(error));
        self
    }

    pub fn always(self, kind: DecisionKind, answer: Value) -> Self {
        self.inner.lock().unwrap().always.insert(kind, answer);
        self
    }

    pub fn call_count(&self, kind: DecisionKind) -> usize {
        self.inner.lock().unwrap().calls.iter().filter(|r| r.kind == kind).count()
    }

    pub fn total_calls(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    pub fn calls(&self, kind: DecisionKind) -> Vec<OracleRequest> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(request.clone());
        if let Some(answer) = inner.queued.get_mut(&request.kind).and_then(|q| q.pop_front()) {
            return answer;
        }
        inner
            .always
            .get(&request.kind)
            .cloned()
            .ok_or_else(|| OracleError::Unavailable(format!("no scripted answer for {}", request.kind)))
    }
}

// ---------------------------------------------------------------------------
// RecordingSink / MemorySource
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TopicChanged>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reasons(&self) -> Vec<(String, ChangeReason)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.topic_id.clone(), e.reason))
            .collect()
    }
}

#[async_trait]
impl ChangeSink for RecordingSink {
    async fn topic_changed(&self, event: &TopicChanged) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySource {
    queues: Mutex<HashMap<String, VecDeque<Article>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(self, topic_id: &str, articles: Vec<Article>) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(topic_id.to_string())
            .or_default()
            .extend(articles);
        self
    }

    /// Ids still waiting to be fetched for the topic, in fetch order.
    pub fn pending(&self, topic_id: &str) -> Vec<String> {
        self.queues
            .lock()
            .unwrap()
            .get(topic_id)
            .map(|q| q.iter().map(|a| a.id.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    async fn fetch(&self, topic: &Topic, limit: usize) -> Result<Vec<Article>> {
        let mut queues = self.queues.lock().unwrap();
        let Some(queue) = queues.get_mut(&topic.id) else {
            return Ok(Vec::new());
        };
        let n = limit.min(queue.len());
        Ok(queue.drain(..n).collect())
    }

    async fn requeue(&self, topic: &Topic, articles: &[Article]) -> Result<()> {
        self.queues
            .lock()
            .unwrap()
            .entry(topic.id.clone())
            .or_default()
            .extend(articles.iter().cloned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

pub fn article(id: &str, hours_ago: i64) -> Article {
    Article {
        id: id.to_string(),
        summary: format!("summary of {id}"),
        source: "wire".to_string(),
        published_at: Some(Utc::now() - Duration::hours(hours_ago)),
    }
}

pub fn classification(timeframe: Timeframe, scores: [u8; 4]) -> Classification {
    Classification {
        timeframe,
        scores: ImportanceScores {
            risk: scores[0],
            opportunity: scores[1],
            trend: scores[2],
            catalyst: scores[3],
        },
        motivation: "test motivation".to_string(),
        implications: "test implications".to_string(),
    }
}

/// Raw oracle answer for a classification request.
pub fn classification_json(timeframe: &str, scores: [i64; 4]) -> Value {
    json!({
        "timeframe": timeframe,
        "risk": scores[0],
        "opportunity": scores[1],
        "trend": scores[2],
        "catalyst": scores[3],
        "motivation": "test motivation",
        "implications": "test implications",
    })
}

/// A stored article at `tier` (risk score = tier) with the default rank for that tier.
pub fn seeded_entry(topic_id: &str, article_id: &str, timeframe: Timeframe, tier: u8, hours_ago: i64) -> AboutEntry {
    let c = classification(timeframe, [tier, 0, 0, 0]);
    let tier = Tier::new(tier).unwrap_or(Tier::ARCHIVE);
    let edge = AboutEdge::admitted(article_id, topic_id, &c, tier, Utc::now() - Duration::hours(hours_ago));
    AboutEntry {
        article: article(article_id, hours_ago),
        edge,
    }
}
