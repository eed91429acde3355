use chrono::{DateTime, Utc};
use neo4rs::query;
use tracing::warn;

use saga_common::{
    AboutEdge, AboutEntry, Article, ChangeReason, ImportanceScores, RelationshipEdge,
    RelationshipType, Tier, Timeframe, Topic, TopicAnalysis, DEFAULT_PRIORITY_RANK,
    MAX_PRIORITY_RANK, MIN_PRIORITY_RANK,
};

use crate::GraphClient;

/// Columns returned by every AboutEdge read. Paired with `row_about_entry`.
const ABOUT_COLUMNS: &str = "a.id AS article_id, a.summary AS summary, a.source AS source,
     a.published_at AS published_at, t.id AS topic_id,
     r.timeframe AS timeframe, r.risk AS risk, r.opportunity AS opportunity,
     r.trend AS trend, r.catalyst AS catalyst, r.tier AS tier,
     r.motivation AS motivation, r.implications AS implications,
     r.priority_rank AS priority_rank, r.hidden AS hidden, r.created_at AS created_at,
     r.downgraded_at AS downgraded_at, r.downgrade_reason AS downgrade_reason";

const TOPIC_COLUMNS: &str = "t.id AS id, t.name AS name, t.priority AS priority,
     t.timeframe_min AS timeframe_min, t.timeframe_max AS timeframe_max,
     t.last_queried AS last_queried, t.last_analyzed AS last_analyzed,
     t.queries AS queries, t.analysis_structural AS analysis_structural,
     t.analysis_medium AS analysis_medium, t.analysis_immediate AS analysis_immediate";

/// Result of the compare-and-set claim write. `id` is whatever the write echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRow {
    pub id: String,
    pub claimed: bool,
}

/// Write-side wrapper for the graph. All Cypher for topics, articles and edges lives here.
#[derive(Clone)]
pub struct GraphWriter {
    client: GraphClient,
}

impl GraphWriter {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    // --- Topics ---

    pub async fn list_topics(&self) -> Result<Vec<Topic>, neo4rs::Error> {
        let q = query(&format!("MATCH (t:Topic) RETURN {TOPIC_COLUMNS} ORDER BY t.id"));

        let mut topics = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            topics.push(row_topic(&row));
        }
        Ok(topics)
    }

    pub async fn get_topic(&self, id: &str) -> Result<Option<Topic>, neo4rs::Error> {
        let q = query(&format!("MATCH (t:Topic {{id: $id}}) RETURN {TOPIC_COLUMNS}")).param("id", id);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(Some(row_topic(&row)));
        }
        Ok(None)
    }

    pub async fn count_topics(&self) -> Result<u32, neo4rs::Error> {
        let q = query("MATCH (t:Topic) RETURN count(t) AS n");
        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(row.get::<i64>("n").unwrap_or(0).max(0) as u32);
        }
        Ok(0)
    }

    /// Atomic check-and-create. Returns false when a topic with this id already exists.
    pub async fn create_topic(&self, topic: &Topic, now: DateTime<Utc>) -> Result<bool, neo4rs::Error> {
        let q = query(
            "OPTIONAL MATCH (existing:Topic {id: $id})
             WITH existing WHERE existing IS NULL
             CREATE (t:Topic {
                id: $id,
                name: $name,
                priority: $priority,
                timeframe_min: CASE WHEN $timeframe_min < 0 THEN null ELSE $timeframe_min END,
                timeframe_max: CASE WHEN $timeframe_max < 0 THEN null ELSE $timeframe_max END,
                queries: 0,
                created_at: datetime($now)
             })
             RETURN t IS NOT NULL AS created",
        )
        .param("id", topic.id.as_str())
        .param("name", topic.name.as_str())
        .param("priority", topic.priority as i64)
        .param("timeframe_min", topic.timeframe_min.map(i64::from).unwrap_or(-1))
        .param("timeframe_max", topic.timeframe_max.map(i64::from).unwrap_or(-1))
        .param("now", format_datetime(&now));

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(row.get::<bool>("created").unwrap_or(false));
        }
        // No row: the WHERE filtered it out because the topic exists.
        Ok(false)
    }

    /// Compare-and-set `last_queried` from `expected` to `now`. Returns `None` when no
    /// topic row came back.
    pub async fn claim_topic(
        &self,
        id: &str,
        expected: Option<&DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimRow>, neo4rs::Error> {
        // The first SET takes the node write lock, so the comparison reads the latest
        // committed value and concurrent claimants serialize on it.
        let q = query(
            "MATCH (t:Topic {id: $id})
             SET t.claim_seq = coalesce(t.claim_seq, 0) + 1
             WITH t,
                  CASE WHEN $expected = ''
                       THEN t.last_queried IS NULL
                       ELSE t.last_queried = datetime($expected)
                  END AS matches
             SET t.last_queried = CASE WHEN matches THEN datetime($now) ELSE t.last_queried END
             RETURN t.id AS id, matches AS claimed",
        )
        .param("id", id)
        .param("expected", expected.map(format_datetime).unwrap_or_default())
        .param("now", format_datetime(&now));

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(Some(ClaimRow {
                id: row.get::<String>("id").unwrap_or_default(),
                claimed: row.get::<bool>("claimed").unwrap_or(false),
            }));
        }
        Ok(None)
    }

    pub async fn increment_queries(&self, id: &str) -> Result<(), neo4rs::Error> {
        self.client
            .graph
            .run(
                query("MATCH (t:Topic {id: $id}) SET t.queries = coalesce(t.queries, 0) + 1")
                    .param("id", id),
            )
            .await
    }

    /// Mark a topic's derived analysis as stale for the out-of-process rewriter.
    pub async fn flag_rewrite(
        &self,
        id: &str,
        reason: ChangeReason,
        at: DateTime<Utc>,
    ) -> Result<(), neo4rs::Error> {
        self.client
            .graph
            .run(
                query(
                    "MATCH (t:Topic {id: $id})
                     SET t.rewrite_requested_at = datetime($at), t.rewrite_reason = $reason",
                )
                .param("id", id)
                .param("at", format_datetime(&at))
                .param("reason", reason.to_string()),
            )
            .await
    }

    // --- About edges ---

    pub async fn about_edge(&self, article_id: &str, topic_id: &str) -> Result<Option<AboutEntry>, neo4rs::Error> {
        let q = query(&format!(
            "MATCH (a:Article {{id: $article_id}})-[r:ABOUT]->(t:Topic {{id: $topic_id}})
             RETURN {ABOUT_COLUMNS}"
        ))
        .param("article_id", article_id)
        .param("topic_id", topic_id);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(row_about_entry(&row));
        }
        Ok(None)
    }

    /// Visible edges of one topic/timeframe whose tier equals exactly `tier`.
    pub async fn tier_members(
        &self,
        topic_id: &str,
        timeframe: Timeframe,
        tier: Tier,
    ) -> Result<Vec<AboutEntry>, neo4rs::Error> {
        let q = query(&format!(
            "MATCH (a:Article)-[r:ABOUT]->(t:Topic {{id: $topic_id}})
             WHERE r.timeframe = $timeframe AND r.tier = $tier AND coalesce(r.hidden, false) = false
             RETURN {ABOUT_COLUMNS}
             ORDER BY r.created_at, a.id"
        ))
        .param("topic_id", topic_id)
        .param("timeframe", timeframe.as_str())
        .param("tier", tier.value() as i64);

        self.collect_about(q).await
    }

    /// Visible edges of one topic/timeframe, any tier.
    pub async fn timeframe_pool(&self, topic_id: &str, timeframe: Timeframe) -> Result<Vec<AboutEntry>, neo4rs::Error> {
        let q = query(&format!(
            "MATCH (a:Article)-[r:ABOUT]->(t:Topic {{id: $topic_id}})
             WHERE r.timeframe = $timeframe AND coalesce(r.hidden, false) = false
             RETURN {ABOUT_COLUMNS}
             ORDER BY a.published_at, a.id"
        ))
        .param("topic_id", topic_id)
        .param("timeframe", timeframe.as_str());

        self.collect_about(q).await
    }

    async fn collect_about(&self, q: neo4rs::Query) -> Result<Vec<AboutEntry>, neo4rs::Error> {
        let mut entries = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            if let Some(entry) = row_about_entry(&row) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// MERGE the Article and its (article, topic) edge in one statement. An existing
    /// article or edge is left untouched. Returns false when the topic is missing and
    /// nothing was written.
    pub async fn write_about(
        &self,
        article: &Article,
        edge: &AboutEdge,
        now: DateTime<Utc>,
    ) -> Result<bool, neo4rs::Error> {
        let q = query(
            "MERGE (a:Article {id: $article_id})
             ON CREATE SET
                a.summary = $summary,
                a.source = $source,
                a.published_at = CASE WHEN $published_at = '' THEN null ELSE datetime($published_at) END,
                a.created_at = datetime($now)
             WITH a
             MATCH (t:Topic {id: $topic_id})
             MERGE (a)-[r:ABOUT]->(t)
             ON CREATE SET
                r.timeframe = $timeframe,
                r.risk = $risk,
                r.opportunity = $opportunity,
                r.trend = $trend,
                r.catalyst = $catalyst,
                r.tier = $tier,
                r.motivation = $motivation,
                r.implications = $implications,
                r.priority_rank = $priority_rank,
                r.hidden = false,
                r.created_at = datetime($created_at)
             RETURN r.tier AS tier",
        )
        .param("article_id", edge.article_id.as_str())
        .param("summary", article.summary.as_str())
        .param("source", article.source.as_str())
        .param(
            "published_at",
            article.published_at.as_ref().map(format_datetime).unwrap_or_default(),
        )
        .param("now", format_datetime(&now))
        .param("topic_id", edge.topic_id.as_str())
        .param("timeframe", edge.timeframe.as_str())
        .param("risk", edge.scores.risk as i64)
        .param("opportunity", edge.scores.opportunity as i64)
        .param("trend", edge.scores.trend as i64)
        .param("catalyst", edge.scores.catalyst as i64)
        .param("tier", edge.tier.value() as i64)
        .param("motivation", edge.motivation.as_str())
        .param("implications", edge.implications.as_str())
        .param("priority_rank", edge.priority_rank as i64)
        .param("created_at", format_datetime(&edge.created_at));

        let mut stream = self.client.graph.execute(q).await?;
        Ok(stream.next().await?.is_some())
    }

    /// Lower an incumbent's tier in place, recording when and why.
    pub async fn demote_about(
        &self,
        article_id: &str,
        topic_id: &str,
        scores: &ImportanceScores,
        tier: Tier,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), neo4rs::Error> {
        let q = query(
            "MATCH (:Article {id: $article_id})-[r:ABOUT]->(:Topic {id: $topic_id})
             SET r.risk = $risk,
                 r.opportunity = $opportunity,
                 r.trend = $trend,
                 r.catalyst = $catalyst,
                 r.tier = $tier,
                 r.downgraded_at = datetime($at),
                 r.downgrade_reason = $reason",
        )
        .param("article_id", article_id)
        .param("topic_id", topic_id)
        .param("risk", scores.risk as i64)
        .param("opportunity", scores.opportunity as i64)
        .param("trend", scores.trend as i64)
        .param("catalyst", scores.catalyst as i64)
        .param("tier", tier.value() as i64)
        .param("reason", reason)
        .param("at", format_datetime(&at));

        self.client.graph.run(q).await
    }

    /// Delete the edge, then the Article if nothing else points from it.
    /// Returns whether the Article node was deleted.
    pub async fn remove_about(&self, article_id: &str, topic_id: &str) -> Result<bool, neo4rs::Error> {
        self.client
            .graph
            .run(
                query("MATCH (:Article {id: $article_id})-[r:ABOUT]->(:Topic {id: $topic_id}) DELETE r")
                    .param("article_id", article_id)
                    .param("topic_id", topic_id),
            )
            .await?;

        let q = query(
            "MATCH (a:Article {id: $article_id})
             WHERE NOT (a)-[:ABOUT]->(:Topic)
             DETACH DELETE a
             RETURN count(*) AS deleted",
        )
        .param("article_id", article_id);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(row.get::<i64>("deleted").unwrap_or(0) > 0);
        }
        Ok(false)
    }

    pub async fn hide_about(&self, article_id: &str, topic_id: &str) -> Result<(), neo4rs::Error> {
        self.client
            .graph
            .run(
                query("MATCH (:Article {id: $article_id})-[r:ABOUT]->(:Topic {id: $topic_id}) SET r.hidden = true")
                    .param("article_id", article_id)
                    .param("topic_id", topic_id),
            )
            .await
    }

    /// Decrement `priority_rank` with a floor. Returns the new rank, or `None` if the edge is gone.
    pub async fn lower_priority(&self, article_id: &str, topic_id: &str) -> Result<Option<u8>, neo4rs::Error> {
        let q = query(
            "MATCH (:Article {id: $article_id})-[r:ABOUT]->(:Topic {id: $topic_id})
             WITH r, coalesce(r.priority_rank, $default_rank) - 1 AS lowered
             SET r.priority_rank = CASE WHEN lowered < $floor THEN $floor ELSE lowered END
             RETURN r.priority_rank AS rank",
        )
        .param("article_id", article_id)
        .param("topic_id", topic_id)
        .param("default_rank", DEFAULT_PRIORITY_RANK as i64)
        .param("floor", MIN_PRIORITY_RANK as i64);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(Some(clamp_rank(row.get::<i64>("rank").ok())));
        }
        Ok(None)
    }

    // --- Relationship edges ---

    /// Outgoing edges of one type from `source`.
    pub async fn relationships_from(
        &self,
        source: &str,
        rel_type: RelationshipType,
    ) -> Result<Vec<RelationshipEdge>, neo4rs::Error> {
        // Labels can't be parameterized; rel_type is a closed enum.
        let q = query(&format!(
            "MATCH (s:Topic {{id: $source}})-[r:{label}]->(t:Topic)
             RETURN r.id AS id, s.id AS source, t.id AS target,
                    r.motivation AS motivation, r.created_at AS created_at
             ORDER BY r.created_at, r.id",
            label = rel_type.as_str()
        ))
        .param("source", source);

        let mut edges = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let id: String = row.get("id").unwrap_or_default();
            if id.is_empty() {
                warn!(source, rel_type = rel_type.as_str(), "Relationship edge without id, skipping");
                continue;
            }
            edges.push(RelationshipEdge {
                id,
                rel_type,
                source: row.get("source").unwrap_or_default(),
                target: row.get("target").unwrap_or_default(),
                motivation: row.get("motivation").unwrap_or_default(),
                created_at: row_datetime_opt(&row, "created_at").unwrap_or_else(Utc::now),
            });
        }
        Ok(edges)
    }

    /// Whether an edge with this id exists in either direction.
    pub async fn relationship_exists(&self, rel_type: RelationshipType, id: &str) -> Result<bool, neo4rs::Error> {
        let q = query(&format!(
            "OPTIONAL MATCH (:Topic)-[r:{label} {{id: $id}}]->(:Topic)
             RETURN r IS NOT NULL AS found",
            label = rel_type.as_str()
        ))
        .param("id", id);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            return Ok(row.get::<bool>("found").unwrap_or(false));
        }
        Ok(false)
    }

    pub async fn upsert_relationship(&self, edge: &RelationshipEdge) -> Result<(), neo4rs::Error> {
        let q = query(&format!(
            "MATCH (s:Topic {{id: $source}}), (t:Topic {{id: $target}})
             MERGE (s)-[r:{label} {{id: $id}}]->(t)
             ON CREATE SET r.motivation = $motivation, r.created_at = datetime($created_at)
             ON MATCH SET r.motivation = $motivation",
            label = edge.rel_type.as_str()
        ))
        .param("id", edge.id.as_str())
        .param("source", edge.source.as_str())
        .param("target", edge.target.as_str())
        .param("motivation", edge.motivation.as_str())
        .param("created_at", format_datetime(&edge.created_at));

        self.client.graph.run(q).await
    }

    pub async fn delete_relationship(&self, rel_type: RelationshipType, id: &str) -> Result<(), neo4rs::Error> {
        let q = query(&format!(
            "MATCH (:Topic)-[r:{label} {{id: $id}}]->(:Topic) DELETE r",
            label = rel_type.as_str()
        ))
        .param("id", id);

        self.client.graph.run(q).await
    }
}

// --- Row mapping ---

fn row_topic(row: &neo4rs::Row) -> Topic {
    Topic {
        id: row.get("id").unwrap_or_default(),
        name: row.get("name").unwrap_or_default(),
        priority: row.get::<i64>("priority").unwrap_or(0).clamp(0, u8::MAX as i64) as u8,
        timeframe_min: row_u32_opt(row, "timeframe_min"),
        timeframe_max: row_u32_opt(row, "timeframe_max"),
        last_queried: row_datetime_opt(row, "last_queried"),
        last_analyzed: row_datetime_opt(row, "last_analyzed"),
        queries: row_u32_opt(row, "queries").unwrap_or(0),
        analysis: TopicAnalysis {
            structural: row.get::<String>("analysis_structural").ok(),
            medium: row.get::<String>("analysis_medium").ok(),
            immediate: row.get::<String>("analysis_immediate").ok(),
        },
    }
}

fn row_about_entry(row: &neo4rs::Row) -> Option<AboutEntry> {
    let article_id: String = row.get("article_id").unwrap_or_default();
    let timeframe_str: String = row.get("timeframe").unwrap_or_default();
    let timeframe = match timeframe_str.parse::<Timeframe>() {
        Ok(tf) => tf,
        Err(_) => {
            warn!(article_id = article_id.as_str(), timeframe = timeframe_str.as_str(), "Unknown timeframe on ABOUT edge, skipping");
            return None;
        }
    };

    let scores = ImportanceScores::from_raw(
        row.get::<i64>("risk").unwrap_or(0),
        row.get::<i64>("opportunity").unwrap_or(0),
        row.get::<i64>("trend").unwrap_or(0),
        row.get::<i64>("catalyst").unwrap_or(0),
    );
    let scores = match scores {
        Ok(s) => s,
        Err(e) => {
            warn!(article_id = article_id.as_str(), error = %e, "Out-of-range scores on ABOUT edge, skipping");
            return None;
        }
    };
    let tier = row
        .get::<i64>("tier")
        .ok()
        .and_then(|t| u8::try_from(t).ok())
        .and_then(Tier::new)
        .unwrap_or_else(|| scores.tier());

    let article = Article {
        id: article_id.clone(),
        summary: row.get("summary").unwrap_or_default(),
        source: row.get("source").unwrap_or_default(),
        published_at: row_datetime_opt(row, "published_at"),
    };

    let edge = AboutEdge {
        article_id,
        topic_id: row.get("topic_id").unwrap_or_default(),
        timeframe,
        scores,
        tier,
        motivation: row.get("motivation").unwrap_or_default(),
        implications: row.get("implications").unwrap_or_default(),
        priority_rank: clamp_rank(row.get::<i64>("priority_rank").ok()),
        hidden: row.get::<bool>("hidden").unwrap_or(false),
        created_at: row_datetime_opt(row, "created_at").unwrap_or_else(Utc::now),
        downgraded_at: row_datetime_opt(row, "downgraded_at"),
        downgrade_reason: row.get::<String>("downgrade_reason").ok(),
    };

    Some(AboutEntry { article, edge })
}

fn clamp_rank(rank: Option<i64>) -> u8 {
    rank.map(|r| r.clamp(MIN_PRIORITY_RANK as i64, MAX_PRIORITY_RANK as i64) as u8)
        .unwrap_or(DEFAULT_PRIORITY_RANK)
}

fn row_u32_opt(row: &neo4rs::Row, key: &str) -> Option<u32> {
    row.get::<i64>(key).ok().and_then(|v| u32::try_from(v).ok())
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn parse_datetime_opt(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .ok()
}

/// Read an optional datetime from a row, accepting Neo4j DateTime, LocalDateTime or string values.
fn row_datetime_opt(row: &neo4rs::Row, key: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = row.get::<chrono::DateTime<chrono::FixedOffset>>(key) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = row.get::<chrono::NaiveDateTime>(key) {
        return Some(ndt.and_utc());
    }
    row.get::<String>(key).ok().and_then(|s| parse_datetime_opt(&s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn datetime_format_round_trips_at_microsecond_precision() {
        let dt = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 15).unwrap()
            + chrono::Duration::microseconds(123_456);
        let s = format_datetime(&dt);
        assert_eq!(s, "2026-03-01T12:30:15.123456");
        assert_eq!(parse_datetime_opt(&s), Some(dt));
    }

    #[test]
    fn empty_string_is_no_datetime() {
        assert_eq!(parse_datetime_opt(""), None);
    }

    #[test]
    fn missing_or_wild_rank_is_normalized() {
        assert_eq!(clamp_rank(None), DEFAULT_PRIORITY_RANK);
        assert_eq!(clamp_rank(Some(0)), MIN_PRIORITY_RANK);
        assert_eq!(clamp_rank(Some(9)), MAX_PRIORITY_RANK);
        assert_eq!(clamp_rank(Some(2)), 2);
    }
}
