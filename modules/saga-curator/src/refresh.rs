use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use saga_common::{Article, SagaError, SchedulerConfig, Topic};

use crate::ingest::{IngestOutcome, Ingestor};
use crate::linker::{LinkOutcome, RelationshipManager};
use crate::replacement::ReplacementOutcome;
use crate::traits::{ContentSource, GraphStore};

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub topic_id: String,
    pub fetched: u32,
    pub admitted: u32,
    pub already_admitted: u32,
    pub rejected: u32,
    pub skipped: u32,
    pub failed: u32,
    pub replacements: u32,
    pub link: Option<LinkOutcome>,
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Refresh {}: fetched={} admitted={} already={} rejected={} skipped={} failed={} replacements={}",
            self.topic_id,
            self.fetched,
            self.admitted,
            self.already_admitted,
            self.rejected,
            self.skipped,
            self.failed,
            self.replacements,
        )?;
        match &self.link {
            Some(LinkOutcome::Added(e)) => write!(f, " link=added:{}", e.id),
            Some(LinkOutcome::Replaced { added, removed }) => write!(f, " link=replaced:{}->{}", removed.id, added.id),
            Some(LinkOutcome::Skipped(reason)) => write!(f, " link=skipped:{reason}"),
            None => Ok(()),
        }
    }
}

/// Worker job for a claimed topic.
pub struct RefreshJob {
    graph: Arc<dyn GraphStore>,
    source: Arc<dyn ContentSource>,
    ingestor: Arc<Ingestor>,
    linker: Arc<RelationshipManager>,
    config: SchedulerConfig,
}

impl RefreshJob {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        source: Arc<dyn ContentSource>,
        ingestor: Arc<Ingestor>,
        linker: Arc<RelationshipManager>,
        config: SchedulerConfig,
    ) -> Self {
        Self { graph, source, ingestor, linker, config }
    }

    /// Pull new articles, ingest each, link once if anything landed, then count the query.
    /// Per-article failures are logged and counted; they do not stop the refresh. Articles
    /// that failed on infrastructure are handed back to the source for a later refresh.
    pub async fn run(&self, topic: &Topic) -> Result<RefreshReport, SagaError> {
        let limit = self.config.articles_for_priority(topic.priority)?;
        let articles = self.source.fetch(topic, limit).await?;
        let mut report = RefreshReport {
            topic_id: topic.id.clone(),
            fetched: articles.len() as u32,
            ..Default::default()
        };
        info!(topic_id = topic.id.as_str(), fetched = report.fetched, limit, "Refreshing topic");

        let mut retry = Vec::new();
        let mut pending = articles.into_iter();
        while let Some(article) = pending.next() {
            match self.ingestor.ingest(topic, article.clone()).await {
                Ok(IngestOutcome::Admitted { replacement, .. }) => {
                    report.admitted += 1;
                    if let ReplacementOutcome::Applied { actions, .. } = replacement {
                        report.replacements += actions.len() as u32;
                    }
                }
                Ok(IngestOutcome::AlreadyAdmitted(_)) => report.already_admitted += 1,
                Ok(IngestOutcome::Rejected(_)) => report.rejected += 1,
                Ok(IngestOutcome::Skipped(_)) => report.skipped += 1,
                Err(e) if e.is_fatal() => {
                    retry.push(article);
                    retry.extend(pending);
                    self.requeue(topic, &retry).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(topic_id = topic.id.as_str(), article_id = article.id.as_str(), error = %e, "Ingest failed");
                    report.failed += 1;
                    // A rejected oracle answer would fail again; only outages are retried.
                    if !matches!(e, SagaError::Validation(_)) {
                        retry.push(article);
                    }
                }
            }
        }
        self.requeue(topic, &retry).await;

        if report.admitted > 0 {
            match self.linker.link(&topic.id).await {
                Ok(outcome) => report.link = Some(outcome),
                Err(e) => warn!(topic_id = topic.id.as_str(), error = %e, "Linking failed"),
            }
        }

        self.graph.increment_queries(&topic.id).await?;
        Ok(report)
    }

    async fn requeue(&self, topic: &Topic, articles: &[Article]) {
        if articles.is_empty() {
            return;
        }
        if let Err(e) = self.source.requeue(topic, articles).await {
            warn!(topic_id = topic.id.as_str(), count = articles.len(), error = %e, "Requeue failed, articles dropped");
        }
    }
}
