//! SLA scheduler: pick the most overdue topic, claim it with a compare-and-set on
//! `last_queried`, and hand it to the worker pool.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};

use saga_common::{SagaError, SchedulerConfig, Topic, VERY_OVERDUE_SECS};

use crate::audit::{AuditAction, AuditRecord};
use crate::refresh::{RefreshJob, RefreshReport};
use crate::traits::TopicStore;
use crate::worker::WorkerPool;

#[derive(Debug, Clone, PartialEq)]
pub enum NextDue {
    Due { topic: Topic, overdue_secs: i64 },
    Idle { sleep: Duration },
}

/// Positive means overdue. A topic never queried is very overdue.
pub fn overdue_seconds(topic: &Topic, config: &SchedulerConfig, now: DateTime<Utc>) -> Result<i64, SagaError> {
    let interval = config.interval_for_priority(topic.priority)?;
    Ok(match topic.last_queried {
        Some(last) => (now - last).num_seconds() - interval,
        None => VERY_OVERDUE_SECS,
    })
}

/// Select the most overdue topic, or how long to sleep before polling again.
pub fn next_due(topics: &[Topic], config: &SchedulerConfig, now: DateTime<Utc>) -> NextDue {
    let mut best: Option<(&Topic, i64)> = None;
    let mut soonest: Option<i64> = None;

    for topic in topics {
        let overdue = match overdue_seconds(topic, config, now) {
            Ok(o) => o,
            Err(e) => {
                warn!(topic_id = topic.id.as_str(), priority = topic.priority, error = %e, "Excluding topic from scheduling");
                continue;
            }
        };
        if overdue > 0 {
            let better = match best {
                None => true,
                Some((b, bo)) => (overdue, std::cmp::Reverse(topic.priority), std::cmp::Reverse(&topic.id))
                    > (bo, std::cmp::Reverse(b.priority), std::cmp::Reverse(&b.id)),
            };
            if better {
                best = Some((topic, overdue));
            }
        } else {
            let until_due = -overdue;
            soonest = Some(soonest.map_or(until_due, |s| s.min(until_due)));
        }
    }

    if let Some((topic, overdue_secs)) = best {
        return NextDue::Due { topic: topic.clone(), overdue_secs };
    }
    let sleep = match soonest {
        Some(secs) => (secs.max(0) as u64).clamp(config.min_sleep_secs, config.max_sleep_secs),
        None => config.idle_sleep_secs,
    };
    NextDue::Idle { sleep: Duration::from_secs(sleep) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Topic),
    /// Another instance claimed it first.
    Lost,
}

/// What one dispatch pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub dispatched: Vec<String>,
    pub lost: Vec<String>,
    pub sleep: Duration,
}

#[derive(Debug)]
pub enum TickOutcome {
    Refreshed(RefreshReport),
    Lost(String),
    Idle(Duration),
}

pub struct Scheduler {
    store: Arc<dyn TopicStore>,
    config: SchedulerConfig,
    pool: WorkerPool,
    job: Arc<RefreshJob>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TopicStore>, config: SchedulerConfig, job: Arc<RefreshJob>) -> Self {
        let pool = WorkerPool::new(config.workers);
        Self { store, config, pool, job }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Compare-and-set `last_queried` from the value `topic` was read with to `now`.
    pub async fn claim(&self, topic: &Topic, now: DateTime<Utc>) -> Result<ClaimOutcome, SagaError> {
        let row = self
            .store
            .claim_topic(&topic.id, topic.last_queried, now)
            .await?
            .ok_or_else(|| SagaError::ClaimFailed(format!("{} (no row returned)", topic.id)))?;

        if row.id != topic.id {
            return Err(SagaError::ClaimFailed(format!("{} (write echoed '{}')", topic.id, row.id)));
        }
        if !row.claimed {
            info!(topic_id = topic.id.as_str(), "Claim lost to another instance");
            return Ok(ClaimOutcome::Lost);
        }

        AuditRecord::new(AuditAction::TopicClaimed, &topic.id, &topic.id, "scheduler")
            .before(&json!({ "last_queried": topic.last_queried }))
            .after(&json!({ "last_queried": now }))
            .emit();

        let mut claimed = topic.clone();
        claimed.last_queried = Some(now);
        Ok(ClaimOutcome::Claimed(claimed))
    }

    /// Claim and spawn every due topic the pool has room for. Returns once nothing is due,
    /// with the sleep hint for the next pass.
    pub async fn dispatch_pass(&self) -> Result<DispatchReport, SagaError> {
        let topics = self.store.list_topics().await?;
        let mut report = DispatchReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let permit = self.pool.acquire().await?;
            let now = Utc::now();
            let remaining: Vec<Topic> = topics.iter().filter(|t| !seen.contains(&t.id)).cloned().collect();

            let (topic, overdue_secs) = match next_due(&remaining, &self.config, now) {
                NextDue::Due { topic, overdue_secs } => (topic, overdue_secs),
                NextDue::Idle { sleep } => {
                    report.sleep = sleep;
                    return Ok(report);
                }
            };
            seen.insert(topic.id.clone());

            match self.claim(&topic, now).await? {
                ClaimOutcome::Lost => {
                    report.lost.push(topic.id);
                }
                ClaimOutcome::Claimed(topic) => {
                    info!(topic_id = topic.id.as_str(), overdue_secs, priority = topic.priority, "Dispatching refresh");
                    report.dispatched.push(topic.id.clone());
                    let job = self.job.clone();
                    self.pool.spawn(permit, async move {
                        match job.run(&topic).await {
                            Ok(r) => info!(topic_id = topic.id.as_str(), "{r}"),
                            Err(e) => error!(topic_id = topic.id.as_str(), error = %e, "Refresh failed"),
                        }
                    });
                }
            }
        }
    }

    /// Dispatch until `shutdown` resolves or a claim fails fatally, then wait for running jobs.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), SagaError> {
        tokio::pin!(shutdown);
        info!(workers = self.pool.size(), "Scheduler started");

        let result = loop {
            let report = match self.dispatch_pass().await {
                Ok(r) => r,
                Err(e) if e.is_fatal() => break Err(e),
                Err(e) => {
                    warn!(error = %e, "Dispatch pass failed");
                    DispatchReport { sleep: Duration::from_secs(self.config.min_sleep_secs), ..Default::default() }
                }
            };
            info!(
                dispatched = report.dispatched.len(),
                lost = report.lost.len(),
                sleep_secs = report.sleep.as_secs(),
                "Dispatch pass complete"
            );

            tokio::select! {
                _ = tokio::time::sleep(report.sleep) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
            }
        };

        self.pool.drain().await?;
        result
    }

    /// Select, claim and refresh at most one topic inline.
    pub async fn tick_once(&self) -> Result<TickOutcome, SagaError> {
        let topics = self.store.list_topics().await?;
        let now = Utc::now();
        let topic = match next_due(&topics, &self.config, now) {
            NextDue::Due { topic, .. } => topic,
            NextDue::Idle { sleep } => return Ok(TickOutcome::Idle(sleep)),
        };
        match self.claim(&topic, now).await? {
            ClaimOutcome::Lost => Ok(TickOutcome::Lost(topic.id)),
            ClaimOutcome::Claimed(topic) => Ok(TickOutcome::Refreshed(self.job.run(&topic).await?)),
        }
    }
}
