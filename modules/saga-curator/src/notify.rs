use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use saga_common::ChangeReason;

use crate::traits::TopicStore;

/// A topic's derived analysis needs regenerating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicChanged {
    pub topic_id: String,
    pub reason: ChangeReason,
    pub at: DateTime<Utc>,
}

/// Fire-and-forget publisher. Sending never blocks and never fails the caller.
#[derive(Clone)]
pub struct Notifier {
    tx: UnboundedSender<TopicChanged>,
}

impl Notifier {
    pub fn channel() -> (Self, UnboundedReceiver<TopicChanged>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, topic_id: &str, reason: ChangeReason) {
        let event = TopicChanged {
            topic_id: topic_id.to_string(),
            reason,
            at: Utc::now(),
        };
        if self.tx.send(event).is_err() {
            debug!(topic_id, %reason, "Notifier closed, dropping change signal");
        }
    }
}

/// Consumer of change signals.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn topic_changed(&self, event: &TopicChanged) -> Result<()>;
}

/// Drain `rx` into `sink` on its own task until every `Notifier` is dropped.
/// Sink failures are logged, not retried.
pub fn spawn_notifier(mut rx: UnboundedReceiver<TopicChanged>, sink: Arc<dyn ChangeSink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = sink.topic_changed(&event).await {
                warn!(topic_id = event.topic_id.as_str(), reason = %event.reason, error = %e, "Change sink failed");
            }
        }
        debug!("Notifier channel closed");
    })
}

pub struct LogSink;

#[async_trait]
impl ChangeSink for LogSink {
    async fn topic_changed(&self, event: &TopicChanged) -> Result<()> {
        info!(topic_id = event.topic_id.as_str(), reason = %event.reason, "Topic changed");
        Ok(())
    }
}

/// Stamps `rewrite_requested_at` / `rewrite_reason` on the Topic for the analysis writer to pick up.
pub struct GraphFlagSink {
    store: Arc<dyn TopicStore>,
}

impl GraphFlagSink {
    pub fn new(store: Arc<dyn TopicStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChangeSink for GraphFlagSink {
    async fn topic_changed(&self, event: &TopicChanged) -> Result<()> {
        self.store.flag_rewrite(&event.topic_id, event.reason, event.at).await?;
        info!(topic_id = event.topic_id.as_str(), reason = %event.reason, "Rewrite requested");
        Ok(())
    }
}
