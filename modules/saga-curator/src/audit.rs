//! Before/after snapshots of every state change, emitted on the `saga::audit` target.

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TopicCreated,
    TopicClaimed,
    AboutWritten,
    AboutDemoted,
    AboutRemoved,
    AboutHidden,
    PriorityLowered,
    RelationshipAdded,
    RelationshipRemoved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::TopicCreated => "topic_created",
            AuditAction::TopicClaimed => "topic_claimed",
            AuditAction::AboutWritten => "about_written",
            AuditAction::AboutDemoted => "about_demoted",
            AuditAction::AboutRemoved => "about_removed",
            AuditAction::AboutHidden => "about_hidden",
            AuditAction::PriorityLowered => "priority_lowered",
            AuditAction::RelationshipAdded => "relationship_added",
            AuditAction::RelationshipRemoved => "relationship_removed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub topic_id: String,
    /// Article id, relationship id, or topic id the change applies to.
    pub subject: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    /// Who decided: "oracle", "fallback", "capacity", "scheduler", ...
    pub decided_by: &'static str,
    pub rationale: Option<String>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, topic_id: &str, subject: &str, decided_by: &'static str) -> Self {
        Self {
            action,
            topic_id: topic_id.to_string(),
            subject: subject.to_string(),
            before: None,
            after: None,
            decided_by,
            rationale: None,
        }
    }

    pub fn before(mut self, value: &impl Serialize) -> Self {
        self.before = serde_json::to_value(value).ok();
        self
    }

    pub fn after(mut self, value: &impl Serialize) -> Self {
        self.after = serde_json::to_value(value).ok();
        self
    }

    pub fn rationale(mut self, rationale: impl Into<String>) -> Self {
        let r = rationale.into();
        if !r.is_empty() {
            self.rationale = Some(r);
        }
        self
    }

    pub fn emit(&self) {
        let record = serde_json::to_string(self).unwrap_or_default();
        info!(
            target: "saga::audit",
            action = self.action.as_str(),
            topic_id = self.topic_id.as_str(),
            subject = self.subject.as_str(),
            record = record.as_str(),
            "audit"
        );
    }
}
