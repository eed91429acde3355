//! Small capacity rules shared by every component that counts or bounds something.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Topic;

/// Seconds-overdue assigned to a topic that has never been queried.
pub const VERY_OVERDUE_SECS: i64 = 1_000_000_000;

/// Capacity of one tier for one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierLimit {
    Bounded(u32),
    Unbounded,
}

impl TierLimit {
    pub fn has_room(&self, current: u32) -> bool {
        match self {
            TierLimit::Bounded(max) => current < *max,
            TierLimit::Unbounded => true,
        }
    }

    pub fn max(&self) -> Option<u32> {
        match self {
            TierLimit::Bounded(max) => Some(*max),
            TierLimit::Unbounded => None,
        }
    }
}

impl std::fmt::Display for TierLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierLimit::Bounded(max) => write!(f, "{max}"),
            TierLimit::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Per-topic, per-timeframe pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeBounds {
    pub min: u32,
    pub max: u32,
}

impl TimeframeBounds {
    /// Resolve the bounds for a topic. Each side falls back to its default on its own;
    /// a result with `min > max` or `max == 0` is ignored in favour of the defaults.
    pub fn for_topic(topic: &Topic, defaults: TimeframeBounds) -> TimeframeBounds {
        if topic.timeframe_min.is_none() && topic.timeframe_max.is_none() {
            return defaults;
        }
        let min = topic.timeframe_min.unwrap_or(defaults.min);
        let max = topic.timeframe_max.unwrap_or(defaults.max);
        if min > max || max == 0 {
            warn!(
                topic_id = topic.id.as_str(),
                min = ?topic.timeframe_min,
                max = ?topic.timeframe_max,
                "Ignoring invalid timeframe bounds override"
            );
            return defaults;
        }
        TimeframeBounds { min, max }
    }
}
