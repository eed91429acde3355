use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SagaError;

// --- Enums ---

/// Time horizon an article is classified into, per topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Structural,
    Medium,
    Immediate,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::Structural, Timeframe::Medium, Timeframe::Immediate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Structural => "structural",
            Timeframe::Medium => "medium",
            Timeframe::Immediate => "immediate",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structural" => Ok(Timeframe::Structural),
            "medium" => Ok(Timeframe::Medium),
            "immediate" => Ok(Timeframe::Immediate),
            other => Err(SagaError::Validation(format!("unknown timeframe '{other}'"))),
        }
    }
}

/// Importance dimension. Used for prompt rendering ("dominant perspective").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    Risk,
    Opportunity,
    Trend,
    Catalyst,
}

impl std::fmt::Display for Perspective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Perspective::Risk => write!(f, "risk"),
            Perspective::Opportunity => write!(f, "opportunity"),
            Perspective::Trend => write!(f, "trend"),
            Perspective::Catalyst => write!(f, "catalyst"),
        }
    }
}

// --- Tier ---

/// Capacity class 0..=3. Tier 0 is the archive tier and is never capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tier(u8);

impl Tier {
    pub const ARCHIVE: Tier = Tier(0);
    pub const TOP: Tier = Tier(3);

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::TOP.0).then_some(Tier(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_terminal(self) -> bool {
        self == Tier::ARCHIVE
    }

    /// Next tier down, or `None` at the archive tier.
    pub fn lower(self) -> Option<Tier> {
        self.0.checked_sub(1).map(Tier)
    }
}

impl TryFrom<u8> for Tier {
    type Error = SagaError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Tier::new(value).ok_or_else(|| SagaError::Validation(format!("tier {value} out of range 0..=3")))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.0
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Importance ---

/// Highest value any single importance score may take.
pub const MAX_SCORE: u8 = 3;

/// Four independent importance scores, each in `[0, MAX_SCORE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportanceScores {
    pub risk: u8,
    pub opportunity: u8,
    pub trend: u8,
    pub catalyst: u8,
}

impl ImportanceScores {
    /// Build from raw oracle integers. Anything outside `[0, 3]` is rejected, never clamped.
    pub fn from_raw(risk: i64, opportunity: i64, trend: i64, catalyst: i64) -> Result<Self, SagaError> {
        fn check(name: &str, v: i64) -> Result<u8, SagaError> {
            if (0..=MAX_SCORE as i64).contains(&v) {
                Ok(v as u8)
            } else {
                Err(SagaError::Validation(format!("{name} score {v} outside 0..={MAX_SCORE}")))
            }
        }
        Ok(Self {
            risk: check("risk", risk)?,
            opportunity: check("opportunity", opportunity)?,
            trend: check("trend", trend)?,
            catalyst: check("catalyst", catalyst)?,
        })
    }

    pub fn max_score(&self) -> u8 {
        self.risk.max(self.opportunity).max(self.trend).max(self.catalyst)
    }

    pub fn tier(&self) -> Tier {
        // Scores are bounded on construction, so max_score() is always a valid tier.
        Tier(self.max_score().min(MAX_SCORE))
    }

    pub fn is_zero(&self) -> bool {
        self.max_score() == 0
    }

    /// Cap every score at `tier`, so the resulting tier is at most `tier`.
    pub fn capped_at(&self, tier: Tier) -> Self {
        let cap = tier.value();
        Self {
            risk: self.risk.min(cap),
            opportunity: self.opportunity.min(cap),
            trend: self.trend.min(cap),
            catalyst: self.catalyst.min(cap),
        }
    }

    pub fn dominant(&self) -> Perspective {
        let pairs = [
            (Perspective::Risk, self.risk),
            (Perspective::Opportunity, self.opportunity),
            (Perspective::Trend, self.trend),
            (Perspective::Catalyst, self.catalyst),
        ];
        // First maximum wins on ties.
        pairs
            .iter()
            .fold(pairs[0], |best, p| if p.1 > best.1 { *p } else { best })
            .0
    }
}

/// Validated per-topic classification of one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub timeframe: Timeframe,
    pub scores: ImportanceScores,
    pub motivation: String,
    pub implications: String,
}

impl Classification {
    pub fn tier(&self) -> Tier {
        self.scores.tier()
    }
}

// --- Nodes ---

/// Synthesized analysis text, one field per timeframe. Written elsewhere; read here only
/// to decide whether a topic still needs its first analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicAnalysis {
    pub structural: Option<String>,
    pub medium: Option<String>,
    pub immediate: Option<String>,
}

impl TopicAnalysis {
    pub fn has_missing_field(&self) -> bool {
        [&self.structural, &self.medium, &self.immediate]
            .iter()
            .any(|f| f.as_deref().map(str::trim).unwrap_or("").is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    /// 1 (refresh most often) ..= 5.
    pub priority: u8,
    pub timeframe_min: Option<u32>,
    pub timeframe_max: Option<u32>,
    pub last_queried: Option<DateTime<Utc>>,
    pub last_analyzed: Option<DateTime<Utc>>,
    pub queries: u32,
    #[serde(default)]
    pub analysis: TopicAnalysis,
}

impl Topic {
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: u8) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            timeframe_min: None,
            timeframe_max: None,
            last_queried: None,
            last_analyzed: None,
            queries: 0,
            analysis: TopicAnalysis::default(),
        }
    }
}

/// A stored content item. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub id: String,
    pub summary: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Content address: sha256 over source, publish time and summary.
    pub fn content_address(source: &str, published_at: Option<&DateTime<Utc>>, summary: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(b"\n");
        if let Some(ts) = published_at {
            hasher.update(ts.to_rfc3339().as_bytes());
        }
        hasher.update(b"\n");
        hasher.update(summary.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Fill in a content-addressed id when the producer did not supply one.
    pub fn with_content_id(mut self) -> Self {
        if self.id.trim().is_empty() {
            self.id = Self::content_address(&self.source, self.published_at.as_ref(), &self.summary);
        }
        self
    }
}

/// Lowest and highest `priority_rank` an AboutEdge can carry.
pub const MIN_PRIORITY_RANK: u8 = 1;
pub const MAX_PRIORITY_RANK: u8 = 3;
/// Rank assumed for edges written before ranks existed.
pub const DEFAULT_PRIORITY_RANK: u8 = 2;

/// Article -> Topic edge carrying the topic-specific classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboutEdge {
    pub article_id: String,
    pub topic_id: String,
    pub timeframe: Timeframe,
    pub scores: ImportanceScores,
    pub tier: Tier,
    pub motivation: String,
    pub implications: String,
    pub priority_rank: u8,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub downgraded_at: Option<DateTime<Utc>>,
    pub downgrade_reason: Option<String>,
}

impl AboutEdge {
    /// Edge for a freshly admitted article placed at `tier`. Scores above `tier` are capped
    /// so that `tier == max(scores)` holds on the stored edge.
    pub fn admitted(article_id: &str, topic_id: &str, classification: &Classification, tier: Tier, now: DateTime<Utc>) -> Self {
        let scores = classification.scores.capped_at(tier);
        Self {
            article_id: article_id.to_string(),
            topic_id: topic_id.to_string(),
            timeframe: classification.timeframe,
            scores,
            tier: scores.tier(),
            motivation: classification.motivation.clone(),
            implications: classification.implications.clone(),
            priority_rank: tier.value().clamp(MIN_PRIORITY_RANK, MAX_PRIORITY_RANK),
            hidden: false,
            created_at: now,
            downgraded_at: None,
            downgrade_reason: None,
        }
    }
}

/// An AboutEdge joined with the article it points from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboutEntry {
    pub article: Article,
    pub edge: AboutEdge,
}

// --- Relationships ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Influences,
    CorrelatesWith,
    Peers,
    ComponentOf,
    Hedges,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 5] = [
        RelationshipType::Influences,
        RelationshipType::CorrelatesWith,
        RelationshipType::Peers,
        RelationshipType::ComponentOf,
        RelationshipType::Hedges,
    ];

    /// Graph relationship label.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Influences => "INFLUENCES",
            RelationshipType::CorrelatesWith => "CORRELATES_WITH",
            RelationshipType::Peers => "PEERS",
            RelationshipType::ComponentOf => "COMPONENT_OF",
            RelationshipType::Hedges => "HEDGES",
        }
    }

    pub fn is_directional(&self) -> bool {
        matches!(self, RelationshipType::Influences | RelationshipType::ComponentOf)
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationshipType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SagaError::Validation(format!("unknown relationship type '{s}'")))
    }
}

/// Topic -> Topic relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub id: String,
    pub rel_type: RelationshipType,
    pub source: String,
    pub target: String,
    pub motivation: String,
    pub created_at: DateTime<Utc>,
}

impl RelationshipEdge {
    pub fn new(rel_type: RelationshipType, source: &str, target: &str, motivation: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::edge_id(rel_type, source, target),
            rel_type,
            source: source.to_string(),
            target: target.to_string(),
            motivation: motivation.into(),
            created_at: now,
        }
    }

    /// Deterministic id for idempotent upserts. Symmetric types sort their endpoints so
    /// that A-B and B-A share one id.
    pub fn edge_id(rel_type: RelationshipType, source: &str, target: &str) -> String {
        let (a, b) = if rel_type.is_directional() || source <= target {
            (source, target)
        } else {
            (target, source)
        };
        format!("{}__{}__{}", a, rel_type.as_str(), b).to_lowercase()
    }
}

/// Why a topic's derived analysis should be regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    ArticleReplaced,
    ArticleHidden,
    PriorityLowered,
    AnalysisMissing,
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeReason::ArticleReplaced => write!(f, "article_replaced"),
            ChangeReason::ArticleHidden => write!(f, "article_hidden"),
            ChangeReason::PriorityLowered => write!(f, "priority_lowered"),
            ChangeReason::AnalysisMissing => write!(f, "analysis_missing"),
        }
    }
}
