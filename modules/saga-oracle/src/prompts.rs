//! Prompt text for each decision. Every item the oracle may reference is rendered with its
//! id so answers can be checked against what was shown.

use saga_common::{
    AboutEntry, Article, ImportanceScores, RelationshipEdge, RelationshipType, Tier, Timeframe, Topic,
};

use crate::decisions::ReplacementMode;
use crate::util::truncate_to_char_boundary;

const SUMMARY_MAX_BYTES: usize = 600;

pub const CLASSIFY_SYSTEM: &str = "You classify news articles for a market-intelligence knowledge graph. \
For the given topic, pick the time horizon the article matters on (structural: years, medium: weeks to months, \
immediate: days) and score four independent dimensions from 0 to 3: risk, opportunity, trend, catalyst. \
Scores are independent; most articles score high on at most one. Score 0 everywhere if the article is irrelevant \
to the topic.";

pub const TIER_CONFLICT_SYSTEM: &str = "You manage a capacity-limited tier of articles for one topic. \
The tier is full. Decide whether the new article should drop a tier (downgrade_new), whether an existing article \
should drop to a lower tier to make room (downgrade_existing, naming its id and new tier), or whether the new \
article should be rejected. Only reference article ids listed in the prompt.";

pub const REPLACEMENT_SYSTEM: &str = "You curate a bounded pool of articles for one topic and time horizon. \
Given a newly admitted article and the existing pool, decide whether one existing article should be removed, \
hidden, or lowered in priority, or whether nothing should change. Only reference article ids listed in the prompt.";

pub const SHORTLIST_SYSTEM: &str = "You map relationships between market topics. From the candidate list, \
return the ids of topics plausibly related to the source topic. Return an empty list if none are.";

pub const PROPOSE_EDGE_SYSTEM: &str = "You map relationships between market topics. Propose the single strongest \
new relationship from the source topic to one shortlisted topic. Types: INFLUENCES (source drives target), \
CORRELATES_WITH, PEERS, COMPONENT_OF (source is part of target), HEDGES. Return a null rel_type if no new edge \
is warranted.";

pub const WEAKEST_EDGE_SYSTEM: &str = "The source topic already has the maximum number of relationships of this \
type. Name the weakest existing edge to remove so the proposed edge can be added, or null to keep all existing \
edges and drop the proposal.";

pub const TOPIC_CAPACITY_SYSTEM: &str = "You guard a knowledge graph that holds a bounded number of topics. \
The graph is at capacity. Decide whether the proposed topic adds enough to be created anyway (add) or not (reject).";

pub fn classify(topic: &Topic, article: &Article) -> String {
    format!(
        "Topic: {} ({})\n\nArticle:\n{}",
        topic.name,
        topic.id,
        render_article(article)
    )
}

/// The item competing for a full tier.
pub struct Contender<'a> {
    pub article: &'a Article,
    pub scores: ImportanceScores,
    pub motivation: &'a str,
}

pub fn tier_conflict(
    topic: &Topic,
    timeframe: Timeframe,
    tier: Tier,
    limit: u32,
    contender: &Contender<'_>,
    incumbents: &[AboutEntry],
) -> String {
    let mut p = format!(
        "Topic: {} ({})\nTimeframe: {timeframe}\nTier {tier} is full: {} of {limit} slots used.\n\n\
         New article (scores {}):\n{}",
        topic.name,
        topic.id,
        incumbents.len(),
        render_scores(&contender.scores),
        render_article(contender.article)
    );
    if !contender.motivation.is_empty() {
        p.push_str(&format!("  why it matters: {}\n", contender.motivation));
    }
    p.push_str(&format!("\nExisting tier {tier} articles:\n"));
    p.extend(incumbents.iter().map(render_entry));
    p
}

pub fn replacement(
    topic: &Topic,
    timeframe: Timeframe,
    mode: ReplacementMode,
    incoming: &AboutEntry,
    pool: &[AboutEntry],
) -> String {
    let instruction = match mode {
        ReplacementMode::MustReplace => "The pool is at capacity. You MUST name one existing article to remove or hide.",
        ReplacementMode::CanReplace => "The pool has room. Only act if the new article clearly supersedes an existing one.",
    };
    let mut p = format!(
        "Topic: {} ({})\nTimeframe: {timeframe}\n{instruction}\n\nNew article:\n{}\nExisting pool:\n",
        topic.name,
        topic.id,
        render_entry(incoming)
    );
    p.extend(pool.iter().map(render_entry));
    p
}

pub fn shortlist(source: &Topic, candidates: &[Topic]) -> String {
    let mut p = format!("Source topic: {} ({})\n\nCandidates:\n", source.name, source.id);
    p.extend(candidates.iter().map(|t| format!("- [{}] {}\n", t.id, t.name)));
    p
}

pub fn propose_edge(source: &Topic, shortlist: &[Topic], existing: &[RelationshipEdge]) -> String {
    let mut p = format!("Source topic: {} ({})\n\nShortlisted targets:\n", source.name, source.id);
    p.extend(shortlist.iter().map(|t| format!("- [{}] {}\n", t.id, t.name)));
    if !existing.is_empty() {
        p.push_str("\nExisting relationships (do not repeat):\n");
        p.extend(existing.iter().map(render_edge));
    }
    p
}

pub fn weakest_edge(
    source: &Topic,
    rel_type: RelationshipType,
    existing: &[RelationshipEdge],
    proposed_target: &str,
    proposed_motivation: &str,
) -> String {
    let mut p = format!(
        "Source topic: {} ({})\nProposed: {} -{rel_type}-> {proposed_target}: {proposed_motivation}\n\n\
         Existing {rel_type} edges:\n",
        source.name, source.id, source.id
    );
    p.extend(existing.iter().map(render_edge));
    p
}

pub fn topic_capacity(proposed: &Topic, existing: &[Topic], max_topics: u32) -> String {
    let mut p = format!(
        "The graph holds {} topics (limit {max_topics}).\nProposed topic: {} ({})\n\nExisting topics:\n",
        existing.len(),
        proposed.name,
        proposed.id
    );
    p.extend(
        existing
            .iter()
            .map(|t| format!("- [{}] {} (priority {})\n", t.id, t.name, t.priority)),
    );
    p
}

fn render_article(article: &Article) -> String {
    let published = article
        .published_at
        .map(|ts| format!("  published: {}\n", ts.format("%Y-%m-%d %H:%M")))
        .unwrap_or_default();
    format!(
        "- [{}] source: {}\n{published}  {}\n",
        article.id,
        article.source,
        truncate_to_char_boundary(article.summary.trim(), SUMMARY_MAX_BYTES)
    )
}

fn render_entry(entry: &AboutEntry) -> String {
    let mut p = render_article(&entry.article);
    p.push_str(&format!(
        "  tier {} | scores {} | priority rank {} | dominant {}\n",
        entry.edge.tier,
        render_scores(&entry.edge.scores),
        entry.edge.priority_rank,
        entry.edge.scores.dominant()
    ));
    if !entry.edge.motivation.is_empty() {
        p.push_str(&format!("  why it matters: {}\n", entry.edge.motivation));
    }
    p
}

fn render_edge(e: &RelationshipEdge) -> String {
    format!("- [{}] {} -{}-> {}: {}\n", e.id, e.source, e.rel_type, e.target, e.motivation)
}

fn render_scores(s: &ImportanceScores) -> String {
    format!("risk {} / opportunity {} / trend {} / catalyst {}", s.risk, s.opportunity, s.trend, s.catalyst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prompt_carries_ids() {
        let topic = Topic::new("eurusd", "EUR/USD", 1);
        let article = Article {
            id: "a1".into(),
            summary: "ECB signals a pause".into(),
            source: "newswire".into(),
            published_at: None,
        };
        let p = classify(&topic, &article);
        assert!(p.contains("(eurusd)"));
        assert!(p.contains("[a1]"));
        assert!(p.contains("ECB signals a pause"));
    }

    #[test]
    fn edge_prompts_list_every_edge_once() {
        let topic = Topic::new("eurusd", "EUR/USD", 1);
        let now = chrono::Utc::now();
        let edges = vec![
            RelationshipEdge::new(RelationshipType::Peers, "eurusd", "dxy", "same driver", now),
            RelationshipEdge::new(RelationshipType::Peers, "eurusd", "gbpusd", "same bloc", now),
        ];
        let p = weakest_edge(&topic, RelationshipType::Peers, &edges, "audusd", "risk proxy");
        assert!(p.contains("-> audusd: risk proxy"));
        for e in &edges {
            assert_eq!(p.matches(&format!("[{}]", e.id)).count(), 1);
        }
        assert!(p.ends_with('\n'));
    }

    #[test]
    fn must_replace_prompt_says_must() {
        let topic = Topic::new("t", "T", 1);
        let entry = AboutEntry {
            article: Article { id: "n".into(), summary: "s".into(), source: "x".into(), published_at: None },
            edge: saga_common::AboutEdge::admitted(
                "n",
                "t",
                &saga_common::Classification {
                    timeframe: Timeframe::Medium,
                    scores: ImportanceScores { risk: 1, ..Default::default() },
                    motivation: String::new(),
                    implications: String::new(),
                },
                Tier::new(1).unwrap(),
                chrono::Utc::now(),
            ),
        };
        let p = replacement(&topic, Timeframe::Medium, ReplacementMode::MustReplace, &entry, &[]);
        assert!(p.contains("MUST"));
    }
}
