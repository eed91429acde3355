//! JSON-lines content spool. An external acquirer appends one article per line to
//! `<dir>/<topic_id>.jsonl`; each fetch consumes lines from the front of the file and
//! appends them to `<topic_id>.jsonl.done`. Articles that fail to ingest are appended back
//! to the spool with their content id.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use saga_common::{Article, Topic};

use crate::traits::ContentSource;

pub struct SpoolSource {
    dir: PathBuf,
    // Serializes read-rewrite of spool files within this process.
    io: Mutex<()>,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), io: Mutex::new(()) }
    }

    fn spool_path(&self, topic_id: &str) -> Option<PathBuf> {
        if topic_id.is_empty() || topic_id.contains(['/', '\\']) || topic_id.starts_with('.') {
            return None;
        }
        Some(self.dir.join(format!("{topic_id}.jsonl")))
    }
}

#[async_trait]
impl ContentSource for SpoolSource {
    async fn fetch(&self, topic: &Topic, limit: usize) -> Result<Vec<Article>> {
        let Some(path) = self.spool_path(&topic.id) else {
            warn!(topic_id = topic.id.as_str(), "Topic id not usable as a spool file name");
            return Ok(Vec::new());
        };
        let _io = self.io.lock().await;

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No spool file");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut articles = Vec::new();
        let mut consumed = 0;
        for line in &lines {
            if articles.len() >= limit {
                break;
            }
            consumed += 1;
            match parse_line(line) {
                Ok(article) => articles.push(article),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed spool line"),
            }
        }
        if consumed == 0 {
            return Ok(articles);
        }

        let mut done_path = path.clone().into_os_string();
        done_path.push(".done");
        let mut done = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&done_path)
            .await
            .with_context(|| format!("opening {}", PathBuf::from(&done_path).display()))?;
        for line in &lines[..consumed] {
            done.write_all(line.as_bytes()).await?;
            done.write_all(b"\n").await?;
        }
        done.flush().await?;

        let rest: String = lines[consumed..].iter().map(|l| format!("{l}\n")).collect();
        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");
        tokio::fs::write(&tmp_path, rest).await?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;

        debug!(topic_id = topic.id.as_str(), consumed, remaining = lines.len() - consumed, "Spool consumed");
        Ok(articles)
    }

    async fn requeue(&self, topic: &Topic, articles: &[Article]) -> Result<()> {
        if articles.is_empty() {
            return Ok(());
        }
        let Some(path) = self.spool_path(&topic.id) else {
            warn!(topic_id = topic.id.as_str(), "Topic id not usable as a spool file name");
            return Ok(());
        };
        let _io = self.io.lock().await;

        let mut lines = String::new();
        for article in articles {
            lines.push_str(&serde_json::to_string(article)?);
            lines.push('\n');
        }
        let mut spool = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        spool.write_all(lines.as_bytes()).await?;
        spool.flush().await?;

        debug!(topic_id = topic.id.as_str(), requeued = articles.len(), "Spool requeued");
        Ok(())
    }
}

fn parse_line(line: &str) -> Result<Article> {
    let article: Article = serde_json::from_str(line)?;
    Ok(article.with_content_id())
}

/// Read every article from a JSON-lines file without consuming it.
pub async fn read_articles_file(path: &Path) -> Result<Vec<Article>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| parse_line(l).with_context(|| format!("{}:{}", path.display(), i + 1)))
        .collect()
}
