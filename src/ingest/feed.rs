// src/ingest/feed.rs
//! Feed adapter: HTTP fetch + RSS/Atom parsing behind a narrow trait.
//! Callers only ever see `Result<Vec<FeedItem>, FeedError>`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::Source;

/// One syndication entry, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    /// Description / summary, usually HTML.
    pub summary: Option<String>,
    /// Full content body (e.g. `content:encoded`), usually HTML.
    pub content: Option<String>,
    pub enclosure_url: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("feed body exceeds {0} bytes")]
    TooLarge(usize),
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<FeedItem>, FeedError>;
}

/// Parse an RSS 0.9x/1.0/2.0, Atom or JSON Feed document.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedItem>, FeedError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FeedError::Parse(e.to_string()))?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());

            let enclosure_url = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
                .or_else(|| {
                    entry
                        .media
                        .iter()
                        .flat_map(|m| m.thumbnails.iter())
                        .map(|t| t.image.uri.clone())
                        .next()
                });

            FeedItem {
                title: entry.title.map(|t| t.content),
                link,
                guid: Some(entry.id).filter(|id| !id.is_empty()),
                summary: entry.summary.map(|s| s.content),
                content: entry.content.and_then(|c| c.body),
                enclosure_url,
                published: entry.published.or(entry.updated),
            }
        })
        .collect();

    Ok(items)
}

/// Upper bound on a single feed document.
pub const DEFAULT_MAX_FEED_BYTES: usize = 5 * 1024 * 1024;

/// Production fetcher: one GET per source with a bounded timeout and body size.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpFeedFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: DEFAULT_MAX_FEED_BYTES,
        })
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<FeedItem>, FeedError> {
        let mut resp = self.client.get(&source.feed_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let limit = self.max_body_bytes;
        if resp.content_length().is_some_and(|len| len > limit as u64) {
            return Err(FeedError::TooLarge(limit));
        }
        // Content-Length may be absent or wrong; enforce the cap while streaming.
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(FeedError::TooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }
        parse_feed(&body)
    }
}

/// Serves feed documents from memory, keyed by feed URL. Unknown URLs answer 404.
#[derive(Debug, Clone, Default)]
pub struct FixtureFeedFetcher {
    bodies: HashMap<String, String>,
}

impl FixtureFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, feed_url: impl Into<String>, body: impl Into<String>) -> Self {
        self.bodies.insert(feed_url.into(), body.into());
        self
    }
}

#[async_trait]
impl FeedFetcher for FixtureFeedFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<FeedItem>, FeedError> {
        match self.bodies.get(&source.feed_url) {
            Some(body) => parse_feed(body.as_bytes()),
            None => Err(FeedError::Status(404)),
        }
    }
}
