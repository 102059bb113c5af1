// src/ingest/mod.rs
//! Feed Ingestor: pulls every active source, keeps the newest items per source
//! and normalizes them into `ArticleCandidate`s. A failing source is logged and
//! skipped; it never aborts the run.
pub mod feed;

use std::sync::Arc;

use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::{debug, warn};

use crate::ingest::feed::{FeedFetcher, FeedItem};
use crate::model::{ArticleCandidate, Source};

/// Collapse markup into plain text: strip tags, decode entities, fold whitespace.
///
/// Tags go first so escaped `&lt;`/`&gt;` survive as literal text. A `<` only
/// opens a tag when a letter, `/`, `!` or `?` follows it, so "pay < 50k" is kept.
pub fn normalize_text(s: &str) -> String {
    // 1) Strip HTML tags and comments
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| {
        Regex::new(r"(?is)<!--.*?-->|</?[a-z][^<>]*>|<[!?][^<>]*>").expect("tag regex")
    });
    let stripped = re_tags.replace_all(s, " ");

    // 2) HTML entity decode
    let mut out = html_escape::decode_html_entities(&stripped).to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Cut to at most `max_chars` characters (not bytes), then trim.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect::<String>().trim().to_string()
}

/// First `<img src="...">` reference in an HTML fragment.
pub fn extract_image_from_content(html: &str) -> Option<String> {
    static RE_IMG: OnceCell<Regex> = OnceCell::new();
    let re = RE_IMG.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).expect("img regex")
    });
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Keep at most `cap` items. When every item is dated, the `cap` newest win;
/// otherwise feed order is trusted. Survivors keep their feed order.
pub fn select_recent(items: Vec<FeedItem>, cap: usize) -> Vec<FeedItem> {
    if items.len() <= cap {
        return items;
    }
    if items.iter().any(|it| it.published.is_none()) {
        return items.into_iter().take(cap).collect();
    }

    let mut order: Vec<usize> = (0..items.len()).collect();
    // stable: ties keep feed order
    order.sort_by(|&a, &b| items[b].published.cmp(&items[a].published));
    let mut keep = vec![false; items.len()];
    for &i in order.iter().take(cap) {
        keep[i] = true;
    }
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(it, k)| k.then_some(it))
        .collect()
}

fn looks_like_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Turn one raw entry into a candidate; `None` when title or URL is missing.
pub fn normalize_item(source: &Source, item: FeedItem, lead_max_chars: usize) -> Option<ArticleCandidate> {
    let title = item.title.as_deref().map(str::trim).unwrap_or_default().to_string();
    let url = item
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .or_else(|| item.guid.as_deref().map(str::trim).filter(|g| looks_like_url(g)))
        .unwrap_or_default()
        .to_string();

    if title.is_empty() || url.is_empty() {
        return None;
    }

    let best_text = item
        .summary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or(item.content.as_deref())
        .unwrap_or_default();
    let lead = truncate_chars(&normalize_text(best_text), lead_max_chars);

    let image_url = item
        .enclosure_url
        .filter(|u| !u.trim().is_empty())
        .or_else(|| item.content.as_deref().and_then(extract_image_from_content))
        .or_else(|| item.summary.as_deref().and_then(extract_image_from_content));

    Some(ArticleCandidate {
        source_id: source.id,
        source_name: source.name.clone(),
        title,
        lead,
        url,
        image_url,
        published_at: item.published,
    })
}

/// Outcome of one ingest pass.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub candidates: Vec<ArticleCandidate>,
    /// (source name, reason) for every source that could not be read.
    pub failed_sources: Vec<(String, String)>,
}

pub struct FeedIngestor {
    fetcher: Arc<dyn FeedFetcher>,
    items_per_source: usize,
    lead_max_chars: usize,
}

impl FeedIngestor {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, items_per_source: usize, lead_max_chars: usize) -> Self {
        Self {
            fetcher,
            items_per_source,
            lead_max_chars,
        }
    }

    /// Fetch sources one after another; output keeps source order, then item order.
    pub async fn ingest(&self, sources: &[Source]) -> IngestReport {
        crate::metrics::ensure_described();

        let mut report = IngestReport::default();
        for source in sources.iter().filter(|s| s.active) {
            match self.fetcher.fetch(source).await {
                Ok(items) => {
                    let total = items.len();
                    let kept: Vec<ArticleCandidate> = select_recent(items, self.items_per_source)
                        .into_iter()
                        .filter_map(|it| normalize_item(source, it, self.lead_max_chars))
                        .collect();
                    debug!(source = %source.name, total, kept = kept.len(), "feed ingested");
                    counter!("ingest_items_total").increment(kept.len() as u64);
                    report.candidates.extend(kept);
                }
                Err(e) => {
                    warn!(source = %source.name, url = %source.feed_url, error = %e, "feed fetch failed; skipping source");
                    counter!("ingest_source_errors_total").increment(1);
                    report.failed_sources.push((source.name.clone(), e.to_string()));
                }
            }
        }
        report
    }
}
