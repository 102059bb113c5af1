// src/dedup.rs
//! Deduplicator: drops candidates whose URL is already stored.
use std::collections::HashSet;

use metrics::counter;
use tracing::debug;

use crate::model::ArticleCandidate;
use crate::store::{Store, StoreError};

/// Keep only candidates whose URL the store has never seen, using a single bulk
/// lookup. Repeated URLs inside the batch keep their first occurrence.
pub async fn deduplicate(
    store: &dyn Store,
    candidates: Vec<ArticleCandidate>,
) -> Result<Vec<ArticleCandidate>, StoreError> {
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let urls: Vec<String> = candidates.iter().map(|c| c.url.clone()).collect();
    let existing = store.existing_urls(&urls).await?;

    let total = candidates.len();
    let mut seen: HashSet<String> = HashSet::new();
    let fresh: Vec<ArticleCandidate> = candidates
        .into_iter()
        .filter(|c| !existing.contains(&c.url) && seen.insert(c.url.clone()))
        .collect();

    let skipped = total - fresh.len();
    counter!("dedup_skipped_total").increment(skipped as u64);
    debug!(total, fresh = fresh.len(), skipped, "dedup done");
    Ok(fresh)
}
